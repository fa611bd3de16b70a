// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The uniform error type surfaced by every component.
//!
//! Each error carries a stable kebab-case marker so tests can assert error
//! identity without parsing prose, and maps to the CLI exit-code contract:
//! 1 for user errors, 2 for build failures, 3 for environment failures.

use std::fmt::{self, Debug, Display};
use std::io::ErrorKind as IoKind;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy. One variant per stable marker.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    Hash,
    PartialEq,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    // Configuration errors, reported at load time.
    InvalidName,
    InvalidVersion,
    InvalidDepExpr,
    InvalidManifest,
    InvalidSpdx,
    LibraryCycle,

    // Solver.
    NoDependencySolution,

    // Repository-side errors.
    RepoSyncMissing,
    RepoSyncInvalidIndex,
    RepoIndexTooNew,
    NetworkFailure,

    // Package-store errors. Never auto-recovered.
    ArchiveMalformed,
    ManifestMismatch,
    CorruptedCacheEntry,
    DiskFull,
    PermissionDenied,

    // Build errors. Carry the offending node identity and captured output.
    SyntaxCheckFailed,
    MissingUsingDeclaration,
    CompileFailed,
    LinkFailed,
    BuildFailedTestsFailed,

    // Toolchain description missing or unusable.
    BadToolchain,

    // Uncategorized I/O trouble.
    IoFailure,
}

impl ErrorKind {
    /// The stable kebab-case marker, e.g. `no-dependency-solution`.
    pub fn marker(&self) -> &'static str {
        (*self).into()
    }

    /// The process exit code class of this error.
    pub fn exit_code(self) -> u8 {
        use ErrorKind::*;
        match self {
            InvalidName | InvalidVersion | InvalidDepExpr | InvalidManifest | InvalidSpdx
            | LibraryCycle | NoDependencySolution => 1,
            SyntaxCheckFailed | MissingUsingDeclaration | CompileFailed | LinkFailed
            | BuildFailedTestsFailed => 2,
            RepoSyncMissing | RepoSyncInvalidIndex | RepoIndexTooNew | NetworkFailure
            | ArchiveMalformed | ManifestMismatch | CorruptedCacheEntry | DiskFull
            | PermissionDenied | BadToolchain | IoFailure => 3,
        }
    }
}

/// An error with a stable kind, a human-readable message, and an optional
/// underlying cause.
pub struct Error {
    kind: ErrorKind,
    message: String,
    source: Option<anyhow::Error>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Classifies an I/O error: out-of-space and permission problems get
    /// their own markers, everything else is a generic I/O failure.
    pub fn from_io(e: std::io::Error, message: impl Into<String>) -> Self {
        let kind = match e.kind() {
            IoKind::PermissionDenied => ErrorKind::PermissionDenied,
            _ if e.raw_os_error() == Some(nospc_errno()) => ErrorKind::DiskFull,
            _ => ErrorKind::IoFailure,
        };
        Self::with_source(kind, message, e)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn marker(&self) -> &'static str {
        self.kind.marker()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

#[cfg(unix)]
fn nospc_errno() -> i32 {
    nix::errno::Errno::ENOSPC as i32
}

#[cfg(not(unix))]
fn nospc_errno() -> i32 {
    // ERROR_DISK_FULL
    112
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.marker(), self.message)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.marker(), self.message)?;
        if let Some(source) = &self.source {
            write!(f, "\n\nCaused by:\n    {:#}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.source {
            Some(source) => Some(&**source),
            None => None,
        }
    }
}

impl From<ident::ParseError> for Error {
    fn from(e: ident::ParseError) -> Self {
        let kind = match &e {
            ident::ParseError::InvalidName(_) => ErrorKind::InvalidName,
            ident::ParseError::InvalidVersion(_) => ErrorKind::InvalidVersion,
            ident::ParseError::InvalidDepExpr(_) => ErrorKind::InvalidDepExpr,
            ident::ParseError::InvalidPackageId(_) => ErrorKind::InvalidManifest,
        };
        Self::new(kind, e.to_string())
    }
}

impl cliutil::ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        Error::exit_code(self)
    }
}
