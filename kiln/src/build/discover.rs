// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Source discovery: walking a library's subtree and classifying each file
//! by suffix and location.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, ErrorKind, Result};
use crate::plan::PlannedLibrary;
use crate::toolchain::Language;

/// What role a discovered file plays in the build.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum SourceKind {
    /// An ordinary library source, compiled into the library archive.
    LibSource,
    /// `*.main.<ext>`: the entry point of an executable.
    AppSource,
    /// `*.test.<ext>`: the entry point of a test executable.
    TestSource,
    /// A private header; contributes to rebuild tracking only.
    Header,
    /// A header under the library's public include tree; additionally
    /// subject to the isolation check.
    PublicHeader,
}

#[derive(Clone, Debug)]
pub struct SourceFile {
    /// Absolute path.
    pub path: PathBuf,
    /// Path relative to the library root.
    pub rel: PathBuf,
    pub kind: SourceKind,
    pub language: Language,
}

impl SourceFile {
    pub fn is_compiled(&self) -> bool {
        matches!(
            self.kind,
            SourceKind::LibSource | SourceKind::AppSource | SourceKind::TestSource
        )
    }

    /// The name of the executable this source produces (`foo.main.cpp` →
    /// `foo`). Only meaningful for app and test sources.
    pub fn executable_name(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        stem.trim_end_matches(".main")
            .trim_end_matches(".test")
            .to_owned()
    }
}

fn classify_ext(ext: &str) -> Option<(bool, Language)> {
    match ext {
        "c" => Some((true, Language::C)),
        "cc" | "cpp" | "cxx" => Some((true, Language::Cxx)),
        "h" => Some((false, Language::C)),
        "hh" | "hpp" | "hxx" => Some((false, Language::Cxx)),
        _ => None,
    }
}

fn skip_dir(name: &str) -> bool {
    name.starts_with('.') || name == "_build"
}

/// Walks the library subtree and classifies every source and header.
pub fn discover(library: &PlannedLibrary) -> Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    if !library.root.is_dir() {
        // A library may legitimately have no sources at all (a manifest
        // without a source tree builds nothing).
        return Ok(sources);
    }

    for entry in WalkDir::new(&library.root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            !(e.file_type().is_dir()
                && e.file_name().to_str().map(skip_dir).unwrap_or(true))
        })
    {
        let entry = entry.map_err(|e| {
            Error::with_source(
                ErrorKind::IoFailure,
                format!("walking {}", library.root.display()),
                e,
            )
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some((compiled, language)) = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(classify_ext)
        else {
            continue;
        };
        let rel = path
            .strip_prefix(&library.root)
            .expect("walkdir yields children of the root")
            .to_path_buf();

        let kind = if compiled {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
            if stem.ends_with(".main") {
                SourceKind::AppSource
            } else if stem.ends_with(".test") {
                SourceKind::TestSource
            } else {
                SourceKind::LibSource
            }
        } else if is_public_header(library, path) {
            SourceKind::PublicHeader
        } else {
            SourceKind::Header
        };

        sources.push(SourceFile {
            path: path.to_path_buf(),
            rel,
            kind,
            language,
        });
    }
    Ok(sources)
}

/// A header is public when it lives under one of the library's exported
/// include directories.
fn is_public_header(library: &PlannedLibrary, path: &Path) -> bool {
    library
        .public_includes
        .iter()
        .any(|dir| path.starts_with(dir))
}
