// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Identity model shared by every layer of the tool: package names,
//! semantic versions, package revisions, version intervals and dependency
//! expressions, together with their canonical string forms.
//!
//! Every type here satisfies `parse(format(x)) == x`.

mod depexpr;
mod interval;
mod name;
mod package_id;
mod version;

pub use depexpr::*;
pub use interval::*;
pub use name::*;
pub use package_id::*;
pub use version::*;

/// Errors produced while parsing identity strings.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid package name: {0:?}")]
    InvalidName(String),
    #[error("invalid version: {0:?}")]
    InvalidVersion(String),
    #[error("invalid dependency expression: {0:?}")]
    InvalidDepExpr(String),
    #[error("invalid package id: {0:?}")]
    InvalidPackageId(String),
}
