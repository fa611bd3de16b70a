// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! kiln: a source-based C/C++ package manager and build driver.
//!
//! The crate is organized downstream-only: the identity model feeds the
//! manifest loader and repository index, those feed the solver, the solver
//! result and the package store feed the plan materializer, and the plan
//! plus the toolchain adapter feed the build graph. No layer below the
//! solver consults solver internals.

pub mod build;
pub mod db;
pub mod error;
pub mod index;
pub mod manifest;
pub mod plan;
pub mod repository;
pub mod solver;
pub mod store;
pub mod toolchain;
pub mod transport;

pub use error::{Error, ErrorKind, Result};
