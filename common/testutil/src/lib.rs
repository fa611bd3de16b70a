// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Scratch fixtures for tests: file trees, package archives and whole
//! package repositories reachable through `file://` URLs.

mod archive;
mod repo;
mod tree;

pub use archive::*;
pub use repo::*;
pub use tree::*;
