// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The local keyed store backing the dependency database.
//!
//! The logical schema has three key spaces: per-output compile records,
//! per-package import records, and per-repository registrations. The
//! physical encoding (a single JSON document) is private; records are
//! written through under a mutex and persisted atomically, so readers of
//! another record observe either the complete prior record or the complete
//! new one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether the last compile attempt for an output succeeded.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LastResult {
    Succeeded,
    Failed,
}

/// A header observed during the previous successful compile of an output.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct HeaderRecord {
    pub path: PathBuf,
    /// Freshness stamp: a content hash in strict mode, `mtime:size` in fast
    /// mode. Opaque to the database.
    pub stamp: String,
}

/// The record kept per object-file output.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct OutputRecord {
    pub command_hash: String,
    pub source_stamp: String,
    pub headers: Vec<HeaderRecord>,
    pub last_result: LastResult,
}

/// The record kept per imported package.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct PackageRecord {
    pub local_path: PathBuf,
    pub imported_at: u64,
}

/// The record kept per registered repository.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RepoRecord {
    pub url: String,
    pub last_refresh: u64,
    pub index_version: u32,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct Tables {
    #[serde(default)]
    outputs: BTreeMap<String, OutputRecord>,
    #[serde(default)]
    packages: BTreeMap<String, PackageRecord>,
    #[serde(default)]
    repos: BTreeMap<String, RepoRecord>,
}

/// A keyed store bound to one file on disk.
pub struct Database {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl Database {
    /// Opens the store at `path`. A missing file yields an empty store. An
    /// unreadable document also yields an empty store (with a warning): the
    /// database is a cache of derived facts, and losing it only costs a
    /// rebuild.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = match std::fs::read(path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(tables) => tables,
                Err(e) => {
                    tracing::warn!(
                        "discarding unreadable database {}: {}",
                        path.display(),
                        e
                    );
                    Tables::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => return Err(Error::from_io(e, format!("opening {}", path.display()))),
        };
        Ok(Self {
            path: path.to_path_buf(),
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn output(&self, key: &str) -> Option<OutputRecord> {
        self.tables.lock().unwrap().outputs.get(key).cloned()
    }

    pub fn set_output(&self, key: &str, record: OutputRecord) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.outputs.insert(key.to_owned(), record);
        self.persist_locked(&tables)
    }

    /// Marks the last compile of `key` failed while preserving the prior
    /// header list, so later builds still notice header edits and re-attempt
    /// the compile until it succeeds.
    pub fn mark_output_failed(&self, key: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.outputs.get_mut(key) {
            Some(record) => record.last_result = LastResult::Failed,
            None => {
                tables.outputs.insert(
                    key.to_owned(),
                    OutputRecord {
                        command_hash: String::new(),
                        source_stamp: String::new(),
                        headers: Vec::new(),
                        last_result: LastResult::Failed,
                    },
                );
            }
        }
        self.persist_locked(&tables)
    }

    pub fn package(&self, key: &str) -> Option<PackageRecord> {
        self.tables.lock().unwrap().packages.get(key).cloned()
    }

    pub fn set_package(&self, key: &str, record: PackageRecord) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.packages.insert(key.to_owned(), record);
        self.persist_locked(&tables)
    }

    pub fn repo(&self, name: &str) -> Option<RepoRecord> {
        self.tables.lock().unwrap().repos.get(name).cloned()
    }

    pub fn repos(&self) -> BTreeMap<String, RepoRecord> {
        self.tables.lock().unwrap().repos.clone()
    }

    pub fn set_repo(&self, name: &str, record: RepoRecord) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.repos.insert(name.to_owned(), record);
        self.persist_locked(&tables)
    }

    pub fn remove_repo(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.repos.remove(name);
        self.persist_locked(&tables)
    }

    fn persist_locked(&self, tables: &Tables) -> Result<()> {
        let data = serde_json::to_vec_pretty(tables).expect("database serialization cannot fail");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::from_io(e, format!("creating {}", parent.display())))?;
        }
        fileutil::atomic_write(&self.path, &data).map_err(|e| {
            Error::with_source(
                crate::ErrorKind::IoFailure,
                format!("persisting {}", self.path.display()),
                e,
            )
        })
    }
}

/// The current time as seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
