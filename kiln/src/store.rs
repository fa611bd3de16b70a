// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The content-addressed package store.
//!
//! Unpacked package sources live under `pkgs/<name>@<version>~<rev>/`.
//! Population goes through a staging directory under `tmp/` and is
//! published by a single directory rename, which is the linearization point
//! for concurrent processes racing to install the same entry. Published
//! entries are immutable; validation failures on an existing entry are
//! reported but never auto-deleted.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use fileutil::{publish_dir, StagingDir};
use flate2::read::GzDecoder;
use ident::PackageId;
use sha2::{Digest, Sha256};
use url::Url;

use crate::db::{unix_now, Database, PackageRecord};
use crate::error::{Error, ErrorKind, Result};
use crate::index::IndexEntry;
use crate::manifest::Manifest;
use crate::transport::{FetchError, Transport};

/// How many archive downloads may run at once.
pub const DOWNLOAD_POOL_SIZE: usize = 10;

pub struct PackageStore {
    root: PathBuf,
    db: Database,
}

impl PackageStore {
    /// Opens (creating if needed) the store under `cache_root`.
    pub fn open(cache_root: &Path) -> Result<Self> {
        for sub in ["pkgs", "tmp"] {
            let dir = cache_root.join(sub);
            std::fs::create_dir_all(&dir)
                .map_err(|e| Error::from_io(e, format!("creating {}", dir.display())))?;
        }
        let db = Database::open(&cache_root.join("packages.db"))?;
        Ok(Self {
            root: cache_root.to_path_buf(),
            db,
        })
    }

    /// The directory a package's sources occupy once installed.
    pub fn package_dir(&self, id: &PackageId) -> PathBuf {
        self.root.join("pkgs").join(id.to_string())
    }

    /// Ensures the sources for `entry` are installed and returns their path.
    pub fn ensure(&self, entry: &IndexEntry, transport: &dyn Transport) -> Result<PathBuf> {
        self.ensure_id(
            &entry.id,
            &entry.archive_url,
            entry.integrity.as_deref(),
            transport,
        )
    }

    /// Ensures the sources for `id` are installed, downloading and unpacking
    /// `archive_url` if needed, and returns their path.
    pub fn ensure_id(
        &self,
        id: &PackageId,
        archive_url: &Url,
        integrity: Option<&str>,
        transport: &dyn Transport,
    ) -> Result<PathBuf> {
        let dest = self.package_dir(id);
        if dest.is_dir() {
            self.validate_entry(id, &dest)?;
            return Ok(dest);
        }

        let staging = StagingDir::create_under(&self.root.join("tmp")).map_err(|e| {
            Error::with_source(ErrorKind::IoFailure, "creating a staging directory", e)
        })?;

        let archive_path = staging.path().join("archive.tar.gz");
        download(transport, archive_url, &archive_path)?;

        if let Some(expected) = integrity {
            let actual = sha256_file(&archive_path)?;
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(Error::new(
                    ErrorKind::ArchiveMalformed,
                    format!(
                        "archive for {} does not match its integrity record \
                         (expected sha256 {}, got {})",
                        id, expected, actual
                    ),
                ));
            }
        }

        let unpacked = staging.path().join("src");
        unpack_archive(&archive_path, &unpacked)?;

        // The archive must actually contain the package it claims to be.
        let manifest = Manifest::load_dir(&unpacked).map_err(|e| {
            Error::with_source(
                ErrorKind::ArchiveMalformed,
                format!("archive for {} carries no readable manifest", id),
                e,
            )
        })?;
        if manifest.id() != *id {
            return Err(Error::new(
                ErrorKind::ManifestMismatch,
                format!(
                    "archive at {} claims to be {} but its manifest says {}",
                    archive_url,
                    id,
                    manifest.id()
                ),
            ));
        }

        if publish_dir(&unpacked, &dest).map_err(|e| {
            Error::with_source(ErrorKind::IoFailure, format!("installing {}", id), e)
        })? {
            tracing::info!("installed {} to {}", id, dest.display());
        } else {
            // Lost the publication race; the winner's entry must still be
            // the right package.
            self.validate_entry(id, &dest)?;
        }

        self.db.set_package(
            &id.to_string(),
            PackageRecord {
                local_path: dest.clone(),
                imported_at: unix_now(),
            },
        )?;
        // `staging` (and the downloaded archive) is removed on drop.
        drop(staging);
        Ok(dest)
    }

    /// Checks that an installed entry is the package it should be.
    fn validate_entry(&self, id: &PackageId, dir: &Path) -> Result<()> {
        let manifest = Manifest::load_dir(dir).map_err(|e| {
            Error::with_source(
                ErrorKind::CorruptedCacheEntry,
                format!("store entry {} is unreadable", dir.display()),
                e,
            )
        })?;
        if manifest.id() != *id {
            return Err(Error::new(
                ErrorKind::CorruptedCacheEntry,
                format!(
                    "store entry {} contains {} instead of {}",
                    dir.display(),
                    manifest.id(),
                    id
                ),
            ));
        }
        Ok(())
    }
}

fn download(transport: &dyn Transport, url: &Url, dest: &Path) -> Result<()> {
    let file = File::create(dest)
        .map_err(|e| Error::from_io(e, format!("creating {}", dest.display())))?;
    let mut writer = BufWriter::new(file);
    transport.fetch_to(url, &mut writer).map_err(|e| match e {
        FetchError::NotFound => Error::new(
            ErrorKind::NetworkFailure,
            format!("archive {} does not exist", url),
        ),
        FetchError::Transient(e) | FetchError::Permanent(e) => {
            Error::with_source(ErrorKind::NetworkFailure, format!("downloading {}", url), e)
        }
    })?;
    writer
        .flush()
        .map_err(|e| Error::from_io(e, format!("writing {}", dest.display())))
}

/// Hex-encoded sha256 of a file's content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let file =
        File::open(path).map_err(|e| Error::from_io(e, format!("reading {}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| Error::from_io(e, format!("reading {}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .map_err(|e| Error::from_io(e, format!("creating {}", dest.display())))?;
    let file = File::open(archive_path)
        .map_err(|e| Error::from_io(e, format!("reading {}", archive_path.display())))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    // tar's unpack refuses entries that would escape `dest`.
    archive.unpack(dest).map_err(|e| {
        Error::with_source(
            ErrorKind::ArchiveMalformed,
            format!("unpacking {}", archive_path.display()),
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::HttpTransport;
    use testutil::ArchiveBuilder;

    fn pkg_id(s: &str) -> PackageId {
        s.parse().unwrap()
    }

    fn write_archive(dir: &Path, id: &PackageId, extra: &[(&str, &str)]) -> (Url, String) {
        let manifest = format!(
            "name = \"{}\"\nversion = \"{}\"\npkg-version = {}\n",
            id.name(),
            id.version(),
            id.rev()
        );
        let mut builder = ArchiveBuilder::new();
        builder.file("kiln.toml", &manifest);
        for (path, content) in extra {
            builder.file(path, content);
        }
        let archive_path = dir.join(format!("{}.tar.gz", id));
        let digest = builder.write_tar_gz(&archive_path).unwrap();
        (Url::from_file_path(&archive_path).unwrap(), digest)
    }

    #[test]
    fn fetch_unpack_reuse() -> Result<()> {
        let cache = tempfile::tempdir().unwrap();
        let archives = tempfile::tempdir().unwrap();
        let id = pkg_id("zlib@1.2.13~2");
        let (url, digest) =
            write_archive(archives.path(), &id, &[("src/zlib.c", "int z;\n")]);

        let store = PackageStore::open(cache.path())?;
        let transport = HttpTransport::new();
        let dir = store.ensure_id(&id, &url, Some(&digest), &transport)?;
        assert!(dir.join("kiln.toml").is_file());
        assert_eq!("int z;\n", std::fs::read_to_string(dir.join("src/zlib.c")).unwrap());

        // A second call reuses the entry without touching the archive.
        std::fs::remove_file(url.to_file_path().unwrap()).unwrap();
        let again = store.ensure_id(&id, &url, Some(&digest), &transport)?;
        assert_eq!(dir, again);

        // No staging residue survives a successful install.
        assert_eq!(0, std::fs::read_dir(cache.path().join("tmp")).unwrap().count());
        Ok(())
    }

    #[test]
    fn integrity_mismatch_is_archive_malformed() {
        let cache = tempfile::tempdir().unwrap();
        let archives = tempfile::tempdir().unwrap();
        let id = pkg_id("zlib@1.2.13~1");
        let (url, _) = write_archive(archives.path(), &id, &[]);

        let store = PackageStore::open(cache.path()).unwrap();
        let err = store
            .ensure_id(&id, &url, Some("0".repeat(64).as_str()), &HttpTransport::new())
            .unwrap_err();
        assert_eq!("archive-malformed", err.marker());
        assert!(!store.package_dir(&id).exists());
    }

    #[test]
    fn manifest_mismatch_leaves_store_unchanged() {
        let cache = tempfile::tempdir().unwrap();
        let archives = tempfile::tempdir().unwrap();
        // The archive is really zlib@1.2.13~1 but we ask for ~2.
        let actual = pkg_id("zlib@1.2.13~1");
        let (url, digest) = write_archive(archives.path(), &actual, &[]);
        let wanted = pkg_id("zlib@1.2.13~2");

        let store = PackageStore::open(cache.path()).unwrap();
        let err = store
            .ensure_id(&wanted, &url, Some(&digest), &HttpTransport::new())
            .unwrap_err();
        assert_eq!("manifest-mismatch", err.marker());
        assert!(!store.package_dir(&wanted).exists());
        assert!(!store.package_dir(&actual).exists());
    }

    #[test]
    fn garbage_archive_is_archive_malformed() {
        let cache = tempfile::tempdir().unwrap();
        let archives = tempfile::tempdir().unwrap();
        let archive = archives.path().join("bad.tar.gz");
        std::fs::write(&archive, b"this is not a tarball").unwrap();
        let url = Url::from_file_path(&archive).unwrap();

        let store = PackageStore::open(cache.path()).unwrap();
        let err = store
            .ensure_id(&pkg_id("zlib@1.0.0~1"), &url, None, &HttpTransport::new())
            .unwrap_err();
        assert_eq!("archive-malformed", err.marker());
    }

    #[test]
    fn corrupted_entry_is_reported_not_deleted() {
        let cache = tempfile::tempdir().unwrap();
        let id = pkg_id("zlib@1.2.13~1");

        let store = PackageStore::open(cache.path()).unwrap();
        let entry = store.package_dir(&id);
        std::fs::create_dir_all(&entry).unwrap();
        std::fs::write(
            entry.join("kiln.toml"),
            "name = \"other\"\nversion = \"9.9.9\"\n",
        )
        .unwrap();

        let url = Url::parse("https://example.com/zlib.tar.gz").unwrap();
        let err = store
            .ensure_id(&id, &url, None, &HttpTransport::new())
            .unwrap_err();
        assert_eq!("corrupted-cache-entry", err.marker());
        // The entry is left alone for a human to inspect.
        assert!(entry.join("kiln.toml").is_file());
    }

    #[test]
    fn missing_archive_is_network_failure() {
        let cache = tempfile::tempdir().unwrap();
        let archives = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(archives.path().join("absent.tar.gz")).unwrap();

        let store = PackageStore::open(cache.path()).unwrap();
        let err = store
            .ensure_id(&pkg_id("zlib@1.0.0~1"), &url, None, &HttpTransport::new())
            .unwrap_err();
        assert_eq!("network-failure", err.marker());
    }
}
