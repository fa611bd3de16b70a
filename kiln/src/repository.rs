// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Maintenance of repository directories on local disk: creating them,
//! importing package archives, validating index/archive consistency, and
//! packing a project into an importable archive.
//!
//! A repository directory is the servable form: an `index.json.gz` at the
//! top plus `pkg/<id>.tar.gz` archives referenced relatively.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ident::PackageId;
use url::Url;
use walkdir::WalkDir;

use crate::error::{Error, ErrorKind, Result};
use crate::index::{
    parse_index, render_index_document, IndexEntry, IndexLibrary, RepositoryIndex, INDEX_FILE,
    MAX_INDEX_SCHEMA_VERSION,
};
use crate::manifest::Manifest;
use crate::store::sha256_file;

/// Creates an empty repository directory with a valid empty index.
pub fn repo_init(dir: &Path, name: &str) -> Result<()> {
    let index_path = dir.join(INDEX_FILE);
    if index_path.exists() {
        return Err(Error::new(
            ErrorKind::RepoSyncInvalidIndex,
            format!("{} already contains an index", dir.display()),
        ));
    }
    std::fs::create_dir_all(dir.join("pkg"))
        .map_err(|e| Error::from_io(e, format!("creating {}", dir.display())))?;
    let index = RepositoryIndex {
        name: name.to_owned(),
        schema_version: MAX_INDEX_SCHEMA_VERSION,
        entries: Vec::new(),
    };
    write_index(dir, &index)
}

/// Imports package archives into a repository directory, replacing entries
/// with the same identity, and republishes the index atomically.
///
/// Returns the identities imported.
pub fn repo_import(repo_dir: &Path, archives: &[PathBuf]) -> Result<Vec<PackageId>> {
    let mut index = read_local_index(repo_dir)?;
    let mut imported = Vec::with_capacity(archives.len());

    for archive in archives {
        let manifest = manifest_from_archive(archive)?;
        let id = manifest.id();

        let rel_path = format!("pkg/{}.tar.gz", id);
        let dest = repo_dir.join(&rel_path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::from_io(e, format!("creating {}", parent.display())))?;
        }
        std::fs::copy(archive, &dest)
            .map_err(|e| Error::from_io(e, format!("copying {}", archive.display())))?;
        let integrity = sha256_file(&dest)?;

        let entry = IndexEntry {
            id: id.clone(),
            libraries: manifest
                .libraries()
                .iter()
                .map(|lib| IndexLibrary {
                    name: lib.name().clone(),
                    uses: lib.uses().iter().map(|u| u.lib.clone()).collect(),
                })
                .collect(),
            dependencies: manifest.all_dependencies(false),
            archive_url: archive_url_in_repo(repo_dir, &rel_path)?,
            integrity: Some(integrity),
            repo: index.name.clone(),
        };

        index.entries.retain(|e| e.id != id);
        index.entries.push(Arc::new(entry));
        imported.push(id);
    }

    index
        .entries
        .sort_by(|a, b| b.id.cmp(&a.id));
    write_index(repo_dir, &index)?;
    Ok(imported)
}

/// Checks a repository directory for internal consistency: the index parses
/// under a supported schema, every referenced archive exists, integrity
/// records match, and each archive's embedded manifest matches its index
/// identity.
pub fn repo_validate(repo_dir: &Path) -> Result<()> {
    let index = read_local_index(repo_dir)?;

    for entry in &index.entries {
        let archive = entry.archive_url.to_file_path().map_err(|_| {
            Error::new(
                ErrorKind::RepoSyncInvalidIndex,
                format!("entry {} references a non-local archive", entry.id),
            )
        })?;
        if !archive.is_file() {
            return Err(Error::new(
                ErrorKind::RepoSyncInvalidIndex,
                format!(
                    "entry {} references a missing archive {}",
                    entry.id,
                    archive.display()
                ),
            ));
        }
        if let Some(expected) = &entry.integrity {
            let actual = sha256_file(&archive)?;
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(Error::new(
                    ErrorKind::ArchiveMalformed,
                    format!(
                        "archive for {} does not match its integrity record",
                        entry.id
                    ),
                ));
            }
        }
        let manifest = manifest_from_archive(&archive)?;
        if manifest.id() != entry.id {
            return Err(Error::new(
                ErrorKind::ManifestMismatch,
                format!(
                    "archive for {} actually contains {}",
                    entry.id,
                    manifest.id()
                ),
            ));
        }
    }
    Ok(())
}

/// Packs a project directory into a `tar.gz` suitable for [`repo_import`]:
/// the manifest plus the source tree, exactly as laid out in the project.
///
/// Returns the path of the archive written (defaulting to
/// `<project>/<id>.tar.gz`).
pub fn pkg_archive(project_dir: &Path, out: Option<&Path>) -> Result<PathBuf> {
    let manifest = Manifest::load_dir(project_dir)?;
    let id = manifest.id();
    let dest = match out {
        Some(path) => path.to_path_buf(),
        None => project_dir.join(format!("{}.tar.gz", id)),
    };

    let file = std::fs::File::create(&dest)
        .map_err(|e| Error::from_io(e, format!("creating {}", dest.display())))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);

    for entry in WalkDir::new(project_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !skip_in_archive(e.file_name().to_str().unwrap_or("")))
    {
        let entry = entry.map_err(|e| {
            Error::with_source(ErrorKind::IoFailure, "walking the project tree", e)
        })?;
        let rel = entry
            .path()
            .strip_prefix(project_dir)
            .expect("walkdir yields children of the root");
        if entry.file_type().is_dir() {
            tar.append_dir(rel, entry.path()).map_err(|e| {
                Error::from_io(e, format!("archiving {}", entry.path().display()))
            })?;
        } else if entry.file_type().is_file() {
            tar.append_path_with_name(entry.path(), rel).map_err(|e| {
                Error::from_io(e, format!("archiving {}", entry.path().display()))
            })?;
        }
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| Error::from_io(e, "finishing archive"))?;
    encoder
        .finish()
        .map_err(|e| Error::from_io(e, "finishing archive"))?;
    tracing::info!("packed {} into {}", id, dest.display());
    Ok(dest)
}

/// Build outputs and VCS litter have no place in a package archive.
fn skip_in_archive(file_name: &str) -> bool {
    matches!(file_name, "_build" | ".git" | ".kiln") || file_name.ends_with(".tar.gz")
}

fn read_local_index(repo_dir: &Path) -> Result<RepositoryIndex> {
    let index_path = repo_dir.join(INDEX_FILE);
    let compressed = std::fs::read(&index_path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::new(
            ErrorKind::RepoSyncMissing,
            format!("{} has no index", repo_dir.display()),
        ),
        _ => Error::from_io(e, format!("reading {}", index_path.display())),
    })?;
    let mut decompressed = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut decompressed)
        .map_err(|e| {
            Error::with_source(
                ErrorKind::RepoSyncInvalidIndex,
                format!("{} is not valid gzip", index_path.display()),
                e,
            )
        })?;
    let url = dir_url(repo_dir)?;
    parse_index(&url, &decompressed)
}

fn write_index(repo_dir: &Path, index: &RepositoryIndex) -> Result<()> {
    let document = render_index_document(index);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&document)
        .and_then(|_| encoder.finish())
        .map_err(|e| Error::from_io(e, "compressing the index"))
        .and_then(|data| {
            fileutil::atomic_write(&repo_dir.join(INDEX_FILE), &data).map_err(|e| {
                Error::with_source(
                    ErrorKind::IoFailure,
                    format!("publishing the index under {}", repo_dir.display()),
                    e,
                )
            })
        })
}

fn archive_url_in_repo(repo_dir: &Path, rel_path: &str) -> Result<Url> {
    let base = dir_url(repo_dir)?;
    crate::index::join_repo_url(&base, rel_path).map_err(|e| {
        Error::with_source(ErrorKind::IoFailure, "building an archive URL", e)
    })
}

fn dir_url(dir: &Path) -> Result<Url> {
    let absolute = dir
        .canonicalize()
        .map_err(|e| Error::from_io(e, format!("resolving {}", dir.display())))?;
    Url::from_directory_path(&absolute).map_err(|_| {
        Error::new(
            ErrorKind::IoFailure,
            format!("{} has no file URL", dir.display()),
        )
    })
}

/// Reads the embedded manifest out of a package archive without unpacking
/// the rest of it.
fn manifest_from_archive(archive_path: &Path) -> Result<Manifest> {
    let file = std::fs::File::open(archive_path)
        .map_err(|e| Error::from_io(e, format!("reading {}", archive_path.display())))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let entries = archive.entries().map_err(|e| {
        Error::with_source(
            ErrorKind::ArchiveMalformed,
            format!("reading {}", archive_path.display()),
            e,
        )
    })?;
    for entry in entries {
        let mut entry = entry.map_err(|e| {
            Error::with_source(
                ErrorKind::ArchiveMalformed,
                format!("reading {}", archive_path.display()),
                e,
            )
        })?;
        let path = entry
            .path()
            .map_err(|e| {
                Error::with_source(
                    ErrorKind::ArchiveMalformed,
                    format!("reading {}", archive_path.display()),
                    e,
                )
            })?
            .into_owned();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if path.components().count() == 1
            && (name == crate::manifest::MANIFEST_TOML || name == crate::manifest::MANIFEST_JSON)
        {
            let mut text = String::new();
            entry.read_to_string(&mut text).map_err(|e| {
                Error::with_source(
                    ErrorKind::ArchiveMalformed,
                    format!("reading {}", archive_path.display()),
                    e,
                )
            })?;
            return if name == crate::manifest::MANIFEST_JSON {
                Manifest::from_json_str(&text)
            } else {
                Manifest::from_toml_str(&text)
            };
        }
    }
    Err(Error::new(
        ErrorKind::ArchiveMalformed,
        format!("{} carries no manifest", archive_path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use testutil::ArchiveBuilder;

    fn make_archive(dir: &Path, id: &str, files: &[(&str, &str)]) -> PathBuf {
        let id: PackageId = id.parse().unwrap();
        let manifest = format!(
            "name = \"{}\"\nversion = \"{}\"\npkg-version = {}\n",
            id.name(),
            id.version(),
            id.rev()
        );
        let mut builder = ArchiveBuilder::new();
        builder.file("kiln.toml", &manifest);
        for (path, content) in files {
            builder.file(path, content);
        }
        let path = dir.join(format!("{}.tar.gz", id));
        builder.write_tar_gz(&path).unwrap();
        path
    }

    #[test]
    fn init_import_validate() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("repo");
        repo_init(&repo_dir, "testrepo")?;
        repo_validate(&repo_dir)?;

        let archive = make_archive(dir.path(), "zlib@1.2.13~1", &[("src/z.c", "int z;\n")]);
        let imported = repo_import(&repo_dir, &[archive])?;
        assert_eq!(vec!["zlib@1.2.13~1".parse::<PackageId>().unwrap()], imported);

        repo_validate(&repo_dir)?;

        let index = read_local_index(&repo_dir)?;
        assert_eq!("testrepo", index.name);
        assert_eq!(1, index.entries.len());
        assert_eq!("zlib@1.2.13~1", index.entries[0].id.to_string());
        assert!(index.entries[0].integrity.is_some());
        Ok(())
    }

    #[test]
    fn reimport_replaces_entry() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("repo");
        repo_init(&repo_dir, "testrepo")?;

        let archive = make_archive(dir.path(), "zlib@1.2.13~1", &[]);
        repo_import(&repo_dir, &[archive.clone()])?;
        repo_import(&repo_dir, &[archive])?;

        let index = read_local_index(&repo_dir)?;
        assert_eq!(1, index.entries.len());
        Ok(())
    }

    #[test]
    fn validate_catches_tampered_archive() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("repo");
        repo_init(&repo_dir, "testrepo")?;
        let archive = make_archive(dir.path(), "zlib@1.2.13~1", &[]);
        repo_import(&repo_dir, &[archive])?;

        // Swap the stored archive for different content.
        let stored = repo_dir.join("pkg/zlib@1.2.13~1.tar.gz");
        let other = make_archive(dir.path(), "zlib@1.2.13~2", &[]);
        std::fs::copy(other, &stored).unwrap();

        let err = repo_validate(&repo_dir).unwrap_err();
        assert_eq!("archive-malformed", err.marker());
        Ok(())
    }

    #[test]
    fn init_refuses_existing_index() {
        let dir = tempfile::tempdir().unwrap();
        let repo_dir = dir.path().join("repo");
        repo_init(&repo_dir, "one").unwrap();
        let err = repo_init(&repo_dir, "two").unwrap_err();
        assert_eq!("repo-sync-invalid-index", err.marker());
    }

    #[test]
    fn pkg_archive_then_import() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("proj");
        testutil::ScratchProject::create(
            &project,
            "name = \"widgets\"\nversion = \"0.1.0\"\n",
        )
        .unwrap();
        testutil::write_tree(&project, &[("src/widgets.cpp", "int w;\n")]).unwrap();

        let archive = pkg_archive(&project, Some(&dir.path().join("widgets.tar.gz")))?;

        let repo_dir = dir.path().join("repo");
        repo_init(&repo_dir, "testrepo")?;
        let imported = repo_import(&repo_dir, &[archive])?;
        assert_eq!("widgets@0.1.0~1", imported[0].to_string());
        repo_validate(&repo_dir)?;
        Ok(())
    }
}
