// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Repository indices: fetching, validation and the searchable catalog.
//!
//! Each repository serves a single gzip-compressed JSON index at a
//! well-known relative path. A refresh downloads, decompresses,
//! schema-checks and then atomically swaps the in-memory snapshot; a
//! partially-refreshed index is never observable. Unknown JSON fields are
//! ignored; schema versions above [`MAX_INDEX_SCHEMA_VERSION`] are refused.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::read::GzDecoder;
use ident::{DepExpr, IntervalSet, Name, PackageId, Version};
use serde::Deserialize;
use url::Url;

use crate::db::{unix_now, Database, RepoRecord};
use crate::error::{Error, ErrorKind, Result};
use crate::transport::{FetchError, Transport};

/// The well-known relative path of a repository's index document.
pub const INDEX_FILE: &str = "index.json.gz";

/// The newest index schema this build understands.
pub const MAX_INDEX_SCHEMA_VERSION: u32 = 1;

/// How often and how patiently a refresh retries transient failures.
#[derive(Copy, Clone, Debug)]
pub struct RefreshPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

/// One library listed in an index entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexLibrary {
    pub name: Name,
    /// Sibling libraries this library consumes.
    pub uses: Vec<Name>,
}

/// One `(name, version, pkg-rev)` candidate in the catalog.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub id: PackageId,
    pub libraries: Vec<IndexLibrary>,
    pub dependencies: Vec<DepExpr>,
    pub archive_url: Url,
    /// Hex-encoded sha256 of the archive, when the repository declares one.
    pub integrity: Option<String>,
    /// The repository the entry came from.
    pub repo: String,
}

impl IndexEntry {
    pub fn library(&self, name: &Name) -> Option<&IndexLibrary> {
        self.libraries.iter().find(|lib| &lib.name == name)
    }

    /// Whether the entry provides the named library. An entry that lists no
    /// libraries implicitly provides the conventional package-named root
    /// library and nothing else.
    pub fn provides(&self, name: &Name) -> bool {
        if self.libraries.is_empty() {
            return name == self.id.name();
        }
        self.library(name).is_some()
    }
}

/// An immutable snapshot of one repository's index.
#[derive(Debug)]
pub struct RepositoryIndex {
    pub name: String,
    pub schema_version: u32,
    pub entries: Vec<Arc<IndexEntry>>,
}

/// The raw on-the-wire schema. Unknown fields are deliberately ignored.
#[derive(Debug, Deserialize)]
struct RawIndex {
    #[serde(rename = "schema-version")]
    schema_version: u32,
    name: String,
    #[serde(default)]
    packages: Vec<RawIndexPackage>,
}

#[derive(Debug, Deserialize)]
struct RawIndexPackage {
    name: String,
    version: String,
    #[serde(rename = "pkg-version", default = "default_pkg_version")]
    pkg_version: u32,
    #[serde(default)]
    libraries: Vec<RawIndexLibrary>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(rename = "archive-url")]
    archive_url: String,
    #[serde(default)]
    integrity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIndexLibrary {
    name: String,
    #[serde(default)]
    uses: Vec<String>,
}

fn default_pkg_version() -> u32 {
    1
}

fn invalid_index(repo: &str, message: impl std::fmt::Display) -> Error {
    Error::new(
        ErrorKind::RepoSyncInvalidIndex,
        format!("repository {:?}: {}", repo, message),
    )
}

/// Parses and schema-checks a decompressed index document.
pub(crate) fn parse_index(repo_url: &Url, data: &[u8]) -> Result<RepositoryIndex> {
    let raw: RawIndex = serde_json::from_slice(data)
        .map_err(|e| invalid_index(repo_url.as_str(), format!("malformed index: {}", e)))?;

    if raw.schema_version > MAX_INDEX_SCHEMA_VERSION {
        return Err(Error::new(
            ErrorKind::RepoIndexTooNew,
            format!(
                "repository {:?} uses index schema version {} but this build only \
                 understands versions up to {}",
                raw.name, raw.schema_version, MAX_INDEX_SCHEMA_VERSION
            ),
        ));
    }

    let mut entries = Vec::with_capacity(raw.packages.len());
    for pkg in raw.packages {
        let name = Name::try_new(&pkg.name)
            .map_err(|e| invalid_index(&raw.name, e.to_string()))?;
        let version = Version::try_new(&pkg.version)
            .map_err(|e| invalid_index(&raw.name, e.to_string()))?;
        if pkg.pkg_version < 1 {
            return Err(invalid_index(
                &raw.name,
                format!("package {:?} has pkg-version 0", pkg.name),
            ));
        }
        let libraries = pkg
            .libraries
            .iter()
            .map(|lib| {
                Ok(IndexLibrary {
                    name: Name::try_new(&lib.name)
                        .map_err(|e| invalid_index(&raw.name, e.to_string()))?,
                    uses: lib
                        .uses
                        .iter()
                        .map(|u| {
                            Name::try_new(u)
                                .map_err(|e| invalid_index(&raw.name, e.to_string()))
                        })
                        .collect::<Result<_>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let dependencies = pkg
            .dependencies
            .iter()
            .map(|d| {
                d.parse::<DepExpr>()
                    .map_err(|e| invalid_index(&raw.name, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        let archive_url = join_repo_url(repo_url, &pkg.archive_url)
            .map_err(|e| invalid_index(&raw.name, e.to_string()))?;

        entries.push(Arc::new(IndexEntry {
            id: PackageId::new(name, version, pkg.pkg_version),
            libraries,
            dependencies,
            archive_url,
            integrity: pkg.integrity,
            repo: raw.name.clone(),
        }));
    }

    Ok(RepositoryIndex {
        name: raw.name,
        schema_version: raw.schema_version,
        entries,
    })
}

/// Resolves a possibly-relative archive URL against the repository URL.
pub fn join_repo_url(base: &Url, relative: &str) -> anyhow::Result<Url> {
    // Url::join replaces the last path segment unless the base ends in '/'.
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        base.set_path(&format!("{}/", base.path()));
    }
    Ok(base.join(relative)?)
}

/// One registered repository plus its current index snapshot.
#[derive(Debug)]
pub struct Repository {
    name: String,
    url: Url,
    index: Option<Arc<RepositoryIndex>>,
}

impl Repository {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn index(&self) -> Option<&Arc<RepositoryIndex>> {
        self.index.as_ref()
    }
}

/// The set of registered repositories, in query precedence order.
///
/// Registrations persist in the cache root's database; refreshed indices
/// persist (decompressed) next to it so later invocations can query without
/// a network round trip.
pub struct RepositorySet {
    root: PathBuf,
    db: Database,
    repos: Vec<Repository>,
    policy: RefreshPolicy,
}

impl RepositorySet {
    /// Opens the repository set rooted at the cache directory.
    ///
    /// Registered repositories load in name order; the order repositories
    /// are added on the command line (or re-added programmatically) decides
    /// query precedence within one invocation.
    pub fn open(cache_root: &Path) -> Result<Self> {
        let db = Database::open(&cache_root.join("repos.db"))?;
        let mut repos = Vec::new();
        for (name, record) in db.repos() {
            let url = Url::parse(&record.url).map_err(|e| {
                Error::with_source(
                    ErrorKind::CorruptedCacheEntry,
                    format!("repository {:?} has an unusable URL", name),
                    e,
                )
            })?;
            let index = load_persisted_index(cache_root, &name, &url);
            repos.push(Repository { name, url, index });
        }
        Ok(Self {
            root: cache_root.to_path_buf(),
            db,
            repos,
            policy: RefreshPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    /// Registers the repository serving its index under `url` and performs
    /// the initial refresh (the index document names the repository).
    /// Returns the repository name.
    pub fn add(&mut self, url: &Url, transport: &dyn Transport) -> Result<String> {
        let index = self.fetch_index(url, transport)?;
        let name = index.name.clone();

        if let Some(existing) = self.repos.iter().find(|r| r.name == name) {
            if existing.url != *url {
                return Err(Error::new(
                    ErrorKind::RepoSyncInvalidIndex,
                    format!(
                        "repository name {:?} is already registered for {}",
                        name, existing.url
                    ),
                ));
            }
        }

        self.commit_index(&name, url, index)?;
        Ok(name)
    }

    /// Unregisters a repository and forgets its persisted index.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        self.db.remove_repo(name)?;
        self.repos.retain(|r| r.name != name);
        let _ = std::fs::remove_file(persisted_index_path(&self.root, name));
        Ok(())
    }

    /// Refreshes one repository by name.
    pub fn refresh(&mut self, name: &str, transport: &dyn Transport) -> Result<()> {
        let repo = self
            .repos
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::RepoSyncMissing,
                    format!("no repository named {:?} is registered", name),
                )
            })?;
        let url = repo.url.clone();
        let index = self.fetch_index(&url, transport)?;
        self.commit_index(name, &url, index)
    }

    /// Refreshes every registered repository.
    pub fn refresh_all(&mut self, transport: &dyn Transport) -> Result<()> {
        let names: Vec<String> = self.repos.iter().map(|r| r.name.clone()).collect();
        for name in names {
            self.refresh(&name, transport)?;
        }
        Ok(())
    }

    /// Builds the searchable catalog over the current snapshots, with
    /// precedence following the repository order of this set.
    pub fn catalog(&self) -> Catalog {
        Catalog::build(self.repos.iter().filter_map(|r| r.index.as_deref()))
    }

    /// Downloads and validates an index, retrying transient failures with
    /// doubling backoff. Schema errors never retry.
    fn fetch_index(&self, url: &Url, transport: &dyn Transport) -> Result<RepositoryIndex> {
        let index_url = join_repo_url(url, INDEX_FILE).map_err(|e| {
            Error::with_source(
                ErrorKind::RepoSyncInvalidIndex,
                format!("unusable repository URL {}", url),
                e,
            )
        })?;

        let mut backoff = self.policy.initial_backoff;
        let mut attempt = 0;
        let compressed = loop {
            attempt += 1;
            match transport.fetch(&index_url) {
                Ok(data) => break data,
                Err(FetchError::NotFound) => {
                    return Err(Error::new(
                        ErrorKind::RepoSyncMissing,
                        format!("repository index {} does not exist", index_url),
                    ))
                }
                Err(FetchError::Transient(e)) if attempt < self.policy.attempts => {
                    tracing::warn!(
                        "fetching {} failed (attempt {}/{}): {:#}; retrying in {:?}",
                        index_url,
                        attempt,
                        self.policy.attempts,
                        e,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    backoff *= 2;
                }
                Err(FetchError::Transient(e)) | Err(FetchError::Permanent(e)) => {
                    return Err(Error::with_source(
                        ErrorKind::NetworkFailure,
                        format!("failed to fetch {}", index_url),
                        e,
                    ))
                }
            }
        };

        let mut decompressed = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decompressed)
            .map_err(|e| {
                Error::with_source(
                    ErrorKind::RepoSyncInvalidIndex,
                    format!("index at {} is not valid gzip", index_url),
                    e,
                )
            })?;

        parse_index(url, &decompressed)
    }

    /// Persists a validated index and swaps it into place. The in-memory
    /// swap is a single `Arc` replacement, so concurrent readers keep the
    /// old snapshot; the on-disk copy is written atomically.
    fn commit_index(&mut self, name: &str, url: &Url, index: RepositoryIndex) -> Result<()> {
        let path = persisted_index_path(&self.root, name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::from_io(e, format!("creating {}", parent.display())))?;
        }
        let persisted = render_index_document(&index);
        fileutil::atomic_write(&path, &persisted).map_err(|e| {
            Error::with_source(
                ErrorKind::IoFailure,
                format!("persisting index for {:?}", name),
                e,
            )
        })?;

        self.db.set_repo(
            name,
            RepoRecord {
                url: url.to_string(),
                last_refresh: unix_now(),
                index_version: index.schema_version,
            },
        )?;

        let index = Some(Arc::new(index));
        match self.repos.iter_mut().find(|r| r.name == name) {
            Some(repo) => {
                repo.url = url.clone();
                repo.index = index;
            }
            None => self.repos.push(Repository {
                name: name.to_owned(),
                url: url.clone(),
                index,
            }),
        }
        Ok(())
    }
}

fn persisted_index_path(root: &Path, name: &str) -> PathBuf {
    root.join("indices").join(format!("{}.json", name))
}

/// Renders an index snapshot back to the raw JSON document form used for
/// the persisted copy.
pub(crate) fn render_index_document(index: &RepositoryIndex) -> Vec<u8> {
    let packages: Vec<serde_json::Value> = index
        .entries
        .iter()
        .map(|e| {
            serde_json::json!({
                "name": e.id.name().as_str(),
                "version": e.id.version().to_string(),
                "pkg-version": e.id.rev(),
                "libraries": e.libraries.iter().map(|l| serde_json::json!({
                    "name": l.name.as_str(),
                    "uses": l.uses.iter().map(|u| u.as_str()).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
                "dependencies": e.dependencies.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                "archive-url": e.archive_url.to_string(),
                "integrity": e.integrity,
            })
        })
        .collect();
    let document = serde_json::json!({
        "schema-version": index.schema_version,
        "name": index.name,
        "packages": packages,
    });
    serde_json::to_vec_pretty(&document).expect("index serialization cannot fail")
}

fn load_persisted_index(root: &Path, name: &str, url: &Url) -> Option<Arc<RepositoryIndex>> {
    let path = persisted_index_path(root, name);
    let data = std::fs::read(&path).ok()?;
    match parse_index(url, &data) {
        Ok(index) => Some(Arc::new(index)),
        Err(e) => {
            tracing::warn!("discarding persisted index {}: {}", path.display(), e);
            None
        }
    }
}

/// The searchable union of all repository snapshots.
///
/// Entries for a name are held in descending `(version, pkg-rev)` order;
/// between equal identities the repository listed first wins.
pub struct Catalog {
    by_name: BTreeMap<Name, Vec<Arc<IndexEntry>>>,
}

impl Catalog {
    pub fn build<'a>(repos: impl Iterator<Item = &'a RepositoryIndex>) -> Self {
        let mut by_name: BTreeMap<Name, Vec<Arc<IndexEntry>>> = BTreeMap::new();
        for index in repos {
            for entry in &index.entries {
                by_name
                    .entry(entry.id.name().clone())
                    .or_default()
                    .push(Arc::clone(entry));
            }
        }
        for entries in by_name.values_mut() {
            // Stable sort keeps earlier repositories first among equal ids.
            entries.sort_by(|a, b| {
                (b.id.version(), b.id.rev()).cmp(&(a.id.version(), a.id.rev()))
            });
            entries.dedup_by(|a, b| a.id == b.id);
        }
        Self { by_name }
    }

    /// Builds a catalog from bare entries; candidates order as they would
    /// from a single repository.
    pub fn from_entries(entries: impl IntoIterator<Item = IndexEntry>) -> Self {
        let index = RepositoryIndex {
            name: String::new(),
            schema_version: MAX_INDEX_SCHEMA_VERSION,
            entries: entries.into_iter().map(Arc::new).collect(),
        };
        Self::build(std::iter::once(&index))
    }

    /// All candidates for `name`, in decreasing preference order.
    pub fn find(&self, name: &Name) -> &[Arc<IndexEntry>] {
        self.by_name.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The candidates for `name` whose version lies in `set`.
    pub fn find_in(&self, name: &Name, set: &IntervalSet) -> Vec<Arc<IndexEntry>> {
        self.find(name)
            .iter()
            .filter(|e| set.contains(e.id.version()))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.by_name.keys()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::HttpTransport;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn write_repo(dir: &Path, document: &serde_json::Value) -> Url {
        std::fs::create_dir_all(dir).unwrap();
        let data = serde_json::to_vec(document).unwrap();
        std::fs::write(dir.join(INDEX_FILE), gzip(&data)).unwrap();
        Url::from_directory_path(dir).unwrap()
    }

    fn index_doc(name: &str, packages: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "schema-version": 1,
            "name": name,
            "packages": packages,
        })
    }

    fn no_backoff() -> RefreshPolicy {
        RefreshPolicy {
            attempts: 1,
            initial_backoff: Duration::from_millis(0),
        }
    }

    #[test]
    fn add_and_query() -> Result<()> {
        let cache = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let url = write_repo(
            repo_dir.path(),
            &index_doc(
                "main",
                serde_json::json!([
                    {
                        "name": "zlib",
                        "version": "1.2.13",
                        "pkg-version": 2,
                        "libraries": [{"name": "zlib", "uses": []}],
                        "dependencies": [],
                        "archive-url": "pkg/zlib@1.2.13~2.tar.gz",
                    },
                    {
                        "name": "zlib",
                        "version": "1.2.13",
                        "libraries": [{"name": "zlib", "uses": []}],
                        "archive-url": "pkg/zlib@1.2.13~1.tar.gz",
                        "unknown-field": "ignored",
                    },
                    {
                        "name": "zlib",
                        "version": "1.2.11",
                        "archive-url": "pkg/zlib@1.2.11~1.tar.gz",
                    },
                ]),
            ),
        );

        let mut repos =
            RepositorySet::open(cache.path())?.with_policy(no_backoff());
        let name = repos.add(&url, &HttpTransport::new())?;
        assert_eq!("main", name);

        let catalog = repos.catalog();
        let found: Vec<String> = catalog
            .find(&Name::try_new("zlib").unwrap())
            .iter()
            .map(|e| e.id.to_string())
            .collect();
        // Descending (version, pkg-rev).
        assert_eq!(
            vec!["zlib@1.2.13~2", "zlib@1.2.13~1", "zlib@1.2.11~1"],
            found
        );

        // Archive URLs resolve relative to the repository URL.
        let entry = &catalog.find(&Name::try_new("zlib").unwrap())[0];
        assert!(entry.archive_url.path().ends_with("pkg/zlib@1.2.13~2.tar.gz"));
        Ok(())
    }

    #[test]
    fn registrations_persist_across_open() -> Result<()> {
        let cache = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let url = write_repo(
            repo_dir.path(),
            &index_doc(
                "main",
                serde_json::json!([
                    {"name": "fmt", "version": "9.1.0", "archive-url": "a.tar.gz"},
                ]),
            ),
        );

        {
            let mut repos =
                RepositorySet::open(cache.path())?.with_policy(no_backoff());
            repos.add(&url, &HttpTransport::new())?;
        }

        // A fresh open sees the registration and the persisted index without
        // touching the network.
        let repos = RepositorySet::open(cache.path())?;
        assert_eq!(1, repos.repositories().len());
        let catalog = repos.catalog();
        assert_eq!(1, catalog.find(&Name::try_new("fmt").unwrap()).len());
        Ok(())
    }

    #[test]
    fn missing_index_is_repo_sync_missing() {
        let cache = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let url = Url::from_directory_path(empty.path()).unwrap();

        let mut repos = RepositorySet::open(cache.path())
            .unwrap()
            .with_policy(no_backoff());
        let err = repos.add(&url, &HttpTransport::new()).unwrap_err();
        assert_eq!("repo-sync-missing", err.marker());
    }

    #[test]
    fn non_gzip_index_is_invalid() {
        let cache = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        std::fs::write(repo_dir.path().join(INDEX_FILE), b"plainly not gzip").unwrap();
        let url = Url::from_directory_path(repo_dir.path()).unwrap();

        let mut repos = RepositorySet::open(cache.path())
            .unwrap()
            .with_policy(no_backoff());
        let err = repos.add(&url, &HttpTransport::new()).unwrap_err();
        assert_eq!("repo-sync-invalid-index", err.marker());
    }

    #[test]
    fn newer_schema_is_refused() {
        let cache = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let url = write_repo(
            repo_dir.path(),
            &serde_json::json!({
                "schema-version": MAX_INDEX_SCHEMA_VERSION + 1,
                "name": "future",
                "packages": [],
            }),
        );

        let mut repos = RepositorySet::open(cache.path())
            .unwrap()
            .with_policy(no_backoff());
        let err = repos.add(&url, &HttpTransport::new()).unwrap_err();
        assert_eq!("repo-index-too-new", err.marker());
    }

    #[test]
    fn bad_package_entry_is_invalid_index() {
        let cache = tempfile::tempdir().unwrap();
        let repo_dir = tempfile::tempdir().unwrap();
        let url = write_repo(
            repo_dir.path(),
            &index_doc(
                "main",
                serde_json::json!([
                    {"name": "Bad Name", "version": "1.0.0", "archive-url": "a.tar.gz"},
                ]),
            ),
        );

        let mut repos = RepositorySet::open(cache.path())
            .unwrap()
            .with_policy(no_backoff());
        let err = repos.add(&url, &HttpTransport::new()).unwrap_err();
        assert_eq!("repo-sync-invalid-index", err.marker());
    }

    #[test]
    fn find_in_filters_by_interval() -> Result<()> {
        let mk = |version: &str, rev: u32| IndexEntry {
            id: PackageId::new(
                Name::try_new("zlib").unwrap(),
                Version::try_new(version).unwrap(),
                rev,
            ),
            libraries: vec![],
            dependencies: vec![],
            archive_url: Url::parse("https://example.com/a.tar.gz").unwrap(),
            integrity: None,
            repo: "main".to_owned(),
        };
        let catalog =
            Catalog::from_entries([mk("1.2.13", 1), mk("1.2.11", 1), mk("2.0.0", 1)]);

        let dep: DepExpr = "zlib^1.2.0".parse().unwrap();
        let found: Vec<String> = catalog
            .find_in(&Name::try_new("zlib").unwrap(), &dep.interval_set())
            .iter()
            .map(|e| e.id.to_string())
            .collect();
        assert_eq!(vec!["zlib@1.2.13~1", "zlib@1.2.11~1"], found);
        Ok(())
    }
}
