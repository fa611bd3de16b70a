// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::ArchiveBuilder;

/// One package to place into a [`ScratchRepo`].
///
/// Everything is passed explicitly (rather than derived from the manifest)
/// so this crate stays independent of the manifest loader it is used to
/// test.
pub struct RepoPackage {
    /// `name@version~rev`.
    pub id: String,
    /// Full `kiln.toml` content for the archive.
    pub manifest: String,
    /// `(library name, uses)` pairs for the index entry.
    pub libraries: Vec<(String, Vec<String>)>,
    /// Dependency expressions for the index entry.
    pub dependencies: Vec<String>,
    /// Extra `(path, content)` files for the archive.
    pub files: Vec<(String, String)>,
}

impl RepoPackage {
    /// A package whose manifest is generated from the index-entry data:
    /// single root library named after the package, the given dependencies.
    pub fn simple(id: &str, dependencies: &[&str]) -> Self {
        let (name, version, rev) = split_id(id).unwrap();
        let mut manifest = format!(
            "name = \"{}\"\nversion = \"{}\"\npkg-version = {}\n",
            name, version, rev
        );
        if !dependencies.is_empty() {
            let list: Vec<String> = dependencies.iter().map(|d| format!("\"{}\"", d)).collect();
            manifest.push_str(&format!("dependencies = [{}]\n", list.join(", ")));
        }
        Self {
            id: id.to_owned(),
            manifest,
            libraries: vec![(name, vec![])],
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            files: vec![],
        }
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_owned(), content.to_owned()));
        self
    }
}

fn split_id(id: &str) -> Result<(String, String, u32)> {
    let Some((name, rest)) = id.split_once('@') else {
        bail!("bad package id {:?}", id);
    };
    let Some((version, rev)) = rest.rsplit_once('~') else {
        bail!("bad package id {:?}", id);
    };
    Ok((name.to_owned(), version.to_owned(), rev.parse()?))
}

/// A package repository on local disk, reachable via its `file://` URL:
/// a gzip JSON index plus the archives it references.
pub struct ScratchRepo {
    root: PathBuf,
    name: String,
    packages: Vec<serde_json::Value>,
}

impl ScratchRepo {
    pub fn create(root: &Path, name: &str) -> Result<Self> {
        std::fs::create_dir_all(root)?;
        let mut repo = Self {
            root: root.to_path_buf(),
            name: name.to_owned(),
            packages: Vec::new(),
        };
        repo.write_index()?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The repository URL (`file://.../`).
    pub fn url(&self) -> String {
        format!("file://{}/", self.root.display())
    }

    /// Adds a package: writes its archive and republishes the index.
    pub fn add(&mut self, package: RepoPackage) -> Result<()> {
        let (name, version, rev) = split_id(&package.id)?;

        let mut builder = ArchiveBuilder::new();
        builder.file("kiln.toml", &package.manifest);
        for (path, content) in &package.files {
            builder.file(path, content);
        }
        let rel_path = format!("pkg/{}.tar.gz", package.id);
        let digest = builder.write_tar_gz(&self.root.join(&rel_path))?;

        self.packages.push(serde_json::json!({
            "name": name,
            "version": version,
            "pkg-version": rev,
            "libraries": package
                .libraries
                .iter()
                .map(|(name, uses)| serde_json::json!({"name": name, "uses": uses}))
                .collect::<Vec<_>>(),
            "dependencies": package.dependencies,
            "archive-url": rel_path,
            "integrity": digest,
        }));
        self.write_index()
    }

    fn write_index(&mut self) -> Result<()> {
        let document = serde_json::json!({
            "schema-version": 1,
            "name": self.name,
            "packages": self.packages,
        });
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&serde_json::to_vec(&document)?)?;
        let data = encoder.finish()?;
        std::fs::write(self.root.join("index.json.gz"), data)
            .with_context(|| format!("writing index under {}", self.root.display()))?;
        Ok(())
    }
}
