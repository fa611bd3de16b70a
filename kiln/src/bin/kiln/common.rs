// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Plumbing shared by the subcommands: locating the cache, loading the
//! project, registering repositories, and running the solver.

use std::path::{Path, PathBuf};

use clap::Args;
use ident::DepExpr;
use kiln::index::RepositorySet;
use kiln::manifest::Manifest;
use kiln::solver::{self, Pin, Solution};
use kiln::transport::HttpTransport;
use kiln::{Error, ErrorKind};
use url::Url;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "KILN_CACHE_DIR";

/// Options every dependency-aware subcommand takes.
#[derive(Args, Debug)]
pub struct ProjectArgs {
    /// Project directory.
    #[arg(short = 'p', long, value_name = "DIR", default_value = ".")]
    pub project: PathBuf,

    /// Repository URL; may be given multiple times, earlier repositories
    /// take precedence.
    #[arg(short = 'r', long = "repo", value_name = "URL")]
    pub repos: Vec<String>,

    /// Cache directory (default: $KILN_CACHE_DIR or ~/.cache/kiln).
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Pin a package to an exact version, as name@version[~rev].
    #[arg(long = "pin", value_name = "SPEC")]
    pub pins: Vec<String>,
}

impl ProjectArgs {
    pub fn cache_root(&self) -> kiln::Result<PathBuf> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(dir));
        }
        let home = std::env::var_os("HOME").ok_or_else(|| {
            Error::new(
                ErrorKind::IoFailure,
                "cannot locate a cache directory; set --cache-dir or KILN_CACHE_DIR",
            )
        })?;
        Ok(Path::new(&home).join(".cache").join("kiln"))
    }

    pub fn manifest(&self) -> kiln::Result<Manifest> {
        Manifest::load_dir(&self.project)
    }

    /// Opens the repository set and registers the `--repo` URLs, in flag
    /// order, ahead of previously-registered repositories.
    pub fn repositories(&self, transport: &HttpTransport) -> kiln::Result<RepositorySet> {
        let mut repos = RepositorySet::open(&self.cache_root()?)?;
        for raw in &self.repos {
            let url = parse_repo_url(raw)?;
            repos.add(&url, transport)?;
        }
        Ok(repos)
    }

    pub fn parsed_pins(&self) -> kiln::Result<Vec<Pin>> {
        self.pins
            .iter()
            .map(|raw| {
                let bad = || {
                    Error::new(
                        ErrorKind::InvalidDepExpr,
                        format!("unusable pin {:?}; expected name@version[~rev]", raw),
                    )
                };
                let (name, rest) = raw.split_once('@').ok_or_else(bad)?;
                let (version, rev) = match rest.rsplit_once('~') {
                    Some((version, rev)) => {
                        (version, Some(rev.parse::<u32>().map_err(|_| bad())?))
                    }
                    None => (rest, None),
                };
                Ok(Pin {
                    name: name.parse().map_err(Error::from)?,
                    version: version.parse().map_err(Error::from)?,
                    rev,
                })
            })
            .collect()
    }

    /// Solves the project's requirements against the registered catalog.
    pub fn solve(
        &self,
        manifest: &Manifest,
        repos: &RepositorySet,
    ) -> kiln::Result<Solution> {
        let roots: Vec<DepExpr> = manifest.all_dependencies(true);
        solver::solve(&roots, &repos.catalog(), &self.parsed_pins()?)
    }
}

/// Accepts plain paths as well as URLs for `--repo`.
pub fn parse_repo_url(raw: &str) -> kiln::Result<Url> {
    if let Ok(url) = Url::parse(raw) {
        return Ok(url);
    }
    let path = Path::new(raw)
        .canonicalize()
        .map_err(|e| Error::from_io(e, format!("resolving repository path {:?}", raw)))?;
    Url::from_directory_path(&path).map_err(|_| {
        Error::new(
            ErrorKind::RepoSyncMissing,
            format!("{:?} is neither a URL nor a repository directory", raw),
        )
    })
}
