// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Package manifests: the canonical in-memory form of a project or package
//! description, and the loader that validates raw manifest text into it.
//!
//! The canonical on-disk form is `kiln.toml`; `kiln.json` is accepted with
//! the same schema. When both are present the TOML file wins.

pub mod spdx;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ident::{DepExpr, Name, PackageId, Version};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// Canonical manifest file name.
pub const MANIFEST_TOML: &str = "kiln.toml";
/// Accepted JSON manifest file name.
pub const MANIFEST_JSON: &str = "kiln.json";

/// When a `using` entry applies.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    Deserialize,
    Serialize,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UsageScope {
    /// The library itself (and everything built from it).
    #[default]
    Lib,
    /// Only executables built from the library.
    App,
    /// Only test executables built from the library.
    Test,
}

/// One declared API-level consumption relation.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UsingRef {
    pub lib: Name,
    pub scope: UsageScope,
}

/// A named compilation unit group within a package.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Library {
    name: Name,
    path: PathBuf,
    uses: Vec<UsingRef>,
    test_uses: Vec<UsingRef>,
    dependencies: Vec<DepExpr>,
    test_dependencies: Vec<DepExpr>,
}

impl Library {
    pub fn name(&self) -> &Name {
        &self.name
    }

    /// The library's source subtree, relative to the package root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn uses(&self) -> &[UsingRef] {
        &self.uses
    }

    pub fn test_uses(&self) -> &[UsingRef] {
        &self.test_uses
    }

    pub fn dependencies(&self) -> &[DepExpr] {
        &self.dependencies
    }

    pub fn test_dependencies(&self) -> &[DepExpr] {
        &self.test_dependencies
    }
}

/// A validated package manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Manifest {
    name: Name,
    version: Version,
    pkg_rev: u32,
    license: Option<String>,
    description: Option<String>,
    dependencies: Vec<DepExpr>,
    libraries: Vec<Library>,
}

impl Manifest {
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn pkg_rev(&self) -> u32 {
        self.pkg_rev
    }

    pub fn id(&self) -> PackageId {
        PackageId::new(self.name.clone(), self.version.clone(), self.pkg_rev)
    }

    pub fn license(&self) -> Option<&str> {
        self.license.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Package-level dependencies.
    pub fn dependencies(&self) -> &[DepExpr] {
        &self.dependencies
    }

    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }

    pub fn library(&self, name: &Name) -> Option<&Library> {
        self.libraries.iter().find(|lib| lib.name() == name)
    }

    /// All dependency expressions of the package: package-level plus
    /// per-library, with test dependencies included on request.
    pub fn all_dependencies(&self, include_test: bool) -> Vec<DepExpr> {
        let mut deps: Vec<DepExpr> = self.dependencies.clone();
        for lib in &self.libraries {
            deps.extend(lib.dependencies.iter().cloned());
            if include_test {
                deps.extend(lib.test_dependencies.iter().cloned());
            }
        }
        deps
    }

    /// Parses and validates a TOML manifest.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawManifest = toml::from_str(text).map_err(|e| {
            Error::with_source(ErrorKind::InvalidManifest, "malformed manifest", e)
        })?;
        raw.validate()
    }

    /// Parses and validates a JSON manifest.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(text).map_err(|e| {
            Error::with_source(ErrorKind::InvalidManifest, "malformed manifest", e)
        })?;
        raw.validate()
    }

    /// Loads a manifest file, recognizing the format by file name.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::from_io(e, format!("reading {}", path.display())))?;
        match path.file_name().and_then(|n| n.to_str()) {
            Some(MANIFEST_JSON) => Self::from_json_str(&text),
            _ => Self::from_toml_str(&text),
        }
    }

    /// Loads the manifest of a project or unpacked package directory.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let toml_path = dir.join(MANIFEST_TOML);
        let json_path = dir.join(MANIFEST_JSON);
        match (toml_path.exists(), json_path.exists()) {
            (true, true) => {
                tracing::warn!(
                    "both {} and {} exist in {}; using the TOML manifest",
                    MANIFEST_TOML,
                    MANIFEST_JSON,
                    dir.display()
                );
                Self::from_file(&toml_path)
            }
            (true, false) => Self::from_file(&toml_path),
            (false, true) => Self::from_file(&json_path),
            (false, false) => Err(Error::new(
                ErrorKind::InvalidManifest,
                format!("no {} or {} in {}", MANIFEST_TOML, MANIFEST_JSON, dir.display()),
            )),
        }
    }

    /// Formats the manifest back to its canonical TOML string.
    ///
    /// `parse(format(m)) == m` holds for every valid manifest.
    pub fn to_toml_string(&self) -> String {
        let raw = RawManifest::from(self);
        toml::to_string_pretty(&raw).expect("manifest serialization cannot fail")
    }
}

/// The raw serde-facing schema. Field spellings here are the on-disk
/// contract; everything stays a plain string so that validation can map
/// each failure to its precise error kind.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    name: String,
    version: String,
    #[serde(rename = "pkg-version", skip_serializing_if = "Option::is_none")]
    pkg_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    license: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    libraries: Vec<RawLibrary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lib: Option<RawLibrary>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawLibrary {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(default, rename = "using", skip_serializing_if = "Vec::is_empty")]
    using: Vec<RawUsing>,
    #[serde(default, rename = "test-using", skip_serializing_if = "Vec::is_empty")]
    test_using: Vec<RawUsing>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    dependencies: Vec<String>,
    #[serde(
        default,
        rename = "test-dependencies",
        skip_serializing_if = "Vec::is_empty"
    )]
    test_dependencies: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum RawUsing {
    Short(String),
    Long {
        lib: String,
        #[serde(rename = "for", default)]
        scope: UsageScope,
    },
}

impl RawManifest {
    fn validate(self) -> Result<Manifest> {
        let name = Name::try_new(&self.name)?;
        let version = Version::try_new(&self.version)?;

        let pkg_rev = match self.pkg_version {
            None => 1,
            Some(rev) if rev >= 1 && rev <= u32::MAX as i64 => rev as u32,
            Some(rev) => {
                return Err(Error::new(
                    ErrorKind::InvalidManifest,
                    format!("pkg-version must be a positive integer, got {}", rev),
                ))
            }
        };

        if let Some(license) = &self.license {
            spdx::validate(license)?;
        }

        let dependencies = parse_deps(&self.dependencies)?;

        let libraries = match (self.lib, self.libraries.is_empty()) {
            (Some(_), false) => {
                return Err(Error::new(
                    ErrorKind::InvalidManifest,
                    "`lib` and `libraries` cannot both be present",
                ))
            }
            (Some(raw), true) => {
                vec![raw.validate(&name, PathBuf::from("."))?]
            }
            (None, false) => {
                let mut libraries = Vec::with_capacity(self.libraries.len());
                for raw in self.libraries {
                    let lib_name = match &raw.name {
                        Some(n) => Name::try_new(n)?,
                        None => {
                            return Err(Error::new(
                                ErrorKind::InvalidManifest,
                                "library entries in `libraries` must be named",
                            ))
                        }
                    };
                    let default_path = PathBuf::from("libs").join(lib_name.as_str());
                    libraries.push(raw.validate(&name, default_path)?);
                }
                libraries
            }
            // A project with no library stanza has a single root library
            // rooted at the package directory.
            (None, true) => vec![Library {
                name: name.clone(),
                path: PathBuf::from("."),
                uses: Vec::new(),
                test_uses: Vec::new(),
                dependencies: Vec::new(),
                test_dependencies: Vec::new(),
            }],
        };

        let manifest = Manifest {
            name,
            version,
            pkg_rev,
            license: self.license,
            description: self.description,
            dependencies,
            libraries,
        };
        manifest.check_library_names()?;
        manifest.check_using_targets()?;
        manifest.check_library_cycles()?;
        Ok(manifest)
    }
}

impl RawLibrary {
    fn validate(self, pkg_name: &Name, default_path: PathBuf) -> Result<Library> {
        let name = match &self.name {
            Some(n) => Name::try_new(n)?,
            None => pkg_name.clone(),
        };
        Ok(Library {
            name,
            path: self.path.unwrap_or(default_path),
            uses: parse_using(&self.using)?,
            test_uses: parse_using(&self.test_using)?,
            dependencies: parse_deps(&self.dependencies)?,
            test_dependencies: parse_deps(&self.test_dependencies)?,
        })
    }
}

fn parse_deps(raw: &[String]) -> Result<Vec<DepExpr>> {
    raw.iter()
        .map(|s| s.parse::<DepExpr>().map_err(Error::from))
        .collect()
}

fn parse_using(raw: &[RawUsing]) -> Result<Vec<UsingRef>> {
    raw.iter()
        .map(|u| {
            let (lib, scope) = match u {
                RawUsing::Short(lib) => (lib.as_str(), UsageScope::Lib),
                RawUsing::Long { lib, scope } => (lib.as_str(), *scope),
            };
            Ok(UsingRef {
                lib: Name::try_new(lib)?,
                scope,
            })
        })
        .collect()
}

impl Manifest {
    fn check_library_names(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for lib in &self.libraries {
            if !seen.insert(lib.name()) {
                return Err(Error::new(
                    ErrorKind::InvalidManifest,
                    format!("duplicate library name {:?}", lib.name().as_str()),
                ));
            }
        }
        Ok(())
    }

    /// Every `using` target must resolve to a sibling library or to a
    /// library exported by a declared dependency.
    fn check_using_targets(&self) -> Result<()> {
        let siblings: BTreeSet<&Name> = self.libraries.iter().map(|l| l.name()).collect();

        for lib in &self.libraries {
            let mut exported: BTreeSet<Name> = BTreeSet::new();
            for dep in self.dependencies.iter().chain(lib.dependencies.iter()) {
                exported.extend(dep.effective_uses());
            }
            let mut test_exported = exported.clone();
            for dep in lib.test_dependencies.iter() {
                test_exported.extend(dep.effective_uses());
            }

            for (using, exported) in lib
                .uses
                .iter()
                .map(|u| (u, &exported))
                .chain(lib.test_uses.iter().map(|u| (u, &test_exported)))
            {
                if using.lib == *lib.name() {
                    return Err(Error::new(
                        ErrorKind::InvalidManifest,
                        format!("library {:?} uses itself", lib.name().as_str()),
                    ));
                }
                if !siblings.contains(&using.lib) && !exported.contains(&using.lib) {
                    return Err(Error::new(
                        ErrorKind::InvalidManifest,
                        format!(
                            "library {:?} uses {:?}, which is neither a sibling library \
                             nor provided by a declared dependency",
                            lib.name().as_str(),
                            using.lib.as_str()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Rejects cycles in the sibling `uses` graph up front, before any build
    /// node exists. Libraries are mapped to integer indices and walked
    /// iteratively (the graph may be arbitrarily deep).
    fn check_library_cycles(&self) -> Result<()> {
        let index_of: BTreeMap<&Name, usize> = self
            .libraries
            .iter()
            .enumerate()
            .map(|(i, lib)| (lib.name(), i))
            .collect();
        // Only `uses` edges participate: a test-only usage cannot cycle the
        // archive graph because archives never depend on test executables.
        let adjacency: Vec<Vec<usize>> = self
            .libraries
            .iter()
            .map(|lib| {
                lib.uses
                    .iter()
                    .filter_map(|u| index_of.get(&u.lib).copied())
                    .collect()
            })
            .collect();

        #[derive(Copy, Clone, Eq, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut colors = vec![Color::White; adjacency.len()];

        for start in 0..adjacency.len() {
            if colors[start] != Color::White {
                continue;
            }
            // Stack of (node, next-edge-index); the gray prefix of the stack
            // is the active path.
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            colors[start] = Color::Gray;
            while let Some((node, edge)) = stack.last_mut() {
                if let Some(&next) = adjacency[*node].get(*edge) {
                    *edge += 1;
                    match colors[next] {
                        Color::White => {
                            colors[next] = Color::Gray;
                            stack.push((next, 0));
                        }
                        Color::Gray => {
                            let mut path: Vec<&str> = stack
                                .iter()
                                .skip_while(|(n, _)| *n != next)
                                .map(|(n, _)| self.libraries[*n].name().as_str())
                                .collect();
                            path.push(self.libraries[next].name().as_str());
                            let mut cycle = String::new();
                            for (i, name) in path.iter().enumerate() {
                                if i > 0 {
                                    cycle.push_str(" -> ");
                                }
                                let _ = write!(cycle, "{}", name);
                            }
                            return Err(Error::new(
                                ErrorKind::LibraryCycle,
                                format!("library uses cycle: {}", cycle),
                            ));
                        }
                        Color::Black => {}
                    }
                } else {
                    colors[*node] = Color::Black;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

impl From<&Manifest> for RawManifest {
    fn from(m: &Manifest) -> Self {
        RawManifest {
            name: m.name.to_string(),
            version: m.version.to_string(),
            pkg_version: if m.pkg_rev == 1 {
                None
            } else {
                Some(m.pkg_rev as i64)
            },
            license: m.license.clone(),
            description: m.description.clone(),
            dependencies: m.dependencies.iter().map(|d| d.to_string()).collect(),
            libraries: m.libraries.iter().map(RawLibrary::from).collect(),
            lib: None,
        }
    }
}

impl From<&Library> for RawLibrary {
    fn from(lib: &Library) -> Self {
        let render_using = |uses: &[UsingRef]| {
            uses.iter()
                .map(|u| match u.scope {
                    UsageScope::Lib => RawUsing::Short(u.lib.to_string()),
                    scope => RawUsing::Long {
                        lib: u.lib.to_string(),
                        scope,
                    },
                })
                .collect()
        };
        RawLibrary {
            name: Some(lib.name.to_string()),
            path: Some(lib.path.clone()),
            using: render_using(&lib.uses),
            test_using: render_using(&lib.test_uses),
            dependencies: lib.dependencies.iter().map(|d| d.to_string()).collect(),
            test_dependencies: lib
                .test_dependencies
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}
