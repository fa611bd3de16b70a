// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Turning a solver result into a concrete workspace: source trees ensured
//! in the store, and a usage map the build graph can consume.
//!
//! The usage map is toolchain-independent: per selected library it records
//! the library's own source layout, its direct uses, and the ordered
//! include paths and artifact references of its transitive closure.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use ident::{Name, PackageId};
use rayon::prelude::*;

use crate::error::{Error, ErrorKind, Result};
use crate::manifest::{Manifest, UsageScope};
use crate::solver::Solution;
use crate::store::{PackageStore, DOWNLOAD_POOL_SIZE};
use crate::transport::Transport;

/// Globally unique identity of a selected library.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct LibraryId {
    pub package: Name,
    pub library: Name,
}

impl LibraryId {
    pub fn new(package: Name, library: Name) -> Self {
        Self { package, library }
    }

    /// The filesystem-safe form used for output paths: `package/library`.
    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(self.package.as_str()).join(self.library.as_str())
    }
}

impl Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.package, self.library)
    }
}

/// One library that will take part in the build.
#[derive(Clone, Debug)]
pub struct PlannedLibrary {
    pub id: LibraryId,
    pub package_id: PackageId,
    /// Absolute root of the library's source subtree.
    pub root: PathBuf,
    /// Whether the library belongs to the project being built (as opposed
    /// to a fetched dependency). Only project libraries get test nodes.
    pub is_project: bool,
    /// Include directories exported to consumers.
    pub public_includes: Vec<PathBuf>,
    /// Include directories visible to the library's own sources.
    pub private_includes: Vec<PathBuf>,
    /// Direct uses (library scope).
    pub uses: Vec<LibraryId>,
    /// Additional uses applying only to executables of this library.
    pub app_uses: Vec<LibraryId>,
    /// Additional uses applying only to tests of this library.
    pub test_uses: Vec<LibraryId>,
}

/// What a consumer of a library needs: ordered include paths and the
/// archives to link, covering the transitive `uses` closure.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Usage {
    pub include_dirs: Vec<PathBuf>,
    /// Libraries whose archives must be linked, dependency-first order.
    pub link_libraries: Vec<LibraryId>,
}

/// The materialized plan.
#[derive(Debug)]
pub struct BuildPlan {
    pub libraries: BTreeMap<LibraryId, PlannedLibrary>,
}

impl BuildPlan {
    pub fn library(&self, id: &LibraryId) -> Option<&PlannedLibrary> {
        self.libraries.get(id)
    }

    /// The usage map entry for one library: everything it needs beyond its
    /// own sources, derived from the transitive closure of `uses` plus the
    /// extra scope-specific uses requested.
    pub fn usage(&self, id: &LibraryId, extra: &[LibraryId]) -> Result<Usage> {
        let mut usage = Usage::default();
        let mut visited = BTreeSet::new();
        let start = self.libraries.get(id).ok_or_else(|| {
            Error::new(
                ErrorKind::IoFailure,
                format!("library {} is not part of the plan", id),
            )
        })?;

        let mut queue: Vec<&LibraryId> = start.uses.iter().chain(extra.iter()).collect();
        while let Some(next) = queue.pop() {
            if !visited.insert(next.clone()) {
                continue;
            }
            let library = self.libraries.get(next).ok_or_else(|| {
                Error::new(
                    ErrorKind::IoFailure,
                    format!("library {} (used by {}) is not part of the plan", next, id),
                )
            })?;
            for dir in &library.public_includes {
                if !usage.include_dirs.contains(dir) {
                    usage.include_dirs.push(dir.clone());
                }
            }
            usage.link_libraries.push(library.id.clone());
            queue.extend(library.uses.iter());
        }

        // Dependency-first link order: dependents precede their
        // dependencies on the link line, so reverse the discovery order
        // into a stable topological ordering.
        usage.link_libraries = self.topo_sort(usage.link_libraries)?;
        Ok(usage)
    }

    /// Orders `libraries` so that every library precedes the libraries it
    /// uses (classic static-link order).
    fn topo_sort(&self, libraries: Vec<LibraryId>) -> Result<Vec<LibraryId>> {
        let set: BTreeSet<LibraryId> = libraries.iter().cloned().collect();
        let mut ordered = Vec::with_capacity(libraries.len());
        let mut done = BTreeSet::new();
        // The `uses` graph is acyclic (validated at load), so a simple
        // DFS postorder suffices.
        fn visit(
            plan: &BuildPlan,
            id: &LibraryId,
            set: &BTreeSet<LibraryId>,
            done: &mut BTreeSet<LibraryId>,
            ordered: &mut Vec<LibraryId>,
        ) {
            if !done.insert(id.clone()) {
                return;
            }
            if let Some(library) = plan.libraries.get(id) {
                for used in &library.uses {
                    if set.contains(used) {
                        visit(plan, used, set, done, ordered);
                    }
                }
            }
            ordered.push(id.clone());
        }
        let mut sorted: Vec<&LibraryId> = set.iter().collect();
        sorted.sort();
        for id in sorted {
            visit(self, id, &set, &mut done, &mut ordered);
        }
        // Postorder puts dependencies first; the link line wants them last.
        ordered.reverse();
        Ok(ordered)
    }
}

/// Materializes a plan: ensures every selected package's sources are in the
/// store (downloads run on a bounded pool), loads their manifests, and
/// builds the usage map together with the project's own libraries.
pub fn materialize(
    project_dir: &Path,
    project: &Manifest,
    solution: &Solution,
    store: &PackageStore,
    transport: &dyn Transport,
) -> Result<BuildPlan> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(DOWNLOAD_POOL_SIZE)
        .build()
        .map_err(|e| Error::with_source(ErrorKind::IoFailure, "starting the download pool", e))?;

    let selections: Vec<_> = solution.values().collect();
    let fetched: Vec<(PackageId, PathBuf)> = pool.install(|| {
        selections
            .par_iter()
            .map(|selection| {
                let dir = store.ensure(&selection.entry, transport)?;
                Ok((selection.id.clone(), dir))
            })
            .collect::<Result<_>>()
    })?;

    let mut libraries = BTreeMap::new();

    // Fetched packages first, so project libraries may refer to them.
    let mut manifests: BTreeMap<Name, (Manifest, PathBuf)> = BTreeMap::new();
    for (id, dir) in fetched {
        let manifest = Manifest::load_dir(&dir)?;
        if manifest.id() != id {
            return Err(Error::new(
                ErrorKind::CorruptedCacheEntry,
                format!("store entry {} contains {}", id, manifest.id()),
            ));
        }
        manifests.insert(id.name().clone(), (manifest, dir));
    }

    for selection in solution.values() {
        let (manifest, dir) = manifests
            .get(selection.id.name())
            .expect("every selection was fetched");
        for lib_name in &selection.enabled_libs {
            let planned = plan_library(
                manifest,
                dir,
                lib_name,
                false,
                &manifests,
                Some(&selection.enabled_libs),
            )?;
            libraries.insert(planned.id.clone(), planned);
        }
    }

    for library in project.libraries() {
        let planned = plan_library(
            project,
            project_dir,
            library.name(),
            true,
            &manifests,
            None,
        )?;
        libraries.insert(planned.id.clone(), planned);
    }

    Ok(BuildPlan { libraries })
}

/// Builds the [`PlannedLibrary`] for one library of one manifest.
fn plan_library(
    manifest: &Manifest,
    package_dir: &Path,
    lib_name: &Name,
    is_project: bool,
    dep_manifests: &BTreeMap<Name, (Manifest, PathBuf)>,
    enabled: Option<&BTreeSet<Name>>,
) -> Result<PlannedLibrary> {
    let library = manifest.library(lib_name).ok_or_else(|| {
        Error::new(
            ErrorKind::CorruptedCacheEntry,
            format!("package {} has no library {}", manifest.id(), lib_name),
        )
    })?;

    let root = package_dir.join(library.path());
    let include_dir = root.join("include");
    let src_dir = root.join("src");
    let public_includes = if include_dir.is_dir() {
        vec![include_dir.clone()]
    } else if src_dir.is_dir() {
        vec![src_dir.clone()]
    } else {
        vec![root.clone()]
    };
    let mut private_includes = public_includes.clone();
    if src_dir.is_dir() && !private_includes.contains(&src_dir) {
        private_includes.push(src_dir);
    }

    let siblings: BTreeSet<&Name> = manifest.libraries().iter().map(|l| l.name()).collect();
    let resolve = |target: &Name| -> Result<LibraryId> {
        if siblings.contains(target) && target != lib_name {
            // A sibling must actually be built for the reference to work.
            if let Some(enabled) = enabled {
                if !enabled.contains(target) {
                    return Err(Error::new(
                        ErrorKind::CorruptedCacheEntry,
                        format!(
                            "library {} of {} uses sibling {} which is not enabled",
                            lib_name,
                            manifest.id(),
                            target
                        ),
                    ));
                }
            }
            return Ok(LibraryId::new(manifest.name().clone(), target.clone()));
        }
        // Otherwise the target comes from a dependency that exports it.
        for dep in manifest
            .dependencies()
            .iter()
            .chain(library.dependencies().iter())
            .chain(library.test_dependencies().iter())
        {
            if dep.effective_uses().contains(target) {
                return Ok(LibraryId::new(dep.name().clone(), target.clone()));
            }
        }
        // Fall back to any planned package providing a library of that
        // name (index entries do not carry per-library dependency edges).
        for (pkg_name, (dep_manifest, _)) in dep_manifests {
            if dep_manifest.library(target).is_some() {
                return Ok(LibraryId::new(pkg_name.clone(), target.clone()));
            }
        }
        Err(Error::new(
            ErrorKind::InvalidManifest,
            format!(
                "library {} of {} uses {}, which nothing provides",
                lib_name,
                manifest.id(),
                target
            ),
        ))
    };

    let mut uses = Vec::new();
    let mut app_uses = Vec::new();
    let mut test_uses = Vec::new();
    for using in library.uses() {
        let id = resolve(&using.lib)?;
        match using.scope {
            UsageScope::Lib => uses.push(id),
            UsageScope::App => app_uses.push(id),
            UsageScope::Test => test_uses.push(id),
        }
    }
    for using in library.test_uses() {
        test_uses.push(resolve(&using.lib)?);
    }

    Ok(PlannedLibrary {
        id: LibraryId::new(manifest.name().clone(), lib_name.clone()),
        package_id: manifest.id(),
        root,
        is_project,
        public_includes,
        private_includes,
        uses,
        app_uses,
        test_uses,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lib_id(package: &str, library: &str) -> LibraryId {
        LibraryId::new(
            Name::try_new(package).unwrap(),
            Name::try_new(library).unwrap(),
        )
    }

    fn planned(package: &str, library: &str, uses: &[(&str, &str)]) -> PlannedLibrary {
        PlannedLibrary {
            id: lib_id(package, library),
            package_id: format!("{}@1.0.0~1", package).parse().unwrap(),
            root: PathBuf::from(format!("/src/{}/{}", package, library)),
            is_project: false,
            public_includes: vec![PathBuf::from(format!(
                "/src/{}/{}/include",
                package, library
            ))],
            private_includes: vec![],
            uses: uses.iter().map(|(p, l)| lib_id(p, l)).collect(),
            app_uses: vec![],
            test_uses: vec![],
        }
    }

    #[test]
    fn usage_collects_transitive_includes_and_links() -> Result<()> {
        let mut libraries = BTreeMap::new();
        for lib in [
            planned("app", "app", &[("fmt", "fmt")]),
            planned("fmt", "fmt", &[("span", "span")]),
            planned("span", "span", &[]),
        ] {
            libraries.insert(lib.id.clone(), lib);
        }
        let plan = BuildPlan { libraries };

        let usage = plan.usage(&lib_id("app", "app"), &[])?;
        assert_eq!(
            vec![
                PathBuf::from("/src/fmt/fmt/include"),
                PathBuf::from("/src/span/span/include"),
            ],
            usage.include_dirs
        );
        // Dependents precede dependencies on the link line.
        assert_eq!(
            vec![lib_id("fmt", "fmt"), lib_id("span", "span")],
            usage.link_libraries
        );
        Ok(())
    }

    #[test]
    fn usage_of_a_leaf_is_empty() -> Result<()> {
        let mut libraries = BTreeMap::new();
        let leaf = planned("span", "span", &[]);
        libraries.insert(leaf.id.clone(), leaf);
        let plan = BuildPlan { libraries };

        assert_eq!(Usage::default(), plan.usage(&lib_id("span", "span"), &[])?);
        Ok(())
    }

    #[test]
    fn usage_rejects_unplanned_references() {
        let mut libraries = BTreeMap::new();
        let broken = planned("app", "app", &[("ghost", "ghost")]);
        libraries.insert(broken.id.clone(), broken);
        let plan = BuildPlan { libraries };

        assert!(plan.usage(&lib_id("app", "app"), &[]).is_err());
    }
}
