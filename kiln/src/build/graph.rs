// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Constructing the DAG of compile, archive, link and test-run nodes from a
//! materialized plan.
//!
//! Output naming is injective over `(package, library, source-relative
//! path)`: objects land under `<build-root>/<package>/<library>/`, archives
//! at `<build-root>/<package>/<library>.<ext>`, executables at the build
//! root, test executables under `test/`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, ErrorKind, Result};
use crate::plan::{BuildPlan, LibraryId};
use crate::toolchain::{CompileIntent, Language, Toolchain};

use super::discover::{discover, SourceFile, SourceKind};

pub type NodeId = usize;

/// The work a node performs. Command lines are shaped by the toolchain
/// adapter at execution time; the graph stores only intents.
#[derive(Clone, Debug)]
pub enum NodeAction {
    Compile {
        intent: CompileIntent,
        /// An isolation check: the object is a throwaway and failures
        /// report as `syntax-check-failed`.
        check_only: bool,
    },
    Archive {
        objects: Vec<PathBuf>,
        out: PathBuf,
    },
    Link {
        /// Objects first, then archives in link order.
        inputs: Vec<PathBuf>,
        out: PathBuf,
    },
    TestRun {
        exe: PathBuf,
    },
}

#[derive(Clone, Debug)]
pub struct BuildNode {
    pub id: NodeId,
    /// The node's logical identity, e.g. `compile acme/widgets src/foo.cpp`.
    pub label: String,
    pub library: LibraryId,
    pub action: NodeAction,
    /// Nodes that must complete before this one is ready.
    pub deps: Vec<NodeId>,
    pub outputs: Vec<PathBuf>,
}

pub struct BuildGraph {
    pub nodes: Vec<BuildNode>,
    /// Reverse edges: `dependents[n]` are the nodes waiting on `n`.
    pub dependents: Vec<Vec<NodeId>>,
}

static INCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#).unwrap());

impl BuildGraph {
    /// Builds the node graph for the whole plan.
    ///
    /// Dependency packages contribute compile and archive nodes only;
    /// executables, tests and the header checks belong to the project's own
    /// libraries.
    pub fn build(
        plan: &BuildPlan,
        toolchain: &Toolchain,
        build_root: &Path,
        run_tests: bool,
    ) -> Result<Self> {
        let mut builder = GraphBuilder {
            plan,
            toolchain,
            build_root: build_root.to_path_buf(),
            nodes: Vec::new(),
        };

        // First pass: compile + archive nodes for every planned library.
        let mut archives: BTreeMap<LibraryId, (NodeId, PathBuf)> = BTreeMap::new();
        let mut discovered: BTreeMap<LibraryId, Vec<SourceFile>> = BTreeMap::new();
        for (id, library) in &plan.libraries {
            let sources = discover(library)?;
            if library.is_project {
                builder.enforce_sibling_using(library, &sources)?;
            }

            let mut objects = Vec::new();
            let mut object_nodes = Vec::new();
            for source in sources.iter().filter(|s| s.kind == SourceKind::LibSource) {
                let (node, object) = builder.compile_node(library, source, false)?;
                objects.push(object);
                object_nodes.push(node);
            }

            if library.is_project {
                for header in sources
                    .iter()
                    .filter(|s| s.kind == SourceKind::PublicHeader)
                {
                    let node = builder.isolation_node(library, header)?;
                    object_nodes.push(node);
                }
            }

            if !objects.is_empty() {
                let out = builder
                    .build_root
                    .join(id.package.as_str())
                    .join(format!("{}.{}", id.library, toolchain.archive_ext()));
                let node = builder.push(BuildNode {
                    id: 0,
                    label: format!("archive {}", id),
                    library: id.clone(),
                    action: NodeAction::Archive {
                        objects: objects.clone(),
                        out: out.clone(),
                    },
                    deps: object_nodes,
                    outputs: vec![out.clone()],
                });
                archives.insert(id.clone(), (node, out));
            }

            discovered.insert(id.clone(), sources);
        }

        // Second pass: executables and tests for project libraries.
        for (id, library) in plan.libraries.iter().filter(|(_, l)| l.is_project) {
            let sources = &discovered[id];

            for source in sources.iter().filter(|s| s.kind == SourceKind::AppSource) {
                let exe = builder.exe_path(&source.executable_name(), false);
                builder.link_executable(library, source, &exe, &library.app_uses, &archives)?;
            }

            for source in sources.iter().filter(|s| s.kind == SourceKind::TestSource) {
                let exe = builder.exe_path(&source.executable_name(), true);
                let link = builder.link_executable(
                    library,
                    source,
                    &exe,
                    &test_extras(library),
                    &archives,
                )?;
                if run_tests {
                    builder.push(BuildNode {
                        id: 0,
                        label: format!("test {}", source.executable_name()),
                        library: id.clone(),
                        action: NodeAction::TestRun { exe: exe.clone() },
                        deps: vec![link],
                        outputs: vec![],
                    });
                }
            }
        }

        let nodes = builder.nodes;
        let mut dependents = vec![Vec::new(); nodes.len()];
        for node in &nodes {
            for dep in &node.deps {
                dependents[*dep].push(node.id);
            }
        }
        Ok(Self { nodes, dependents })
    }

    /// Per-node priority: the number of transitive downstream nodes, so
    /// critical-path work dispatches first.
    pub fn priorities(&self) -> Vec<usize> {
        let mut priorities = vec![0usize; self.nodes.len()];
        for start in 0..self.nodes.len() {
            let mut seen = vec![false; self.nodes.len()];
            let mut queue = vec![start];
            let mut count = 0usize;
            while let Some(node) = queue.pop() {
                for &next in &self.dependents[node] {
                    if !seen[next] {
                        seen[next] = true;
                        count += 1;
                        queue.push(next);
                    }
                }
            }
            priorities[start] = count;
        }
        priorities
    }

    /// The standard compilation database for every real compile node.
    pub fn compile_commands(&self, toolchain: &Toolchain, directory: &Path) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = self
            .nodes
            .iter()
            .filter_map(|node| match &node.action {
                NodeAction::Compile {
                    intent,
                    check_only: false,
                } => Some(serde_json::json!({
                    "directory": directory.display().to_string(),
                    "file": intent.source.display().to_string(),
                    "output": intent.object.display().to_string(),
                    "arguments": toolchain.compile_command(intent),
                })),
                _ => None,
            })
            .collect();
        serde_json::Value::Array(entries)
    }
}

/// The extra uses that apply when building a library's tests.
fn test_extras(library: &crate::plan::PlannedLibrary) -> Vec<LibraryId> {
    library.test_uses.clone()
}

struct GraphBuilder<'a> {
    plan: &'a BuildPlan,
    toolchain: &'a Toolchain,
    build_root: PathBuf,
    nodes: Vec<BuildNode>,
}

impl GraphBuilder<'_> {
    fn push(&mut self, mut node: BuildNode) -> NodeId {
        let id = self.nodes.len();
        node.id = id;
        self.nodes.push(node);
        id
    }

    fn object_dir(&self, id: &LibraryId) -> PathBuf {
        self.build_root.join(id.as_path())
    }

    fn exe_path(&self, name: &str, test: bool) -> PathBuf {
        let mut file = name.to_owned();
        if !self.toolchain.exe_ext().is_empty() {
            file.push('.');
            file.push_str(self.toolchain.exe_ext());
        }
        if test {
            self.build_root.join("test").join(file)
        } else {
            self.build_root.join(file)
        }
    }

    /// Creates the compile node for one source file. Returns the node and
    /// its object path.
    fn compile_node(
        &mut self,
        library: &crate::plan::PlannedLibrary,
        source: &SourceFile,
        for_test: bool,
    ) -> Result<(NodeId, PathBuf)> {
        let mut rel_object = source.rel.as_os_str().to_owned();
        rel_object.push(format!(".{}", self.toolchain.object_ext()));
        let object = self.object_dir(&library.id).join(PathBuf::from(rel_object));
        let mut deps_file = object.clone().into_os_string();
        deps_file.push(".d");

        let mut include_dirs = library.private_includes.clone();
        let extra = if for_test {
            test_extras(library)
        } else if source.kind == SourceKind::AppSource {
            library.app_uses.clone()
        } else {
            Vec::new()
        };
        let usage = self.plan.usage(&library.id, &extra)?;
        for dir in usage.include_dirs {
            if !include_dirs.contains(&dir) {
                include_dirs.push(dir);
            }
        }

        let intent = CompileIntent {
            source: source.path.clone(),
            object: object.clone(),
            language: source.language,
            include_dirs,
            deps_file: Some(PathBuf::from(deps_file)),
        };
        let node = self.push(BuildNode {
            id: 0,
            label: format!("compile {} {}", library.id, source.rel.display()),
            library: library.id.clone(),
            action: NodeAction::Compile {
                intent,
                check_only: false,
            },
            deps: vec![],
            outputs: vec![object.clone()],
        });
        Ok((node, object))
    }

    /// Creates the header-isolation node for one public header: a
    /// synthesized translation unit including only that header, compiled
    /// with the library's declared include set (undeclared sibling include
    /// directories are absent, so a silent dependency fails to compile).
    fn isolation_node(
        &mut self,
        library: &crate::plan::PlannedLibrary,
        header: &SourceFile,
    ) -> Result<NodeId> {
        let check_dir = self.object_dir(&library.id).join("__isolation");
        let mut tu_rel = header.rel.as_os_str().to_owned();
        tu_rel.push(match header.language {
            Language::C => ".check.c",
            Language::Cxx => ".check.cpp",
        });
        let tu_path = check_dir.join(PathBuf::from(tu_rel));
        if let Some(parent) = tu_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::from_io(e, format!("creating {}", parent.display())))?;
        }
        let tu_text = format!("#include \"{}\"\n", header.path.display());
        fileutil::atomic_write(&tu_path, tu_text.as_bytes()).map_err(|e| {
            Error::with_source(
                ErrorKind::IoFailure,
                format!("writing {}", tu_path.display()),
                e,
            )
        })?;

        let mut object = tu_path.clone().into_os_string();
        object.push(format!(".{}", self.toolchain.object_ext()));
        let object = PathBuf::from(object);
        let mut deps_file = object.clone().into_os_string();
        deps_file.push(".d");

        let mut include_dirs = library.private_includes.clone();
        for dir in self.plan.usage(&library.id, &[])?.include_dirs {
            if !include_dirs.contains(&dir) {
                include_dirs.push(dir);
            }
        }

        let intent = CompileIntent {
            source: tu_path,
            object: object.clone(),
            language: header.language,
            include_dirs,
            deps_file: Some(PathBuf::from(deps_file)),
        };
        Ok(self.push(BuildNode {
            id: 0,
            label: format!("check {} {}", library.id, header.rel.display()),
            library: library.id.clone(),
            action: NodeAction::Compile {
                intent,
                check_only: true,
            },
            deps: vec![],
            outputs: vec![object],
        }))
    }

    /// Creates the compile + link pair for an app or test source.
    fn link_executable(
        &mut self,
        library: &crate::plan::PlannedLibrary,
        source: &SourceFile,
        exe: &Path,
        extra_uses: &[LibraryId],
        archives: &BTreeMap<LibraryId, (NodeId, PathBuf)>,
    ) -> Result<NodeId> {
        let for_test = source.kind == SourceKind::TestSource;
        let (object_node, object) = self.compile_node(library, source, for_test)?;

        let mut inputs = vec![object];
        let mut deps = vec![object_node];
        if let Some((node, path)) = archives.get(&library.id) {
            inputs.push(path.clone());
            deps.push(*node);
        }
        let usage = self.plan.usage(&library.id, extra_uses)?;
        for used in &usage.link_libraries {
            // Header-only libraries have no archive to link.
            if let Some((node, path)) = archives.get(used) {
                inputs.push(path.clone());
                deps.push(*node);
            }
        }

        Ok(self.push(BuildNode {
            id: 0,
            label: format!("link {}", exe.display()),
            library: library.id.clone(),
            action: NodeAction::Link {
                inputs,
                out: exe.to_path_buf(),
            },
            deps,
            outputs: vec![exe.to_path_buf()],
        }))
    }

    /// Enforces the sibling-`using` rule: an `#include` resolving into
    /// another planned library's public headers requires that library in
    /// the includer's usage closure.
    fn enforce_sibling_using(
        &self,
        library: &crate::plan::PlannedLibrary,
        sources: &[SourceFile],
    ) -> Result<()> {
        let allowed = self.usage_closure(library, &library.app_uses)?;
        let test_allowed = self.usage_closure(library, &test_extras(library))?;

        for source in sources {
            let text = match std::fs::read_to_string(&source.path) {
                Ok(text) => text,
                // Non-UTF8 sources get no static include scan; the compiler
                // still sees them.
                Err(_) => continue,
            };
            let allowed = if source.kind == SourceKind::TestSource {
                &test_allowed
            } else {
                &allowed
            };
            for capture in INCLUDE_RE.captures_iter(&text) {
                let include = &capture[1];
                // Resolving within the library's own directories is fine.
                if library
                    .private_includes
                    .iter()
                    .chain(library.public_includes.iter())
                    .any(|dir| dir.join(include).is_file())
                {
                    continue;
                }
                if let Some(owner) = self.owner_of_include(include, &library.id) {
                    if !allowed.contains(&owner) {
                        return Err(Error::new(
                            ErrorKind::MissingUsingDeclaration,
                            format!(
                                "{} includes {:?} from library {}, but {} does not \
                                 declare it in `using`",
                                source.path.display(),
                                include,
                                owner,
                                library.id
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// The set of libraries whose headers `library` may include.
    fn usage_closure(
        &self,
        library: &crate::plan::PlannedLibrary,
        extra: &[LibraryId],
    ) -> Result<BTreeSet<LibraryId>> {
        let usage = self.plan.usage(&library.id, extra)?;
        let mut closure: BTreeSet<LibraryId> =
            usage.link_libraries.into_iter().collect();
        closure.insert(library.id.clone());
        Ok(closure)
    }

    /// Which planned library, if any, owns the given include path.
    fn owner_of_include(&self, include: &str, exclude: &LibraryId) -> Option<LibraryId> {
        for (id, candidate) in &self.plan.libraries {
            if id == exclude {
                continue;
            }
            for dir in &candidate.public_includes {
                if dir.join(include).is_file() {
                    return Some(id.clone());
                }
            }
        }
        None
    }
}

