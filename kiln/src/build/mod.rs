// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The incremental build driver: graph construction, the per-node rebuild
//! predicate backed by the dependency database, and bounded parallel
//! execution.

pub mod discover;
mod exec;
pub mod graph;
mod scheduler;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::db::{Database, HeaderRecord, LastResult, OutputRecord};
use crate::error::{Error, ErrorKind, Result};
use crate::plan::BuildPlan;
use crate::toolchain::{CompileIntent, Toolchain};

use self::exec::{render_argv, run_command};
use self::graph::{BuildGraph, BuildNode, NodeAction};
pub use self::scheduler::{NodeResult, NodeStatus};

/// How compile cache keys stamp files.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum KeyMode {
    /// `(mtime, size)`: the default, sufficient on local filesystems.
    #[default]
    Fast,
    /// Content hashes: portable and stable across machines, slower.
    Strict,
}

#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Worker count; defaults to the toolchain's parallelism.
    pub jobs: Option<usize>,
    /// Continue past failures instead of stopping dispatch.
    pub keep_going: bool,
    pub key_mode: KeyMode,
    /// Build and run test executables.
    pub run_tests: bool,
    /// Wall-clock limit per test run; compiles and links have none.
    pub test_timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: None,
            keep_going: false,
            key_mode: KeyMode::Fast,
            run_tests: true,
            test_timeout: Some(Duration::from_secs(60 * 5)),
        }
    }
}

/// What a finished (successful) build did.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub compiled: usize,
    pub up_to_date: usize,
    pub skipped: usize,
    /// Labels of the nodes that actually ran, in node order.
    pub ran_labels: Vec<String>,
}

/// One failed node, with its logical identity and captured output.
#[derive(Debug)]
pub struct NodeFailure {
    pub label: String,
    pub kind: ErrorKind,
    pub output: String,
}

/// Drives a full build of the plan into `build_root`.
pub fn build(
    plan: &BuildPlan,
    toolchain: &Toolchain,
    build_root: &Path,
    options: &BuildOptions,
) -> Result<BuildReport> {
    std::fs::create_dir_all(build_root)
        .map_err(|e| Error::from_io(e, format!("creating {}", build_root.display())))?;

    let graph = BuildGraph::build(plan, toolchain, build_root, options.run_tests)?;

    let compile_db = graph.compile_commands(toolchain, build_root);
    fileutil::atomic_write(
        &build_root.join("compile_commands.json"),
        &serde_json::to_vec_pretty(&compile_db).expect("compilation DB serialization cannot fail"),
    )
    .map_err(|e| {
        Error::with_source(ErrorKind::IoFailure, "writing compile_commands.json", e)
    })?;

    let executor = Executor {
        toolchain,
        db: Database::open(&build_root.join(".deps.db"))?,
        key_mode: options.key_mode,
        test_timeout: options.test_timeout,
    };

    let jobs = options.jobs.unwrap_or_else(|| toolchain.parallelism());
    let results = scheduler::execute(&graph, jobs, options.keep_going, |node| {
        executor.run(node)
    });

    summarize(&graph, results)
}

/// Compiles exactly one source file of the project, on demand.
pub fn compile_one(
    plan: &BuildPlan,
    toolchain: &Toolchain,
    build_root: &Path,
    source: &Path,
    options: &BuildOptions,
) -> Result<()> {
    std::fs::create_dir_all(build_root)
        .map_err(|e| Error::from_io(e, format!("creating {}", build_root.display())))?;
    let graph = BuildGraph::build(plan, toolchain, build_root, false)?;

    let wanted = source.canonicalize().unwrap_or_else(|_| source.to_path_buf());
    let node = graph
        .nodes
        .iter()
        .find(|node| match &node.action {
            NodeAction::Compile {
                intent,
                check_only: false,
            } => intent.source == wanted || intent.source.ends_with(source),
            _ => false,
        })
        .ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidManifest,
                format!("{} is not a source file of the project", source.display()),
            )
        })?;

    let executor = Executor {
        toolchain,
        db: Database::open(&build_root.join(".deps.db"))?,
        key_mode: options.key_mode,
        test_timeout: options.test_timeout,
    };
    let result = executor.run(node);
    match result.status {
        NodeStatus::UpToDate | NodeStatus::Ran => Ok(()),
        _ => Err(result.error.unwrap_or_else(|| {
            Error::new(
                ErrorKind::CompileFailed,
                format!("{}\n{}", node.label, result.output),
            )
        })),
    }
}

fn summarize(graph: &BuildGraph, results: Vec<NodeResult>) -> Result<BuildReport> {
    let mut report = BuildReport::default();
    let mut failures: Vec<NodeFailure> = Vec::new();

    for (node, result) in graph.nodes.iter().zip(results) {
        match result.status {
            NodeStatus::Ran => {
                report.compiled += 1;
                report.ran_labels.push(node.label.clone());
            }
            NodeStatus::UpToDate => report.up_to_date += 1,
            NodeStatus::Skipped => report.skipped += 1,
            NodeStatus::Failed => {
                // Under keep-going several nodes can fail in one pass, in
                // different ways; every one of them is collected and
                // reported. Environmental trouble keeps its own marker,
                // tool failures classify by what the node was doing.
                let kind = match &result.error {
                    Some(error) => error.kind(),
                    None => failure_kind(&node.action),
                };
                failures.push(NodeFailure {
                    label: node.label.clone(),
                    kind,
                    output: result.output,
                });
            }
        }
    }

    if failures.is_empty() {
        return Ok(report);
    }

    // Tool and environment failures outrank test failures: a test that
    // never built is a build problem, not a test problem.
    let lead = failures
        .iter()
        .find(|f| f.kind != ErrorKind::BuildFailedTestsFailed)
        .unwrap_or(&failures[0]);
    let mut message = String::new();
    for failure in &failures {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str(&failure.label);
        if !failure.output.trim().is_empty() {
            message.push('\n');
            message.push_str(failure.output.trim_end());
        }
    }
    Err(Error::new(lead.kind, message))
}

fn failure_kind(action: &NodeAction) -> ErrorKind {
    match action {
        NodeAction::Compile {
            check_only: true, ..
        } => ErrorKind::SyntaxCheckFailed,
        NodeAction::Compile { .. } => ErrorKind::CompileFailed,
        NodeAction::Archive { .. } | NodeAction::Link { .. } => ErrorKind::LinkFailed,
        NodeAction::TestRun { .. } => ErrorKind::BuildFailedTestsFailed,
    }
}

struct Executor<'a> {
    toolchain: &'a Toolchain,
    db: Database,
    key_mode: KeyMode,
    test_timeout: Option<Duration>,
}

impl Executor<'_> {
    fn run(&self, node: &BuildNode) -> NodeResult {
        match self.try_run(node) {
            Ok(result) => result,
            Err(error) => NodeResult {
                status: NodeStatus::Failed,
                output: error.to_string(),
                error: Some(error),
            },
        }
    }

    fn try_run(&self, node: &BuildNode) -> Result<NodeResult> {
        match &node.action {
            NodeAction::Compile { intent, .. } => self.run_compile(node, intent),
            NodeAction::Archive { objects, out } => {
                if !stale(out, objects)? {
                    return Ok(NodeResult::up_to_date());
                }
                prepare_output(out)?;
                // Stale archive members must not survive a rebuild.
                match std::fs::remove_file(out) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(Error::from_io(e, format!("removing {}", out.display())))
                    }
                }
                let argv = self.toolchain.archive_command(objects, out);
                self.run_tool(node, &argv)
            }
            NodeAction::Link { inputs, out } => {
                if !stale(out, inputs)? {
                    return Ok(NodeResult::up_to_date());
                }
                prepare_output(out)?;
                let argv = self.toolchain.link_command(inputs, out);
                self.run_tool(node, &argv)
            }
            NodeAction::TestRun { exe } => {
                let argv = vec![exe.display().to_string()];
                let outcome = run_command(&argv, self.test_timeout)?;
                if outcome.success {
                    Ok(NodeResult::ran())
                } else {
                    let mut output = outcome.output;
                    if outcome.timed_out {
                        output.push_str("\n(test timed out)");
                    }
                    Ok(NodeResult::failed(output))
                }
            }
        }
    }

    fn run_tool(&self, node: &BuildNode, argv: &[String]) -> Result<NodeResult> {
        let outcome = run_command(argv, None)?;
        if outcome.success {
            tracing::info!("{}", node.label);
            Ok(NodeResult::ran())
        } else {
            tracing::warn!("{} failed: {}", node.label, render_argv(argv));
            Ok(NodeResult::failed(outcome.output))
        }
    }

    fn run_compile(&self, node: &BuildNode, intent: &CompileIntent) -> Result<NodeResult> {
        let argv = self.toolchain.compile_command(intent);
        let command_hash = hash_argv(&argv);
        let key = intent.object.display().to_string();

        if self.compile_up_to_date(&key, node, intent, &command_hash)? {
            return Ok(NodeResult::up_to_date());
        }

        prepare_output(&intent.object)?;
        let outcome = run_command(&argv, None)?;
        if !outcome.success {
            // Keep the previous header list so subsequent rebuilds still
            // recognize relevant changes and re-attempt the compile.
            self.db.mark_output_failed(&key)?;
            tracing::warn!("{} failed", node.label);
            return Ok(NodeResult::failed(outcome.output));
        }

        let header_paths = self
            .toolchain
            .normalize_deps(&outcome.output, intent.deps_file.as_deref())?;
        let mut headers = Vec::with_capacity(header_paths.len());
        for path in header_paths {
            if let Some(stamp) = self.stamp(&path)? {
                headers.push(HeaderRecord { path, stamp });
            }
        }
        let source_stamp = self.stamp(&intent.source)?.ok_or_else(|| {
            Error::new(
                ErrorKind::IoFailure,
                format!("{} vanished during the build", intent.source.display()),
            )
        })?;
        self.db.set_output(
            &key,
            OutputRecord {
                command_hash,
                source_stamp,
                headers,
                last_result: LastResult::Succeeded,
            },
        )?;
        tracing::info!("{}", node.label);
        Ok(NodeResult::ran())
    }

    /// The out-of-date predicate: a node must run when its cache key
    /// differs from the stored record, any output is missing, or the
    /// previous compile failed.
    fn compile_up_to_date(
        &self,
        key: &str,
        node: &BuildNode,
        intent: &CompileIntent,
        command_hash: &str,
    ) -> Result<bool> {
        let Some(record) = self.db.output(key) else {
            return Ok(false);
        };
        if record.last_result == LastResult::Failed {
            return Ok(false);
        }
        if record.command_hash != command_hash {
            return Ok(false);
        }
        if node.outputs.iter().any(|out| !out.exists()) {
            return Ok(false);
        }
        if self.stamp(&intent.source)?.as_deref() != Some(record.source_stamp.as_str()) {
            return Ok(false);
        }
        for header in &record.headers {
            if self.stamp(&header.path)?.as_deref() != Some(header.stamp.as_str()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The freshness stamp of a file, `None` if it does not exist.
    fn stamp(&self, path: &Path) -> Result<Option<String>> {
        match self.key_mode {
            KeyMode::Fast => {
                let metadata = match std::fs::metadata(path) {
                    Ok(metadata) => metadata,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => {
                        return Err(Error::from_io(e, format!("stat {}", path.display())))
                    }
                };
                let mtime = metadata
                    .modified()
                    .map_err(|e| Error::from_io(e, format!("stat {}", path.display())))?
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or_default();
                Ok(Some(format!("{}:{}", mtime, metadata.len())))
            }
            KeyMode::Strict => match crate::store::sha256_file(path) {
                Ok(digest) => Ok(Some(format!("sha256:{}", digest))),
                Err(e) if e.kind() == ErrorKind::IoFailure => Ok(None),
                Err(e) => Err(e),
            },
        }
    }
}

/// The compile cache key: the canonical command line, which covers the
/// toolchain, flags, include set and file paths.
fn hash_argv(argv: &[String]) -> String {
    let mut hasher = Sha256::new();
    for arg in argv {
        hasher.update(arg.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

/// Whether `out` is missing or older than any of `inputs`.
fn stale(out: &Path, inputs: &[PathBuf]) -> Result<bool> {
    let out_mtime = match std::fs::metadata(out) {
        Ok(metadata) => metadata
            .modified()
            .map_err(|e| Error::from_io(e, format!("stat {}", out.display())))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(Error::from_io(e, format!("stat {}", out.display()))),
    };
    for input in inputs {
        let input_mtime = std::fs::metadata(input)
            .and_then(|m| m.modified())
            .map_err(|e| Error::from_io(e, format!("stat {}", input.display())))?;
        if input_mtime >= out_mtime {
            return Ok(true);
        }
    }
    Ok(false)
}

fn prepare_output(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::from_io(e, format!("creating {}", parent.display())))?;
    }
    Ok(())
}
