// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bounded parallel execution of ready build nodes.
//!
//! A fixed pool of worker threads pops ready nodes (all predecessors
//! complete) off a priority queue ordered by downstream-node count, ties
//! broken by stable node id. The first failure stops dispatch of new work
//! by default; in-flight work always completes and is reported. With
//! keep-going, execution continues until no more ready nodes exist. Workers
//! block only on subprocess I/O and on the condition variable guarding the
//! ready queue.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};

use super::graph::{BuildGraph, NodeId};
use crate::error::Error;

/// What happened to one node.
#[derive(Debug)]
pub enum NodeStatus {
    /// The node's cache key matched; no subprocess ran.
    UpToDate,
    /// The node ran and succeeded.
    Ran,
    /// The node ran (or could not run) and failed.
    Failed,
    /// The node never became ready: a predecessor failed, or dispatch
    /// stopped after an earlier failure.
    Skipped,
}

#[derive(Debug)]
pub struct NodeResult {
    pub status: NodeStatus,
    /// Captured subprocess output, verbatim.
    pub output: String,
    /// Set when the failure was environmental rather than a tool failure.
    pub error: Option<Error>,
}

impl NodeResult {
    pub fn up_to_date() -> Self {
        Self {
            status: NodeStatus::UpToDate,
            output: String::new(),
            error: None,
        }
    }

    pub fn ran() -> Self {
        Self {
            status: NodeStatus::Ran,
            output: String::new(),
            error: None,
        }
    }

    pub fn failed(output: String) -> Self {
        Self {
            status: NodeStatus::Failed,
            output,
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, NodeStatus::Failed)
    }
}

#[derive(Eq, PartialEq)]
struct ReadyNode {
    priority: usize,
    id: Reverse<NodeId>,
}

impl Ord for ReadyNode {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.id).cmp(&(other.priority, other.id))
    }
}

impl PartialOrd for ReadyNode {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct SchedulerState {
    indegree: Vec<usize>,
    ready: BinaryHeap<ReadyNode>,
    results: Vec<Option<NodeResult>>,
    running: usize,
    stopped: bool,
}

/// Executes the graph on `jobs` workers and returns one result per node.
pub fn execute<F>(graph: &BuildGraph, jobs: usize, keep_going: bool, run: F) -> Vec<NodeResult>
where
    F: Fn(&super::graph::BuildNode) -> NodeResult + Sync,
{
    let priorities = graph.priorities();
    let indegree: Vec<usize> = graph.nodes.iter().map(|n| n.deps.len()).collect();
    let mut ready = BinaryHeap::new();
    for (id, &degree) in indegree.iter().enumerate() {
        if degree == 0 {
            ready.push(ReadyNode {
                priority: priorities[id],
                id: Reverse(id),
            });
        }
    }
    let state = Mutex::new(SchedulerState {
        indegree,
        ready,
        results: graph.nodes.iter().map(|_| None).collect(),
        running: 0,
        stopped: false,
    });
    let ready_cond = Condvar::new();

    let workers = jobs.clamp(1, graph.nodes.len().max(1));
    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let node_id = {
                    let mut st = state.lock().unwrap();
                    loop {
                        if !st.stopped {
                            if let Some(next) = st.ready.pop() {
                                st.running += 1;
                                break next.id.0;
                            }
                        }
                        if st.running == 0 {
                            return;
                        }
                        st = ready_cond.wait(st).unwrap();
                    }
                };

                let result = run(&graph.nodes[node_id]);

                let mut st = state.lock().unwrap();
                st.running -= 1;
                let failed = result.is_failure();
                st.results[node_id] = Some(result);
                if failed {
                    if !keep_going {
                        st.stopped = true;
                    }
                    // Dependents of a failed node never become ready in
                    // either mode.
                } else {
                    for &next in &graph.dependents[node_id] {
                        st.indegree[next] -= 1;
                        if st.indegree[next] == 0 {
                            st.ready.push(ReadyNode {
                                priority: priorities[next],
                                id: Reverse(next),
                            });
                        }
                    }
                }
                ready_cond.notify_all();
            });
        }
    });

    state
        .into_inner()
        .unwrap()
        .results
        .into_iter()
        .map(|r| r.unwrap_or(NodeResult {
            status: NodeStatus::Skipped,
            output: String::new(),
            error: None,
        }))
        .collect()
}
