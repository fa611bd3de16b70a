// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The dependency solver: conflict-driven clause learning over version and
//! library-variant decisions, in the PubGrub style.
//!
//! The solver maintains a partial assignment and a store of
//! incompatibilities, clauses that are necessarily false in any solution.
//! Unit propagation turns almost-satisfied incompatibilities into forced
//! derivations; a fully satisfied incompatibility is a conflict, resolved
//! by deriving a new incompatibility and backjumping to the level where it
//! becomes unit. When the terminal (empty) incompatibility is derived, the
//! derivation graph is linearized into a human-readable explanation.

mod explain;
mod incompat;
mod partial;
mod term;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ident::{DepExpr, IntervalSet, Name, PackageId, Version};

use crate::error::{Error, ErrorKind, Result};
use crate::index::{Catalog, IndexEntry};

use self::incompat::{Cause, IncompId, Incompatibility};
use self::partial::{AssignmentKind, IncompatRelation, PartialSolution};
use self::term::Term;

/// A caller-imposed restriction of one package to an exact identity.
#[derive(Clone, Debug)]
pub struct Pin {
    pub name: Name,
    pub version: Version,
    pub rev: Option<u32>,
}

/// One package chosen by the solver.
#[derive(Clone, Debug)]
pub struct Selection {
    pub id: PackageId,
    /// The libraries that must be built, a superset of every transitive
    /// `using` request reaching the package.
    pub enabled_libs: BTreeSet<Name>,
    pub entry: Arc<IndexEntry>,
}

/// A complete consistent assignment: one selection per package name.
pub type Solution = BTreeMap<Name, Selection>;

/// Solves the root requirements against the catalog.
///
/// On failure returns `no-dependency-solution` whose message is the
/// linearized conflict explanation.
pub fn solve(roots: &[DepExpr], catalog: &Catalog, pins: &[Pin]) -> Result<Solution> {
    let mut state = State::new(catalog, roots, pins);

    let mut touched: Vec<Name> = roots.iter().map(|d| d.name().clone()).collect();
    touched.sort();
    touched.dedup();
    for package in touched {
        state.unit_propagation(package)?;
    }

    while let Some(next) = state.make_decision() {
        state.unit_propagation(next)?;
    }

    Ok(state.extract_solution(roots))
}

struct State<'a> {
    catalog: &'a Catalog,
    incompats: Vec<Incompatibility>,
    by_package: BTreeMap<Name, Vec<IncompId>>,
    partial: PartialSolution,
    chosen: BTreeMap<Name, Arc<IndexEntry>>,
    pins: BTreeMap<Name, (Version, Option<u32>)>,
    roots: Vec<DepExpr>,
}

impl<'a> State<'a> {
    fn new(catalog: &'a Catalog, roots: &[DepExpr], pins: &[Pin]) -> Self {
        let mut state = Self {
            catalog,
            incompats: Vec::new(),
            by_package: BTreeMap::new(),
            partial: PartialSolution::new(),
            chosen: BTreeMap::new(),
            pins: pins
                .iter()
                .map(|p| (p.name.clone(), (p.version.clone(), p.rev)))
                .collect(),
            roots: roots.to_vec(),
        };

        for dep in roots {
            let id = state.store(Incompatibility::new(
                [(
                    dep.name().clone(),
                    Term::negative(dep.interval_set()),
                )],
                Cause::Root { dep: dep.clone() },
            ));
            state.register(id);
            state.add_library_incompats(dep, None);
        }

        for pin in pins {
            let id = state.store(Incompatibility::new(
                [(
                    pin.name.clone(),
                    Term::negative(IntervalSet::exact(&pin.version)),
                )],
                Cause::Pinned {
                    package: pin.name.clone(),
                },
            ));
            state.register(id);
        }

        state
    }

    fn store(&mut self, incompat: Incompatibility) -> IncompId {
        self.incompats.push(incompat);
        self.incompats.len() - 1
    }

    fn register(&mut self, id: IncompId) {
        for package in self.incompats[id].terms().keys() {
            self.by_package
                .entry(package.clone())
                .or_default()
                .push(id);
        }
    }

    /// For every library the dependency requests, forbids combining the
    /// requester with the versions of the dependency that lack it.
    fn add_library_incompats(&mut self, dep: &DepExpr, requester: Option<(&Name, &Version)>) {
        for library in dep.effective_uses() {
            let mut providing = IntervalSet::empty();
            for entry in self.catalog.find(dep.name()) {
                if entry.provides(&library) {
                    providing = providing.union(&IntervalSet::exact(entry.id.version()));
                }
            }
            let lacking = dep.interval_set().difference(&providing);
            if lacking.is_empty() {
                continue;
            }

            let mut terms = vec![(dep.name().clone(), Term::positive(lacking))];
            let requester_id = match requester {
                Some((name, version)) => {
                    terms.push((name.clone(), Term::exact(version)));
                    let rev = self
                        .chosen
                        .get(name)
                        .map(|e| e.id.rev())
                        .unwrap_or(1);
                    Some(PackageId::new(name.clone(), version.clone(), rev))
                }
                None => None,
            };
            let id = self.store(Incompatibility::new(
                terms,
                Cause::MissingLibrary {
                    package: dep.name().clone(),
                    library,
                    requester: requester_id,
                },
            ));
            self.register(id);
        }
    }

    /// Performs unit propagation starting from `package` until a fixpoint,
    /// resolving conflicts as they appear.
    fn unit_propagation(&mut self, package: Name) -> Result<()> {
        let mut changed = vec![package];
        while let Some(package) = changed.pop() {
            let ids = self
                .by_package
                .get(&package)
                .cloned()
                .unwrap_or_default();
            // Newest incompatibilities first: learned clauses conflict
            // sooner.
            for id in ids.into_iter().rev() {
                match self.partial.relation(&self.incompats[id]) {
                    IncompatRelation::Satisfied => {
                        let learned = self.resolve_conflict(id)?;
                        match self.partial.relation(&self.incompats[learned]) {
                            IncompatRelation::AlmostSatisfied(p) => {
                                let term =
                                    self.incompats[learned].get(&p).expect("unit term").negate();
                                self.partial.add_derivation(p.clone(), term, learned);
                                changed = vec![p];
                            }
                            _ => {
                                return Err(internal_error(
                                    "learned incompatibility is not unit after backjump",
                                ))
                            }
                        }
                        break;
                    }
                    IncompatRelation::AlmostSatisfied(p) => {
                        let term = self.incompats[id].get(&p).expect("unit term").negate();
                        self.partial.add_derivation(p.clone(), term, id);
                        if !changed.contains(&p) {
                            changed.push(p);
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Conflict resolution: repeatedly resolves the conflicting
    /// incompatibility against the cause of its satisfier until the result
    /// would become unit after a backjump, then backtracks. Returns the id
    /// of the (possibly learned) incompatibility to propagate from.
    fn resolve_conflict(&mut self, conflicting: IncompId) -> Result<IncompId> {
        let mut current_id = conflicting;

        loop {
            if self.incompats[current_id].is_failure() {
                return Err(self.no_solution(current_id));
            }

            // Locate the satisfier: the latest-assigned term of the
            // incompatibility.
            let mut satisfier: Option<(Name, usize)> = None;
            for (package, term) in self.incompats[current_id].terms() {
                let index = self
                    .partial
                    .satisfier_index(package, term)
                    .ok_or_else(|| internal_error("conflicting incompatibility not satisfied"))?;
                if satisfier
                    .as_ref()
                    .map(|(_, best)| index > *best)
                    .unwrap_or(true)
                {
                    satisfier = Some((package.clone(), index));
                }
            }
            let (package, index) =
                satisfier.ok_or_else(|| internal_error("empty incompatibility in resolution"))?;

            let assignment = &self.partial.assignments()[index];
            let assignment_level = assignment.decision_level;
            let assignment_kind = assignment.kind.clone();
            let assignment_term = assignment.term.clone();
            let previous_level = self.partial.previous_satisfier_level(
                &self.incompats[current_id],
                &package,
                index,
            );

            let cause = match assignment_kind {
                AssignmentKind::Decision { .. } => None,
                AssignmentKind::Derivation { cause } => Some(cause),
            };
            let (Some(cause), false) = (cause, previous_level < assignment_level) else {
                self.backjump(previous_level, current_id, conflicting);
                return Ok(current_id);
            };

            let term = self.incompats[current_id]
                .get(&package)
                .expect("satisfier term")
                .clone();
            let mut derived = self.incompats[current_id].resolve(
                &self.incompats[cause],
                &package,
                current_id,
                cause,
            );
            // Partial satisfaction: keep the unexplained remainder of the
            // satisfier's term in the derived clause.
            if !assignment_term.is_subset_of(&term) {
                let remainder = assignment_term.intersect(&term.negate()).negate();
                derived = Incompatibility::new(
                    derived
                        .terms()
                        .iter()
                        .map(|(n, t)| (n.clone(), t.clone()))
                        .chain(std::iter::once((package.clone(), remainder))),
                    derived.cause().clone(),
                );
            }
            current_id = self.store(derived);
        }
    }

    fn backjump(&mut self, level: u32, learned: IncompId, original: IncompId) {
        self.partial.backtrack(level);
        // Packages decided above the backjump level lose their entries.
        let decided: BTreeSet<Name> = self
            .partial
            .decisions()
            .map(|(name, _)| name.clone())
            .collect();
        self.chosen.retain(|name, _| decided.contains(name));
        if learned != original {
            self.register(learned);
        }
    }

    fn no_solution(&mut self, terminal: IncompId) -> Error {
        let explanation = explain::explain(terminal, &self.incompats);
        Error::new(ErrorKind::NoDependencySolution, explanation)
    }

    /// The union of every `using` request currently reaching `package`.
    fn requested_libs(&self, package: &Name) -> BTreeSet<Name> {
        let mut requested = BTreeSet::new();
        for dep in self.roots.iter().filter(|d| d.name() == package) {
            requested.extend(dep.effective_uses());
        }
        for entry in self.chosen.values() {
            for dep in entry.dependencies.iter().filter(|d| d.name() == package) {
                requested.extend(dep.effective_uses());
            }
        }
        requested
    }

    /// Chooses the next package and version to decide, records the decision
    /// and its dependency incompatibilities, and returns the package to
    /// propagate. `None` once every required package is decided.
    fn make_decision(&mut self) -> Option<Name> {
        // Deterministic choice: the lexicographically smallest undecided
        // package (undecided() is name-ordered).
        let (package, allowed) = self.partial.undecided().into_iter().next()?;

        let pin = self.pins.get(&package).cloned();
        let requested = self.requested_libs(&package);

        // Candidates arrive ordered: highest version, then highest pkg-rev,
        // then repository precedence.
        let mut fallback: Option<Arc<IndexEntry>> = None;
        let mut chosen: Option<Arc<IndexEntry>> = None;
        for entry in self.catalog.find(&package) {
            if !allowed.contains(entry.id.version()) {
                continue;
            }
            if let Some((version, rev)) = &pin {
                if entry.id.version() != version {
                    continue;
                }
                if let Some(rev) = rev {
                    if entry.id.rev() != *rev {
                        continue;
                    }
                }
            }
            if fallback.is_none() {
                fallback = Some(Arc::clone(entry));
            }
            if requested.iter().all(|lib| entry.provides(lib)) {
                chosen = Some(Arc::clone(entry));
                break;
            }
        }

        let entry = match chosen.or(fallback) {
            Some(entry) => entry,
            None => {
                // Dead end: no candidate version fits the accumulated
                // constraint. Record it and let propagation conflict.
                let id = self.store(Incompatibility::new(
                    [(package.clone(), Term::positive(allowed.clone()))],
                    Cause::NoVersions {
                        package: package.clone(),
                        set: allowed,
                    },
                ));
                self.register(id);
                return Some(package);
            }
        };

        let version = entry.id.version().clone();
        self.partial
            .add_decision(package.clone(), version.clone(), entry.id.rev());
        self.chosen.insert(package.clone(), Arc::clone(&entry));

        for dep in entry.dependencies.clone() {
            if dep.name() == &package {
                continue;
            }
            let id = self.store(Incompatibility::new(
                [
                    (package.clone(), Term::exact(&version)),
                    (dep.name().clone(), Term::negative(dep.interval_set())),
                ],
                Cause::Dependency {
                    depender: entry.id.clone(),
                    dep: dep.clone(),
                },
            ));
            self.register(id);
            self.add_library_incompats(&dep, Some((&package, &version)));
        }

        Some(package)
    }

    /// Builds the final solution: selections plus their enabled library
    /// sets (requested libraries closed over sibling `uses`).
    fn extract_solution(&self, roots: &[DepExpr]) -> Solution {
        let mut requested: BTreeMap<Name, BTreeSet<Name>> = BTreeMap::new();
        for dep in roots {
            requested
                .entry(dep.name().clone())
                .or_default()
                .extend(dep.effective_uses());
        }
        for entry in self.chosen.values() {
            for dep in &entry.dependencies {
                requested
                    .entry(dep.name().clone())
                    .or_default()
                    .extend(dep.effective_uses());
            }
        }

        let mut solution = Solution::new();
        for (package, entry) in &self.chosen {
            let mut enabled: BTreeSet<Name> =
                requested.get(package).cloned().unwrap_or_default();
            if enabled.is_empty() {
                enabled.insert(package.clone());
            }
            // Close over sibling uses within the package.
            let mut queue: Vec<Name> = enabled.iter().cloned().collect();
            while let Some(lib) = queue.pop() {
                if let Some(index_lib) = entry.library(&lib) {
                    for used in &index_lib.uses {
                        if entry.provides(used) && enabled.insert(used.clone()) {
                            queue.push(used.clone());
                        }
                    }
                }
            }

            solution.insert(
                package.clone(),
                Selection {
                    id: entry.id.clone(),
                    enabled_libs: enabled,
                    entry: Arc::clone(entry),
                },
            );
        }
        solution
    }
}

fn internal_error(message: &str) -> Error {
    Error::new(
        ErrorKind::NoDependencySolution,
        format!("internal solver error: {}", message),
    )
}
