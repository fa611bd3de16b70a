// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use ident::{IntervalSet, Name, Version};

use super::incompat::{IncompId, Incompatibility};
use super::term::{Relation, Term};

/// What kind of assignment an entry in the partial solution is.
#[derive(Clone, Debug)]
pub enum AssignmentKind {
    /// A free choice of a concrete `(version, pkg-rev)`.
    Decision { version: Version, rev: u32 },
    /// A consequence forced by unit propagation of an incompatibility.
    Derivation { cause: IncompId },
}

#[derive(Clone, Debug)]
pub struct Assignment {
    pub package: Name,
    pub term: Term,
    pub decision_level: u32,
    pub kind: AssignmentKind,
}

/// How a whole incompatibility relates to the partial solution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum IncompatRelation {
    /// Every term is satisfied: the solution violates the incompatibility.
    Satisfied,
    /// Every term but one is satisfied; propagation can force the negation
    /// of the remaining term.
    AlmostSatisfied(Name),
    /// Some term is contradicted, so the incompatibility cannot fire.
    Contradicted,
    Inconclusive,
}

/// The ordered list of decisions and derivations made so far, with memoized
/// per-package accumulated terms.
#[derive(Default)]
pub struct PartialSolution {
    assignments: Vec<Assignment>,
    decision_level: u32,
    accumulated: BTreeMap<Name, Term>,
    decisions: BTreeMap<Name, (Version, u32)>,
}

impl PartialSolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decision_level(&self) -> u32 {
        self.decision_level
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// The intersection of every assignment term for `package`.
    pub fn accumulated(&self, package: &Name) -> Option<&Term> {
        self.accumulated.get(package)
    }

    pub fn decision(&self, package: &Name) -> Option<&(Version, u32)> {
        self.decisions.get(package)
    }

    pub fn decisions(&self) -> impl Iterator<Item = (&Name, &(Version, u32))> {
        self.decisions.iter()
    }

    /// Packages that are required (their accumulated term is positive) but
    /// not yet decided, in name order, with their allowed version sets.
    pub fn undecided(&self) -> Vec<(Name, IntervalSet)> {
        self.accumulated
            .iter()
            .filter(|(name, term)| term.is_positive() && !self.decisions.contains_key(*name))
            .map(|(name, term)| (name.clone(), term.allowed()))
            .collect()
    }

    pub fn add_decision(&mut self, package: Name, version: Version, rev: u32) {
        self.decision_level += 1;
        self.decisions
            .insert(package.clone(), (version.clone(), rev));
        self.push(Assignment {
            package,
            term: Term::exact(&version),
            decision_level: self.decision_level,
            kind: AssignmentKind::Decision { version, rev },
        });
    }

    pub fn add_derivation(&mut self, package: Name, term: Term, cause: IncompId) {
        self.push(Assignment {
            package,
            term,
            decision_level: self.decision_level,
            kind: AssignmentKind::Derivation { cause },
        });
    }

    fn push(&mut self, assignment: Assignment) {
        match self.accumulated.get_mut(&assignment.package) {
            Some(acc) => *acc = acc.intersect(&assignment.term),
            None => {
                self.accumulated
                    .insert(assignment.package.clone(), assignment.term.clone());
            }
        }
        self.assignments.push(assignment);
    }

    /// Relates `incompat` to the current assignments.
    pub fn relation(&self, incompat: &Incompatibility) -> IncompatRelation {
        let mut unsatisfied: Option<&Name> = None;
        for (package, term) in incompat.terms() {
            match term.relation_with(self.accumulated(package)) {
                Relation::Contradicted => return IncompatRelation::Contradicted,
                Relation::Satisfied => {}
                Relation::Inconclusive => {
                    if unsatisfied.is_some() {
                        return IncompatRelation::Inconclusive;
                    }
                    unsatisfied = Some(package);
                }
            }
        }
        match unsatisfied {
            None => IncompatRelation::Satisfied,
            Some(package) => IncompatRelation::AlmostSatisfied(package.clone()),
        }
    }

    /// The index of the earliest assignment such that the prefix ending
    /// there satisfies `term` for `package`. `None` if the whole solution
    /// does not satisfy it.
    pub fn satisfier_index(&self, package: &Name, term: &Term) -> Option<usize> {
        let mut acc: Option<Term> = None;
        for (index, assignment) in self.assignments.iter().enumerate() {
            if assignment.package != *package {
                continue;
            }
            let next = match &acc {
                Some(acc) => acc.intersect(&assignment.term),
                None => assignment.term.clone(),
            };
            if next.is_subset_of(term) {
                return Some(index);
            }
            acc = Some(next);
        }
        None
    }

    /// The decision level to backjump to so that `incompat` becomes unit:
    /// the highest level among the satisfiers of every term other than the
    /// satisfier's own, and of the prefix of the satisfier's package that,
    /// together with the satisfier assignment, satisfies its term.
    pub fn previous_satisfier_level(
        &self,
        incompat: &Incompatibility,
        satisfier_package: &Name,
        satisfier_index: usize,
    ) -> u32 {
        let mut level = 0;
        for (package, term) in incompat.terms() {
            if package == satisfier_package {
                let satisfier_term = &self.assignments[satisfier_index].term;
                let mut acc = satisfier_term.clone();
                if acc.is_subset_of(term) {
                    continue;
                }
                for assignment in self.assignments[..satisfier_index]
                    .iter()
                    .filter(|a| a.package == *package)
                {
                    acc = acc.intersect(&assignment.term);
                    if acc.is_subset_of(term) {
                        level = level.max(assignment.decision_level);
                        break;
                    }
                }
            } else if let Some(index) = self.satisfier_index(package, term) {
                level = level.max(self.assignments[index].decision_level);
            }
        }
        level
    }

    /// Drops every assignment above `level` and rebuilds the memos.
    pub fn backtrack(&mut self, level: u32) {
        self.assignments.retain(|a| a.decision_level <= level);
        self.decision_level = level;
        self.accumulated.clear();
        self.decisions.clear();
        for assignment in &self.assignments {
            match self.accumulated.get_mut(&assignment.package) {
                Some(acc) => *acc = acc.intersect(&assignment.term),
                None => {
                    self.accumulated
                        .insert(assignment.package.clone(), assignment.term.clone());
                }
            }
            if let AssignmentKind::Decision { version, rev } = &assignment.kind {
                self.decisions
                    .insert(assignment.package.clone(), (version.clone(), *rev));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::incompat::Cause;
    use super::*;

    fn name(s: &str) -> Name {
        Name::try_new(s).unwrap()
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    fn range(low: &str, high: &str) -> IntervalSet {
        IntervalSet::of(v(low), Some(v(high)))
    }

    #[test]
    fn accumulation_and_undecided() {
        let mut partial = PartialSolution::new();
        partial.add_derivation(name("zlib"), Term::positive(range("1.0.0", "2.0.0")), 0);
        partial.add_derivation(name("zlib"), Term::positive(range("1.2.0", "3.0.0")), 1);

        let undecided = partial.undecided();
        assert_eq!(1, undecided.len());
        assert_eq!(name("zlib"), undecided[0].0);
        assert_eq!(range("1.2.0", "2.0.0"), undecided[0].1);

        partial.add_decision(name("zlib"), v("1.2.13"), 1);
        assert!(partial.undecided().is_empty());
        assert_eq!(Some(&(v("1.2.13"), 1)), partial.decision(&name("zlib")));
    }

    #[test]
    fn relation_finds_the_almost_satisfied_term() {
        let mut partial = PartialSolution::new();
        partial.add_decision(name("app"), v("1.0.0"), 1);

        let incompat = Incompatibility::new(
            [
                (name("app"), Term::exact(&v("1.0.0"))),
                (
                    name("zlib"),
                    Term::negative(range("1.0.0", "2.0.0")),
                ),
            ],
            Cause::Pinned {
                package: name("app"),
            },
        );
        assert_eq!(
            IncompatRelation::AlmostSatisfied(name("zlib")),
            partial.relation(&incompat)
        );

        // Constraining zlib fully outside the range satisfies the negative
        // term, so the incompatibility as a whole fires.
        partial.add_derivation(
            name("zlib"),
            Term::positive(range("2.5.0", "3.0.0")),
            0,
        );
        assert_eq!(IncompatRelation::Satisfied, partial.relation(&incompat));
    }

    #[test]
    fn backtrack_discards_later_levels() {
        let mut partial = PartialSolution::new();
        partial.add_decision(name("a"), v("1.0.0"), 1);
        partial.add_derivation(name("b"), Term::positive(range("1.0.0", "2.0.0")), 0);
        partial.add_decision(name("b"), v("1.5.0"), 1);
        partial.add_decision(name("c"), v("2.0.0"), 1);
        assert_eq!(3, partial.decision_level());

        partial.backtrack(1);
        assert_eq!(1, partial.decision_level());
        assert!(partial.decision(&name("a")).is_some());
        assert!(partial.decision(&name("b")).is_none());
        assert!(partial.decision(&name("c")).is_none());
        // b's level-1 derivation survives.
        assert_eq!(
            Some(&Term::positive(range("1.0.0", "2.0.0"))),
            partial.accumulated(&name("b"))
        );
    }

    #[test]
    fn satisfier_index_finds_earliest_prefix() {
        let mut partial = PartialSolution::new();
        partial.add_derivation(name("x"), Term::positive(range("1.0.0", "3.0.0")), 0);
        partial.add_derivation(name("x"), Term::positive(range("1.0.0", "2.0.0")), 1);

        // The wide requirement is satisfied by the first assignment already.
        let wide = Term::positive(range("0.1.0", "4.0.0"));
        assert_eq!(Some(0), partial.satisfier_index(&name("x"), &wide));

        // The narrow one only after the second.
        let narrow = Term::positive(range("0.1.0", "2.5.0"));
        assert_eq!(Some(1), partial.satisfier_index(&name("x"), &narrow));

        let never = Term::positive(range("5.0.0", "6.0.0"));
        assert_eq!(None, partial.satisfier_index(&name("x"), &never));
    }
}
