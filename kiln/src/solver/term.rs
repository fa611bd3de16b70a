// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::{self, Display};

use ident::{IntervalSet, Version};

/// A statement about one package's selection.
///
/// A positive term states "the package is selected with a version in
/// `set`"; a negative term states the opposite, which is also satisfied by
/// the package not being selected at all. This absent-state asymmetry is
/// what the subset/disjointness rules below encode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Term {
    positive: bool,
    set: IntervalSet,
}

impl Term {
    pub fn positive(set: IntervalSet) -> Self {
        Self {
            positive: true,
            set,
        }
    }

    pub fn negative(set: IntervalSet) -> Self {
        Self {
            positive: false,
            set,
        }
    }

    pub fn exact(version: &Version) -> Self {
        Self::positive(IntervalSet::exact(version))
    }

    pub fn is_positive(&self) -> bool {
        self.positive
    }

    pub fn set(&self) -> &IntervalSet {
        &self.set
    }

    pub fn negate(&self) -> Self {
        Self {
            positive: !self.positive,
            set: self.set.clone(),
        }
    }

    /// The versions a selected package may take under this term.
    pub fn allowed(&self) -> IntervalSet {
        if self.positive {
            self.set.clone()
        } else {
            self.set.complement()
        }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        match (self.positive, other.positive) {
            (true, true) => Self::positive(self.set.intersect(&other.set)),
            (true, false) => Self::positive(self.set.difference(&other.set)),
            (false, true) => Self::positive(other.set.difference(&self.set)),
            // Both tolerate absence, so the intersection does too.
            (false, false) => Self::negative(self.set.union(&other.set)),
        }
    }

    /// `self ⊆ other`: every selection state satisfying `self` satisfies
    /// `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        match (self.positive, other.positive) {
            (true, true) => self.set.is_subset_of(&other.set),
            (true, false) => self.set.is_disjoint(&other.set),
            // A negative term admits the absent state; a positive one never
            // does.
            (false, true) => false,
            (false, false) => other.set.is_subset_of(&self.set),
        }
    }

    /// Whether no selection state satisfies both terms.
    pub fn is_disjoint_with(&self, other: &Self) -> bool {
        match (self.positive, other.positive) {
            (true, true) => self.set.is_disjoint(&other.set),
            (true, false) => self.set.is_subset_of(&other.set),
            (false, true) => other.set.is_subset_of(&self.set),
            // Both are satisfied by the absent state.
            (false, false) => false,
        }
    }

    /// Whether the term is unsatisfiable on its own.
    pub fn is_never(&self) -> bool {
        self.positive && self.set.is_empty()
    }
}

/// How a term relates to the accumulated assignment for its package.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Relation {
    Satisfied,
    Contradicted,
    Inconclusive,
}

impl Term {
    /// Relates this term to `assigned`, the intersection of every assignment
    /// term recorded for the package (`None` when the package has no
    /// assignments yet).
    pub fn relation_with(&self, assigned: Option<&Term>) -> Relation {
        match assigned {
            None => Relation::Inconclusive,
            Some(assigned) => {
                if assigned.is_subset_of(self) {
                    Relation::Satisfied
                } else if assigned.is_disjoint_with(self) {
                    Relation::Contradicted
                } else {
                    Relation::Inconclusive
                }
            }
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.positive {
            write!(f, "{}", self.set)
        } else {
            write!(f, "not {}", self.set)
        }
    }
}
