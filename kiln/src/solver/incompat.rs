// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use ident::{DepExpr, IntervalSet, Name, PackageId};

use super::term::Term;

/// Index of an incompatibility in the solver's store.
pub type IncompId = usize;

/// Why an incompatibility exists.
#[derive(Clone, Debug)]
pub enum Cause {
    /// A root requirement of the project.
    Root { dep: DepExpr },
    /// A dependency edge of a decided package.
    Dependency { depender: PackageId, dep: DepExpr },
    /// No candidate version of the package lies in the set.
    NoVersions { package: Name, set: IntervalSet },
    /// The named versions of a package do not provide a requested library.
    MissingLibrary {
        package: Name,
        library: Name,
        /// Who asked for the library: a decided package, or the project
        /// itself when `None`.
        requester: Option<PackageId>,
    },
    /// The package is pinned by the caller.
    Pinned { package: Name },
    /// Derived during conflict resolution from two prior incompatibilities.
    Derived { left: IncompId, right: IncompId },
}

/// A set of terms that cannot all be satisfied in any solution.
///
/// Kept in the canonical PubGrub form of at most one term per package.
#[derive(Clone, Debug)]
pub struct Incompatibility {
    terms: BTreeMap<Name, Term>,
    cause: Cause,
}

impl Incompatibility {
    pub fn new(terms: impl IntoIterator<Item = (Name, Term)>, cause: Cause) -> Self {
        let mut map: BTreeMap<Name, Term> = BTreeMap::new();
        for (name, term) in terms {
            match map.remove(&name) {
                Some(existing) => {
                    map.insert(name, existing.intersect(&term));
                }
                None => {
                    map.insert(name, term);
                }
            }
        }
        Self { terms: map, cause }
    }

    pub fn terms(&self) -> &BTreeMap<Name, Term> {
        &self.terms
    }

    pub fn get(&self, package: &Name) -> Option<&Term> {
        self.terms.get(package)
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.cause, Cause::Derived { .. })
    }

    /// The terminal incompatibility: no terms left means "the empty set of
    /// requirements is unsatisfiable", i.e. solving failed outright.
    pub fn is_failure(&self) -> bool {
        self.terms.is_empty()
    }

    /// The resolution rule: merges every term of `self` and `other` except
    /// those about `package`.
    pub fn resolve(
        &self,
        other: &Incompatibility,
        package: &Name,
        self_id: IncompId,
        other_id: IncompId,
    ) -> Incompatibility {
        let terms = self
            .terms
            .iter()
            .chain(other.terms.iter())
            .filter(|(name, _)| *name != package)
            .map(|(name, term)| (name.clone(), term.clone()));
        Incompatibility::new(
            terms,
            Cause::Derived {
                left: self_id,
                right: other_id,
            },
        )
    }
}

impl Display for Incompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return f.write_str("version solving failed");
        }
        for (i, (name, term)) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if term.is_positive() {
                write!(f, "{} {}", name, term.set())?;
            } else {
                write!(f, "not {} {}", name, term.set())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ident::Version;

    use super::*;

    fn name(s: &str) -> Name {
        Name::try_new(s).unwrap()
    }

    fn exact(v: &str) -> Term {
        Term::exact(&Version::try_new(v).unwrap())
    }

    #[test]
    fn resolution_drops_the_pivot_package() {
        let a = Incompatibility::new(
            [
                (name("foo"), exact("1.0.0")),
                (name("lib"), exact("1.2.3")),
            ],
            Cause::NoVersions {
                package: name("lib"),
                set: IntervalSet::any(),
            },
        );
        let b = Incompatibility::new(
            [
                (name("bar"), exact("2.0.0")),
                (name("lib"), exact("2.0.0").negate()),
            ],
            Cause::NoVersions {
                package: name("lib"),
                set: IntervalSet::any(),
            },
        );

        let derived = a.resolve(&b, &name("lib"), 0, 1);
        assert!(derived.get(&name("lib")).is_none());
        assert!(derived.get(&name("foo")).is_some());
        assert!(derived.get(&name("bar")).is_some());
        assert!(derived.is_derived());
    }

    #[test]
    fn duplicate_terms_intersect() {
        let i = Incompatibility::new(
            [
                (name("lib"), Term::positive(IntervalSet::any())),
                (
                    name("lib"),
                    Term::positive(IntervalSet::exact(&Version::try_new("1.0.0").unwrap())),
                ),
            ],
            Cause::Pinned {
                package: name("lib"),
            },
        );
        assert_eq!(
            &Term::positive(IntervalSet::exact(&Version::try_new("1.0.0").unwrap())),
            i.get(&name("lib")).unwrap()
        );
    }
}
