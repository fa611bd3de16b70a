// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeSet;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{IntervalSet, Name, ParseError, Version};

/// Interval operators of dependency expressions.
///
/// Each operator maps a base version `V` to a half-open interval:
///
/// | op  | interval            |
/// |-----|---------------------|
/// | `=` | `[V, V+ε)`          |
/// | `@` | `[V, next-patch)`   |
/// | `~` | `[V, next-minor)`   |
/// | `^` | `[V, next-major)`   |
/// | `+` | `[V, ∞)`            |
///
/// A bare space separator (`name V`) is accepted on input and reads as `^`.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    Hash,
    PartialEq,
    strum_macros::AsRefStr,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum IntervalOp {
    #[strum(serialize = "=")]
    Exact,
    #[strum(serialize = "@")]
    SamePatch,
    #[strum(serialize = "~")]
    SameMinor,
    #[strum(serialize = "^")]
    SameMajor,
    #[strum(serialize = "+")]
    AtLeast,
}

impl IntervalOp {
    /// The interval selected by this operator anchored at `version`.
    pub fn interval(self, version: &Version) -> IntervalSet {
        match self {
            IntervalOp::Exact => IntervalSet::exact(version),
            IntervalOp::SamePatch => {
                IntervalSet::of(version.clone(), Some(version.next_patch()))
            }
            IntervalOp::SameMinor => {
                IntervalSet::of(version.clone(), Some(version.next_minor()))
            }
            IntervalOp::SameMajor => {
                IntervalSet::of(version.clone(), Some(version.next_major()))
            }
            IntervalOp::AtLeast => IntervalSet::at_least(version.clone()),
        }
    }
}

/// A dependency expression: `name interval-op version ["using" libs]`.
///
/// Omitting `using` means "the library with the same name as the package";
/// that default is applied by the consumer, not stored here.
///
/// # Example
///
/// ```
/// # use ident::DepExpr;
/// let dep: DepExpr = "fmt^9.1.0 using fmt,fmt-header-only".parse()?;
/// assert_eq!("fmt", dep.name().as_str());
/// assert_eq!(2, dep.uses().len());
/// # Ok::<(), ident::ParseError>(())
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DepExpr {
    name: Name,
    op: IntervalOp,
    version: Version,
    uses: BTreeSet<Name>,
}

impl DepExpr {
    pub fn new(name: Name, op: IntervalOp, version: Version, uses: BTreeSet<Name>) -> Self {
        Self {
            name,
            op,
            version,
            uses,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn op(&self) -> IntervalOp {
        self.op
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The explicitly requested libraries of the dependency.
    pub fn uses(&self) -> &BTreeSet<Name> {
        &self.uses
    }

    /// The requested libraries, defaulted to the package-named library.
    pub fn effective_uses(&self) -> BTreeSet<Name> {
        if self.uses.is_empty() {
            BTreeSet::from([self.name.clone()])
        } else {
            self.uses.clone()
        }
    }

    pub fn interval_set(&self) -> IntervalSet {
        self.op.interval(&self.version)
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.interval_set().contains(version)
    }
}

impl FromStr for DepExpr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::InvalidDepExpr(s.to_owned());

        let (spec, uses) = match s.split_once(" using ") {
            Some((spec, list)) => {
                let mut uses = BTreeSet::new();
                for item in list.split(',') {
                    let name = Name::try_new(item.trim()).map_err(|_| err())?;
                    uses.insert(name);
                }
                if uses.is_empty() {
                    return Err(err());
                }
                (spec, uses)
            }
            None => (s, BTreeSet::new()),
        };

        let spec = spec.trim_end();
        const OP_CHARS: &[char] = &['=', '@', '~', '^', '+', ' '];
        let (name, op, version) = match spec.find(OP_CHARS) {
            Some(pos) => {
                let (name, rest) = spec.split_at(pos);
                let op_char = &rest[..1];
                // A space separator reads as the compatible-range default.
                let op = if op_char == " " {
                    IntervalOp::SameMajor
                } else {
                    op_char.parse::<IntervalOp>().map_err(|_| err())?
                };
                (name, op, rest[1..].trim_start())
            }
            None => return Err(err()),
        };

        let name = Name::try_new(name).map_err(|_| err())?;
        let version = Version::try_new(version).map_err(|_| err())?;
        Ok(Self {
            name,
            op,
            version,
            uses,
        })
    }
}

impl Display for DepExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, self.version)?;
        if !self.uses.is_empty() {
            f.write_str(" using ")?;
            for (i, name) in self.uses.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}", name)?;
            }
        }
        Ok(())
    }
}

impl Serialize for DepExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DepExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
