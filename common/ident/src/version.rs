// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ParseError;

/// A semantic version `MAJOR.MINOR.PATCH[-pre][+build]`.
///
/// Ordering follows the semver precedence rules: numeric components first,
/// a pre-release sorts below the plain release, and pre-release identifiers
/// compare piecewise (numeric before alphanumeric). Build metadata does not
/// participate in precedence; it is used only as a final lexicographic
/// tie-break so that the ordering stays total and consistent with equality.
///
/// # Example
///
/// ```
/// # use ident::Version;
/// let a = Version::try_new("1.2.3-alpha.1")?;
/// let b = Version::try_new("1.2.3")?;
/// assert!(a < b);
/// # Ok::<(), ident::ParseError>(())
/// ```
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    prerelease: Vec<PreIdent>,
    build: Vec<String>,
}

/// One dot-separated identifier of a pre-release tag.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum PreIdent {
    Numeric(u64),
    Alphanumeric(String),
}

impl Version {
    /// Parses `text` into a [`Version`].
    pub fn try_new(text: &str) -> Result<Self, ParseError> {
        match parser::version(text) {
            Ok(("", version)) => Ok(version),
            _ => Err(ParseError::InvalidVersion(text.to_owned())),
        }
    }

    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: Vec::new(),
            build: Vec::new(),
        }
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn prerelease(&self) -> &[PreIdent] {
        &self.prerelease
    }

    pub fn is_prerelease(&self) -> bool {
        !self.prerelease.is_empty()
    }

    /// The smallest version of all: `0.0.0-0`.
    pub fn min_value() -> Self {
        Self {
            major: 0,
            minor: 0,
            patch: 0,
            prerelease: vec![PreIdent::Numeric(0)],
            build: Vec::new(),
        }
    }

    /// The first version of the next patch series: `1.2.3` → `1.2.4-0`.
    ///
    /// This is the exclusive upper bound of the `@` interval operator: every
    /// build of `1.2.3` sorts below it and nothing of `1.2.4` does.
    pub fn next_patch(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor,
            patch: self.patch + 1,
            prerelease: vec![PreIdent::Numeric(0)],
            build: Vec::new(),
        }
    }

    /// The first version of the next minor series: `1.2.3` → `1.3.0-0`.
    pub fn next_minor(&self) -> Self {
        Self {
            major: self.major,
            minor: self.minor + 1,
            patch: 0,
            prerelease: vec![PreIdent::Numeric(0)],
            build: Vec::new(),
        }
    }

    /// The first version of the next major series: `1.2.3` → `2.0.0-0`.
    pub fn next_major(&self) -> Self {
        Self {
            major: self.major + 1,
            minor: 0,
            patch: 0,
            prerelease: vec![PreIdent::Numeric(0)],
            build: Vec::new(),
        }
    }

    /// The least version strictly greater than `self` up to build metadata,
    /// i.e. the exclusive upper bound `V+ε` of the exact-match interval.
    ///
    /// For a release this is [`Version::next_patch`]; for a pre-release it
    /// appends the smallest possible identifier (`1.2.3-rc.1` → `1.2.3-rc.1.0`).
    pub fn epsilon_successor(&self) -> Self {
        if self.prerelease.is_empty() {
            return self.next_patch();
        }
        let mut prerelease = self.prerelease.clone();
        prerelease.push(PreIdent::Numeric(0));
        Self {
            major: self.major,
            minor: self.minor,
            patch: self.patch,
            prerelease,
            build: Vec::new(),
        }
    }

    fn precedence_cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.prerelease.is_empty(), other.prerelease.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.prerelease.cmp(&other.prerelease),
            })
    }
}

impl PartialOrd for PreIdent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PreIdent {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PreIdent::Numeric(a), PreIdent::Numeric(b)) => a.cmp(b),
            (PreIdent::Numeric(_), PreIdent::Alphanumeric(_)) => Ordering::Less,
            (PreIdent::Alphanumeric(_), PreIdent::Numeric(_)) => Ordering::Greater,
            (PreIdent::Alphanumeric(a), PreIdent::Alphanumeric(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.precedence_cmp(other)
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl Display for PreIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreIdent::Numeric(n) => write!(f, "{}", n),
            PreIdent::Alphanumeric(s) => f.write_str(s),
        }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        for (i, ident) in self.prerelease.iter().enumerate() {
            f.write_str(if i == 0 { "-" } else { "." })?;
            write!(f, "{}", ident)?;
        }
        for (i, ident) in self.build.iter().enumerate() {
            f.write_str(if i == 0 { "+" } else { "." })?;
            f.write_str(ident)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::try_new(&s).map_err(de::Error::custom)
    }
}

mod parser {
    use nom::branch::alt;
    use nom::bytes::complete::{tag, take_while1};
    use nom::character::complete::digit1;
    use nom::combinator::{map, map_res, opt, recognize, verify};
    use nom::multi::separated_list1;
    use nom::sequence::{preceded, tuple};
    use nom::IResult;

    use super::{PreIdent, Version};

    fn numeric(input: &str) -> IResult<&str, u64> {
        // Leading zeros are not allowed on numeric components.
        map_res(
            verify(digit1, |s: &str| s == "0" || !s.starts_with('0')),
            str::parse,
        )(input)
    }

    fn pre_ident(input: &str) -> IResult<&str, PreIdent> {
        let alnum = verify(
            take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-'),
            |s: &str| {
                // A purely numeric identifier must take the numeric branch so
                // it is compared by value; reject leading zeros there too.
                !s.bytes().all(|b| b.is_ascii_digit())
            },
        );
        alt((
            map(alnum, |s: &str| PreIdent::Alphanumeric(s.to_owned())),
            map(numeric, PreIdent::Numeric),
        ))(input)
    }

    fn build_ident(input: &str) -> IResult<&str, String> {
        map(
            recognize(take_while1(|c: char| c.is_ascii_alphanumeric() || c == '-')),
            str::to_owned,
        )(input)
    }

    pub(super) fn version(input: &str) -> Result<(&str, Version), ()> {
        let result: IResult<&str, Version> = map(
            tuple((
                numeric,
                preceded(tag("."), numeric),
                preceded(tag("."), numeric),
                opt(preceded(tag("-"), separated_list1(tag("."), pre_ident))),
                opt(preceded(tag("+"), separated_list1(tag("."), build_ident))),
            )),
            |(major, minor, patch, prerelease, build)| Version {
                major,
                minor,
                patch,
                prerelease: prerelease.unwrap_or_default(),
                build: build.unwrap_or_default(),
            },
        )(input);
        result.map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_and_formats() -> Result<(), ParseError> {
        let cases = [
            "0.0.0",
            "1.2.3",
            "10.20.30",
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-0.3.7",
            "1.0.0-x-y-z.0",
            "1.2.3+build.5",
            "1.2.3-rc.1+sha.abc123",
        ];
        for case in cases {
            let version = Version::try_new(case)?;
            assert_eq!(case, version.to_string(), "case: {}", case);
        }
        Ok(())
    }

    #[test]
    fn rejects_malformed() {
        for case in [
            "", "1", "1.2", "1.2.3.4", "01.2.3", "1.02.3", "1.2.3-", "1.2.3-.", "1.2.3-01",
            "1.2.3+", "v1.2.3", "1.2.3 ", " 1.2.3",
        ] {
            assert!(Version::try_new(case).is_err(), "case: {:?}", case);
        }
    }

    #[test]
    fn ordering_follows_semver() -> Result<(), ParseError> {
        // The canonical ascending chain from the semver spec.
        let chain = [
            "1.0.0-alpha",
            "1.0.0-alpha.1",
            "1.0.0-alpha.beta",
            "1.0.0-beta",
            "1.0.0-beta.2",
            "1.0.0-beta.11",
            "1.0.0-rc.1",
            "1.0.0",
            "2.0.0",
            "2.1.0",
            "2.1.1",
        ];
        for pair in chain.windows(2) {
            let a = Version::try_new(pair[0])?;
            let b = Version::try_new(pair[1])?;
            assert!(a < b, "{} < {}", a, b);
        }
        Ok(())
    }

    #[test]
    fn successor_bounds() -> Result<(), ParseError> {
        let v = Version::try_new("1.2.3")?;
        assert_eq!("1.2.4-0", v.next_patch().to_string());
        assert_eq!("1.3.0-0", v.next_minor().to_string());
        assert_eq!("2.0.0-0", v.next_major().to_string());
        assert_eq!("1.2.4-0", v.epsilon_successor().to_string());

        // Nothing fits between a version and its epsilon successor.
        assert!(v < v.epsilon_successor());
        assert!(v.epsilon_successor() < Version::try_new("1.2.4")?);

        let pre = Version::try_new("1.2.3-rc.1")?;
        assert_eq!("1.2.3-rc.1.0", pre.epsilon_successor().to_string());
        assert!(pre < pre.epsilon_successor());
        assert!(pre.epsilon_successor() < Version::try_new("1.2.3-rc.2")?);
        Ok(())
    }

    #[test]
    fn min_value_is_minimal() -> Result<(), ParseError> {
        let min = Version::min_value();
        for case in ["0.0.0", "0.0.0-0.0", "0.0.1", "1.0.0-alpha"] {
            assert!(min < Version::try_new(case)?, "case: {}", case);
        }
        Ok(())
    }

    proptest! {
        #[test]
        fn roundtrip(
            major in 0u64..1000,
            minor in 0u64..1000,
            patch in 0u64..1000,
            pre in proptest::option::of("[1-9][0-9]{0,3}|[a-z]{1,6}"),
            build in proptest::option::of("[a-z0-9]{1,8}"),
        ) {
            let mut text = format!("{major}.{minor}.{patch}");
            if let Some(pre) = pre {
                text.push('-');
                text.push_str(&pre);
            }
            if let Some(build) = build {
                text.push('+');
                text.push_str(&build);
            }
            let version = Version::try_new(&text).unwrap();
            prop_assert_eq!(text, version.to_string());
        }
    }
}
