// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::{Name, ParseError, Version};

/// A globally unique package identity: `(name, version, pkg-rev)`.
///
/// Rendered as `name@version~rev`, e.g. `zlib@1.2.13~2`. A higher `pkg-rev`
/// with identical `(name, version)` supersedes a lower one for the same
/// source content.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct PackageId {
    name: Name,
    version: Version,
    rev: u32,
}

impl PackageId {
    pub fn new(name: Name, version: Version, rev: u32) -> Self {
        Self { name, version, rev }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn rev(&self) -> u32 {
        self.rev
    }
}

impl Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}~{}", self.name, self.version, self.rev)
    }
}

impl FromStr for PackageId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError::InvalidPackageId(s.to_owned());
        let (name, rest) = s.split_once('@').ok_or_else(err)?;
        let (version, rev) = rest.rsplit_once('~').ok_or_else(err)?;

        let name = Name::try_new(name).map_err(|_| err())?;
        let version = Version::try_new(version).map_err(|_| err())?;
        let rev: u32 = rev.parse().map_err(|_| err())?;
        if rev == 0 {
            return Err(err());
        }
        Ok(Self { name, version, rev })
    }
}

impl Serialize for PackageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
