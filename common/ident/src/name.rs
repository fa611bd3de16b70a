// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::borrow::Borrow;
use std::fmt::{self, Display};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ParseError;

/// Regular expression matching a valid package or library name.
static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").unwrap());

/// Maximum length of a name in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// A package or library name.
///
/// A name is a non-empty ASCII token matching `[a-z0-9][a-z0-9._-]*` of at
/// most 64 bytes.
///
/// # Example
///
/// ```
/// # use ident::Name;
/// assert!("zlib".parse::<Name>().is_ok());
/// assert!("neo-sqlite3".parse::<Name>().is_ok());
/// assert!("Invalid Name".parse::<Name>().is_err());
/// ```
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Name(String);

impl Name {
    /// Validates `text` and returns it as a [`Name`].
    pub fn try_new(text: &str) -> Result<Self, ParseError> {
        if text.len() > MAX_NAME_LEN || !NAME_RE.is_match(text) {
            return Err(ParseError::InvalidName(text.to_owned()));
        }
        Ok(Self(text.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Name {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::try_new(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        for name in ["a", "zlib", "neo-sqlite3", "boost.asio", "c99_helpers", "7zip"] {
            assert!(Name::try_new(name).is_ok(), "name: {}", name);
        }
    }

    #[test]
    fn rejects_invalid_names() {
        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        for name in [
            "",
            "Zlib",
            "invalid name",
            "-leading-dash",
            ".leading-dot",
            "_leading_underscore",
            "trailing space ",
            "ünïcode",
            too_long.as_str(),
        ] {
            assert!(Name::try_new(name).is_err(), "name: {:?}", name);
        }
    }

    #[test]
    fn max_length_is_accepted() {
        let name = "a".repeat(MAX_NAME_LEN);
        assert!(Name::try_new(&name).is_ok());
    }
}
