// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Validation of manifest license strings against the embedded SPDX
//! identifier set.
//!
//! Only the simple expression form `ID (AND|OR ID)*` is accepted. The
//! identifier table is the commonly-seen subset of the SPDX license list;
//! it is a collaborator contract, not a complete mirror of the list.

use crate::error::{Error, ErrorKind, Result};

/// Embedded SPDX license identifiers, sorted for binary search.
const SPDX_IDS: &[&str] = &[
    "0BSD",
    "AFL-3.0",
    "AGPL-3.0-only",
    "AGPL-3.0-or-later",
    "Apache-1.1",
    "Apache-2.0",
    "Artistic-2.0",
    "BSD-1-Clause",
    "BSD-2-Clause",
    "BSD-2-Clause-Patent",
    "BSD-3-Clause",
    "BSD-3-Clause-Clear",
    "BSD-4-Clause",
    "BSL-1.0",
    "CC-BY-3.0",
    "CC-BY-4.0",
    "CC-BY-SA-4.0",
    "CC0-1.0",
    "CDDL-1.0",
    "CECILL-2.1",
    "CPL-1.0",
    "ECL-2.0",
    "EPL-1.0",
    "EPL-2.0",
    "EUPL-1.2",
    "GFDL-1.3-only",
    "GFDL-1.3-or-later",
    "GPL-2.0-only",
    "GPL-2.0-or-later",
    "GPL-3.0-only",
    "GPL-3.0-or-later",
    "ISC",
    "LGPL-2.0-only",
    "LGPL-2.0-or-later",
    "LGPL-2.1-only",
    "LGPL-2.1-or-later",
    "LGPL-3.0-only",
    "LGPL-3.0-or-later",
    "MIT",
    "MIT-0",
    "MPL-1.1",
    "MPL-2.0",
    "MS-PL",
    "MS-RL",
    "NCSA",
    "OFL-1.1",
    "OSL-3.0",
    "PostgreSQL",
    "Python-2.0",
    "Ruby",
    "Unicode-DFS-2016",
    "Unlicense",
    "Vim",
    "W3C",
    "WTFPL",
    "Zlib",
    "zlib-acknowledgement",
];

/// Checks whether `id` is a known SPDX license identifier.
pub fn is_known_id(id: &str) -> bool {
    SPDX_IDS.binary_search(&id).is_ok()
}

/// Validates a license expression of the form `ID (AND|OR ID)*`.
pub fn validate(expr: &str) -> Result<()> {
    let mut expect_id = true;
    let mut saw_any = false;
    for token in expr.split_ascii_whitespace() {
        if expect_id {
            if !is_known_id(token) {
                return Err(Error::new(
                    ErrorKind::InvalidSpdx,
                    format!("unknown SPDX license identifier {:?} in {:?}", token, expr),
                ));
            }
            saw_any = true;
        } else if token != "AND" && token != "OR" {
            return Err(Error::new(
                ErrorKind::InvalidSpdx,
                format!("expected AND or OR, found {:?} in {:?}", token, expr),
            ));
        }
        expect_id = !expect_id;
    }
    if !saw_any || expect_id {
        return Err(Error::new(
            ErrorKind::InvalidSpdx,
            format!("malformed SPDX license expression {:?}", expr),
        ));
    }
    Ok(())
}
