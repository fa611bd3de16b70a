// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Linearization of a failed solve's derivation graph into the
//! human-readable explanation carried by `no-dependency-solution`.

use std::fmt::Write as _;

use super::incompat::{Cause, IncompId, Incompatibility};

/// Walks the derivation graph rooted at `root` and produces a linearized
/// explanation: one "because …" step per derivation, ending at the terminal
/// incompatibility.
pub fn explain(root: IncompId, store: &[Incompatibility]) -> String {
    let mut lines = Vec::new();
    build(root, store, &mut lines);
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{}", line);
    }
    out
}

fn build(id: IncompId, store: &[Incompatibility], lines: &mut Vec<String>) {
    let incompat = &store[id];
    let Cause::Derived { left, right } = incompat.cause() else {
        // An external incompatibility is terminal on its own.
        lines.push(format!("{}.", capitalize(&sentence(id, store))));
        return;
    };
    let (left, right) = (*left, *right);
    match (store[left].is_derived(), store[right].is_derived()) {
        (false, false) => {
            lines.push(format!(
                "Because {} and {}, {}.",
                sentence(left, store),
                sentence(right, store),
                conclusion(incompat)
            ));
        }
        (true, false) => {
            build(left, store, lines);
            lines.push(format!(
                "And because {}, {}.",
                sentence(right, store),
                conclusion(incompat)
            ));
        }
        (false, true) => {
            build(right, store, lines);
            lines.push(format!(
                "And because {}, {}.",
                sentence(left, store),
                conclusion(incompat)
            ));
        }
        (true, true) => {
            build(left, store, lines);
            build(right, store, lines);
            lines.push(format!(
                "Thus, {}.",
                conclusion(incompat)
            ));
        }
    }
}

/// Renders one incompatibility as a clause usable after "because".
fn sentence(id: IncompId, store: &[Incompatibility]) -> String {
    let incompat = &store[id];
    match incompat.cause() {
        Cause::Root { dep } => format!("the project requires {}", dep),
        Cause::Dependency { depender, dep } => format!("{} depends on {}", depender, dep),
        Cause::NoVersions { package, set } => {
            format!("no version of {} matches {}", package, set)
        }
        Cause::MissingLibrary {
            package,
            library,
            requester,
        } => {
            let who = match requester {
                Some(id) => id.to_string(),
                None => "the project".to_owned(),
            };
            match incompat.get(package) {
                Some(term) => format!(
                    "{} requires library {} of {}, which versions {} do not provide",
                    who,
                    library,
                    package,
                    term.set()
                ),
                None => format!("{} requires library {} of {}", who, library, package),
            }
        }
        Cause::Pinned { package } => match incompat.get(package) {
            Some(term) => format!("{} is pinned to {}", package, term.set()),
            None => format!("{} is pinned", package),
        },
        Cause::Derived { .. } => conclusion(incompat),
    }
}

/// Renders what a derived incompatibility forbids.
fn conclusion(incompat: &Incompatibility) -> String {
    if incompat.is_failure() {
        return "version solving failed".to_owned();
    }
    let terms: Vec<_> = incompat.terms().iter().collect();
    match terms.as_slice() {
        [(package, term)] if term.is_positive() => {
            format!("{} {} is forbidden", package, term.set())
        }
        [(package, term)] => format!("{} must match {}", package, term.set()),
        [(p1, t1), (p2, t2)] if t1.is_positive() && !t2.is_positive() => {
            format!(
                "if {} {} then {} must match {}",
                p1,
                t1.set(),
                p2,
                t2.set()
            )
        }
        [(p1, t1), (p2, t2)] if !t1.is_positive() && t2.is_positive() => {
            format!(
                "if {} {} then {} must match {}",
                p2,
                t2.set(),
                p1,
                t1.set()
            )
        }
        [(p1, t1), (p2, t2)] if t1.is_positive() && t2.is_positive() => {
            format!(
                "{} {} is incompatible with {} {}",
                p1,
                t1.set(),
                p2,
                t2.set()
            )
        }
        _ => {
            let mut out = String::new();
            for (i, (package, term)) in terms.iter().enumerate() {
                if i > 0 {
                    out.push_str(" and ");
                }
                let _ = write!(out, "{} {}", package, term);
            }
            out.push_str(" cannot all hold");
            out
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
