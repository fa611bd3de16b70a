// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! End-to-end build scenarios over scratch projects.
//!
//! Scenarios that invoke a real compiler are skipped when the host has no
//! GNU-like toolchain on PATH.

use std::collections::BTreeMap;
use std::path::Path;

use kiln::build::{self, BuildOptions};
use kiln::manifest::Manifest;
use kiln::plan::{self, BuildPlan};
use kiln::store::PackageStore;
use kiln::toolchain::Toolchain;
use kiln::transport::HttpTransport;
use testutil::ScratchProject;

/// A syntactically valid toolchain that never touches PATH, for scenarios
/// that finish before any subprocess would run.
fn offline_toolchain(dir: &Path) -> Toolchain {
    let path = dir.join("toolchain.toml");
    std::fs::write(&path, "family = \"gnu-like\"\n").unwrap();
    Toolchain::load(&path).unwrap()
}

fn host_toolchain() -> Option<Toolchain> {
    match Toolchain::host_default() {
        Ok(toolchain) => Some(toolchain),
        Err(_) => {
            eprintln!("no host toolchain; skipping");
            None
        }
    }
}

/// Materializes a plan for a project with no dependencies.
fn plan_project(dir: &Path) -> kiln::Result<(Manifest, BuildPlan)> {
    let manifest = Manifest::load_dir(dir)?;
    let cache = tempfile::tempdir().unwrap();
    let store = PackageStore::open(cache.path())?;
    let plan = plan::materialize(
        dir,
        &manifest,
        &BTreeMap::new(),
        &store,
        &HttpTransport::new(),
    )?;
    Ok((manifest, plan))
}

fn quiet_options() -> BuildOptions {
    BuildOptions {
        jobs: Some(2),
        ..BuildOptions::default()
    }
}

#[test]
fn empty_project_builds() -> kiln::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    ScratchProject::create(dir.path(), "name = \"empty\"\nversion = \"0.1.0\"\n").unwrap();

    let (_, plan) = plan_project(dir.path())?;
    // No sources means no nodes and no artifacts; the build still succeeds
    // without consulting any real compiler.
    let toolchain = offline_toolchain(dir.path());
    let out = dir.path().join("_build");
    let report = build::build(&plan, &toolchain, &out, &quiet_options())?;
    assert_eq!(0, report.compiled);
    assert!(out.join("compile_commands.json").is_file());
    assert!(!out.join("empty").join("empty.a").exists());
    Ok(())
}

#[test]
fn invalid_name_fails_any_load() {
    let dir = tempfile::tempdir().unwrap();
    ScratchProject::create(dir.path(), "name = \"invalid name\"\nversion = \"0.1.0\"\n")
        .unwrap();
    let err = Manifest::load_dir(dir.path()).unwrap_err();
    assert_eq!("invalid-name", err.marker());
}

#[test]
fn simple_library_with_passing_test() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"foo\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    project
        .file("src/foo.hpp", "#pragma once\nint answer();\n")
        .unwrap();
    project
        .file("src/foo.cpp", "#include \"foo.hpp\"\nint answer() { return 42; }\n")
        .unwrap();
    project
        .file(
            "src/foo.test.cpp",
            "#include \"foo.hpp\"\nint main() { return answer() == 42 ? 0 : 1; }\n",
        )
        .unwrap();

    let (_, plan) = plan_project(dir.path())?;
    let out = dir.path().join("_build");
    build::build(&plan, &toolchain, &out, &quiet_options())?;

    assert!(out.join("foo").join("foo.a").is_file());
    assert!(out.join("test").join("foo").is_file());
    Ok(())
}

#[test]
fn failing_test_reports_tests_failed() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"foo\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    project
        .file("src/foo.test.cpp", "int main() { return 2; }\n")
        .unwrap();

    let (_, plan) = plan_project(dir.path())?;
    let err = build::build(&plan, &toolchain, &dir.path().join("_build"), &quiet_options())
        .unwrap_err();
    assert_eq!("build-failed-tests-failed", err.marker());
    Ok(())
}

#[test]
fn second_build_compiles_nothing() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"foo\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    project.file("src/a.cpp", "int a() { return 1; }\n").unwrap();
    project.file("src/b.cpp", "int b() { return 2; }\n").unwrap();

    let options = BuildOptions {
        run_tests: false,
        ..quiet_options()
    };
    let (_, plan) = plan_project(dir.path())?;
    let out = dir.path().join("_build");

    let first = build::build(&plan, &toolchain, &out, &options)?;
    assert!(first.compiled > 0);

    let second = build::build(&plan, &toolchain, &out, &options)?;
    assert_eq!(0, second.compiled, "ran: {:?}", second.ran_labels);
    Ok(())
}

#[test]
fn touching_one_source_recompiles_only_it() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"foo\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    project.file("src/a.cpp", "int a() { return 1; }\n").unwrap();
    project.file("src/b.cpp", "int b() { return 2; }\n").unwrap();

    let options = BuildOptions {
        run_tests: false,
        ..quiet_options()
    };
    let (_, plan) = plan_project(dir.path())?;
    let out = dir.path().join("_build");
    build::build(&plan, &toolchain, &out, &options)?;

    // A content change (different size, so even coarse timestamps cannot
    // hide it) to exactly one file.
    project
        .file("src/a.cpp", "int a() { return 100; }\n")
        .unwrap();
    let report = build::build(&plan, &toolchain, &out, &options)?;

    let compiles: Vec<&String> = report
        .ran_labels
        .iter()
        .filter(|l| l.starts_with("compile"))
        .collect();
    assert_eq!(1, compiles.len(), "ran: {:?}", report.ran_labels);
    assert!(compiles[0].contains("a.cpp"), "ran: {:?}", report.ran_labels);
    Ok(())
}

#[test]
fn header_change_recompiles_the_closure() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"foo\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    project
        .file("src/common.hpp", "#pragma once\nconstexpr int K = 1;\n")
        .unwrap();
    project
        .file("src/uses_header.cpp", "#include \"common.hpp\"\nint u() { return K; }\n")
        .unwrap();
    project
        .file("src/standalone.cpp", "int s() { return 0; }\n")
        .unwrap();

    let options = BuildOptions {
        run_tests: false,
        ..quiet_options()
    };
    let (_, plan) = plan_project(dir.path())?;
    let out = dir.path().join("_build");
    build::build(&plan, &toolchain, &out, &options)?;

    project
        .file("src/common.hpp", "#pragma once\nconstexpr int K = 2000;\n")
        .unwrap();
    let report = build::build(&plan, &toolchain, &out, &options)?;

    let compiles: Vec<&String> = report
        .ran_labels
        .iter()
        .filter(|l| l.starts_with("compile"))
        .collect();
    assert_eq!(1, compiles.len(), "ran: {:?}", report.ran_labels);
    assert!(
        compiles[0].contains("uses_header.cpp"),
        "ran: {:?}",
        report.ran_labels
    );
    Ok(())
}

#[test]
fn undeclared_sibling_include_is_rejected_before_compiling() -> kiln::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let manifest = r#"
name = "proj"
version = "0.1.0"

[[libraries]]
name = "x"

[[libraries]]
name = "y"
"#;
    let project = ScratchProject::create(dir.path(), manifest).unwrap();
    project
        .file(
            "libs/x/include/x/x.hpp",
            "#pragma once\n#include \"y/y.hpp\"\n",
        )
        .unwrap();
    project.file("libs/x/src/x.cpp", "#include \"x/x.hpp\"\n").unwrap();
    project
        .file("libs/y/include/y/y.hpp", "#pragma once\n")
        .unwrap();
    project.file("libs/y/src/y.cpp", "int y;\n").unwrap();

    let (_, plan) = plan_project(dir.path())?;
    // No compiler involvement: the violation is caught while building the
    // node graph.
    let toolchain = offline_toolchain(dir.path());
    let err = build::build(&plan, &toolchain, &dir.path().join("_build"), &quiet_options())
        .unwrap_err();
    assert_eq!("missing-using-declaration", err.marker());
    Ok(())
}

#[test]
fn declared_sibling_include_is_fine() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let manifest = r#"
name = "proj"
version = "0.1.0"

[[libraries]]
name = "x"
using = ["y"]

[[libraries]]
name = "y"
"#;
    let project = ScratchProject::create(dir.path(), manifest).unwrap();
    project
        .file(
            "libs/x/include/x/x.hpp",
            "#pragma once\n#include \"y/y.hpp\"\nint xf();\n",
        )
        .unwrap();
    project
        .file("libs/x/src/x.cpp", "#include \"x/x.hpp\"\nint xf() { return yv(); }\n")
        .unwrap();
    project
        .file(
            "libs/y/include/y/y.hpp",
            "#pragma once\ninline int yv() { return 7; }\n",
        )
        .unwrap();
    project
        .file("libs/y/src/y.cpp", "#include \"y/y.hpp\"\n")
        .unwrap();

    let (_, plan) = plan_project(dir.path())?;
    build::build(
        &plan,
        &toolchain,
        &dir.path().join("_build"),
        &quiet_options(),
    )?;
    Ok(())
}

#[test]
fn broken_public_header_fails_the_isolation_check() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"foo\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    // The header only compiles after something else defined the type; on
    // its own it is broken.
    project
        .file(
            "include/foo/broken.hpp",
            "#pragma once\nint frob(undeclared_type t);\n",
        )
        .unwrap();
    project.file("src/foo.cpp", "int ok;\n").unwrap();

    let (_, plan) = plan_project(dir.path())?;
    let err = build::build(&plan, &toolchain, &dir.path().join("_build"), &quiet_options())
        .unwrap_err();
    assert_eq!("syntax-check-failed", err.marker());
    Ok(())
}

#[test]
fn app_source_produces_an_executable() -> kiln::Result<()> {
    let Some(toolchain) = host_toolchain() else {
        return Ok(());
    };
    let dir = tempfile::tempdir().unwrap();
    let project = ScratchProject::create(
        dir.path(),
        "name = \"tool\"\nversion = \"0.1.0\"\n",
    )
    .unwrap();
    project
        .file("src/tool.hpp", "#pragma once\nint run();\n")
        .unwrap();
    project
        .file("src/tool.cpp", "#include \"tool.hpp\"\nint run() { return 0; }\n")
        .unwrap();
    project
        .file(
            "src/frob.main.cpp",
            "#include \"tool.hpp\"\nint main() { return run(); }\n",
        )
        .unwrap();

    let (_, plan) = plan_project(dir.path())?;
    let out = dir.path().join("_build");
    build::build(&plan, &toolchain, &out, &quiet_options())?;
    assert!(out.join("frob").is_file());
    Ok(())
}
