// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! End-to-end flows across the index, solver, store and build graph,
//! against scratch repositories served over `file://`.

use std::path::Path;
use std::time::Duration;

use kiln::build::{self, BuildOptions};
use kiln::index::{RefreshPolicy, RepositorySet};
use kiln::manifest::Manifest;
use kiln::plan;
use kiln::solver;
use kiln::store::PackageStore;
use kiln::toolchain::Toolchain;
use kiln::transport::HttpTransport;
use testutil::{RepoPackage, ScratchProject, ScratchRepo};
use url::Url;

fn no_backoff() -> RefreshPolicy {
    RefreshPolicy {
        attempts: 1,
        initial_backoff: Duration::from_millis(0),
    }
}

fn open_repos(cache: &Path, repo: &ScratchRepo) -> kiln::Result<RepositorySet> {
    let mut repos = RepositorySet::open(cache)?.with_policy(no_backoff());
    let url = Url::parse(&repo.url()).unwrap();
    repos.add(&url, &HttpTransport::new())?;
    Ok(repos)
}

#[test]
fn pkg_rev_supersedes_end_to_end() -> kiln::Result<()> {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = ScratchRepo::create(&dir.path().join("repo"), "testrepo").unwrap();

    // Revision 1 carries broken sources; revision 2 fixes them without
    // changing the version.
    repo.add(
        RepoPackage::simple("widget@1.2.3~1", &[])
            .with_file("src/widget.cpp", "this does not compile\n"),
    )
    .unwrap();
    repo.add(
        RepoPackage::simple("widget@1.2.3~2", &[])
            .with_file("src/widget.cpp", "int widget() { return 1; }\n"),
    )
    .unwrap();

    let cache = dir.path().join("cache");
    let repos = open_repos(&cache, &repo)?;

    let roots = vec!["widget@1.2.3".parse().unwrap()];
    let solution = solver::solve(&roots, &repos.catalog(), &[])?;
    assert_eq!(
        "widget@1.2.3~2",
        solution.values().next().unwrap().id.to_string()
    );

    // Materialize and check the good revision's sources landed.
    let project_dir = dir.path().join("proj");
    ScratchProject::create(
        &project_dir,
        "name = \"app\"\nversion = \"0.1.0\"\ndependencies = [\"widget@1.2.3\"]\n",
    )
    .unwrap();
    let manifest = Manifest::load_dir(&project_dir)?;
    let store = PackageStore::open(&cache)?;
    plan::materialize(
        &project_dir,
        &manifest,
        &solution,
        &store,
        &HttpTransport::new(),
    )?;
    let unpacked = store.package_dir(&solution.values().next().unwrap().id);
    let source = std::fs::read_to_string(unpacked.join("src/widget.cpp")).unwrap();
    assert!(source.contains("return 1"), "unexpected sources: {}", source);
    Ok(())
}

#[test]
fn unsolvable_diamond_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut repo = ScratchRepo::create(&dir.path().join("repo"), "testrepo").unwrap();
    repo.add(RepoPackage::simple("liba@1.0.0~1", &["common=1.2.3"]))
        .unwrap();
    repo.add(RepoPackage::simple("libb@1.0.0~1", &["common=2.0.0"]))
        .unwrap();
    repo.add(RepoPackage::simple("common@1.2.3~1", &[])).unwrap();
    repo.add(RepoPackage::simple("common@2.0.0~1", &[])).unwrap();

    let cache = dir.path().join("cache");
    let repos = open_repos(&cache, &repo).unwrap();

    let roots = vec![
        "liba^1.0.0".parse().unwrap(),
        "libb^1.0.0".parse().unwrap(),
    ];
    let err = solver::solve(&roots, &repos.catalog(), &[]).unwrap_err();
    assert_eq!("no-dependency-solution", err.marker());
    for package in ["liba", "libb", "common"] {
        assert!(
            err.message().contains(package),
            "explanation should mention {:?}:\n{}",
            package,
            err.message()
        );
    }
}

#[test]
fn project_builds_against_a_fetched_dependency() -> kiln::Result<()> {
    let toolchain = match Toolchain::host_default() {
        Ok(toolchain) => toolchain,
        Err(_) => {
            eprintln!("no host toolchain; skipping");
            return Ok(());
        }
    };

    let dir = tempfile::tempdir().unwrap();
    let mut repo = ScratchRepo::create(&dir.path().join("repo"), "testrepo").unwrap();
    repo.add(
        RepoPackage::simple("mathkit@1.0.0~1", &[])
            .with_file(
                "include/mathkit/mathkit.hpp",
                "#pragma once\nint triple(int x);\n",
            )
            .with_file(
                "src/mathkit.cpp",
                "#include <mathkit/mathkit.hpp>\nint triple(int x) { return 3 * x; }\n",
            ),
    )
    .unwrap();

    let project_dir = dir.path().join("proj");
    let project = ScratchProject::create(
        &project_dir,
        "name = \"app\"\nversion = \"0.1.0\"\ndependencies = [\"mathkit^1.0.0\"]\n\n[lib]\nusing = [\"mathkit\"]\n",
    )
    .unwrap();
    project
        .file(
            "src/app.test.cpp",
            "#include <mathkit/mathkit.hpp>\nint main() { return triple(2) == 6 ? 0 : 1; }\n",
        )
        .unwrap();

    let cache = dir.path().join("cache");
    let repos = open_repos(&cache, &repo)?;
    let manifest = Manifest::load_dir(&project_dir)?;
    let solution = solver::solve(
        &manifest.all_dependencies(true),
        &repos.catalog(),
        &[],
    )?;

    let store = PackageStore::open(&cache)?;
    let plan = plan::materialize(
        &project_dir,
        &manifest,
        &solution,
        &store,
        &HttpTransport::new(),
    )?;

    let out = project_dir.join("_build");
    build::build(
        &plan,
        &toolchain,
        &out,
        &BuildOptions {
            jobs: Some(2),
            ..BuildOptions::default()
        },
    )?;
    // The dependency's archive and the passing test both exist.
    assert!(out.join("mathkit").join("mathkit.a").is_file());
    assert!(out.join("test").join("app").is_file());
    Ok(())
}
