// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;
use std::time::Duration;

use kiln::build::{self, BuildOptions, KeyMode};
use kiln::plan;
use kiln::store::PackageStore;
use kiln::toolchain::Toolchain;
use kiln::transport::HttpTransport;

use crate::common::ProjectArgs;

#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// Build output directory (default: <project>/_build).
    #[arg(short = 'o', long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Toolchain description file.
    #[arg(short = 't', long, value_name = "FILE")]
    pub toolchain: Option<PathBuf>,

    /// Worker count (default: toolchain parallelism, CPU count + 2).
    #[arg(short = 'j', long, value_name = "N")]
    pub jobs: Option<usize>,

    /// Continue past failures instead of stopping dispatch.
    #[arg(long)]
    pub keep_going: bool,

    /// Use content hashes instead of (mtime, size) for cache keys.
    #[arg(long)]
    pub strict_keys: bool,

    /// Skip building and running tests.
    #[arg(long)]
    pub no_tests: bool,

    /// Per-test wall-clock timeout in seconds (0 disables the timeout).
    #[arg(long, value_name = "SECONDS")]
    pub test_timeout: Option<u64>,
}

impl Args {
    pub fn build_root(&self) -> PathBuf {
        self.out
            .clone()
            .unwrap_or_else(|| self.project.project.join("_build"))
    }

    pub fn options(&self) -> BuildOptions {
        let defaults = BuildOptions::default();
        BuildOptions {
            jobs: self.jobs,
            keep_going: self.keep_going,
            key_mode: if self.strict_keys {
                KeyMode::Strict
            } else {
                KeyMode::Fast
            },
            run_tests: !self.no_tests,
            test_timeout: match self.test_timeout {
                Some(0) => None,
                Some(seconds) => Some(Duration::from_secs(seconds)),
                None => defaults.test_timeout,
            },
        }
    }
}

pub fn build_main(args: Args) -> kiln::Result<()> {
    let manifest = args.project.manifest()?;
    let transport = HttpTransport::new();
    let repos = args.project.repositories(&transport)?;
    let solution = args.project.solve(&manifest, &repos)?;

    let store = PackageStore::open(&args.project.cache_root()?)?;
    let plan = plan::materialize(
        &args.project.project,
        &manifest,
        &solution,
        &store,
        &transport,
    )?;

    let toolchain = Toolchain::discover(&args.project.project, args.toolchain.as_deref())?;
    let report = build::build(&plan, &toolchain, &args.build_root(), &args.options())?;

    println!(
        "build ok: {} ran, {} up to date",
        report.compiled, report.up_to_date
    );
    Ok(())
}
