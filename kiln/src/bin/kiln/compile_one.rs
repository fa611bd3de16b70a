// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use kiln::build;
use kiln::plan;
use kiln::store::PackageStore;
use kiln::toolchain::Toolchain;
use kiln::transport::HttpTransport;

use crate::common::ProjectArgs;

#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub project: ProjectArgs,

    /// The source file to compile.
    pub source: PathBuf,

    /// Build output directory (default: <project>/_build).
    #[arg(short = 'o', long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Toolchain description file.
    #[arg(short = 't', long, value_name = "FILE")]
    pub toolchain: Option<PathBuf>,
}

pub fn compile_one_main(args: Args) -> kiln::Result<()> {
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
    let build_root = args
        .out
        .unwrap_or_else(|| args.project.project.join("_build"));
    build::compile_one(
        &plan,
        &toolchain,
        &build_root,
        &args.source,
        &build::BuildOptions::default(),
    )
}
