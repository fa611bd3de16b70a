// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod build;
mod common;
mod compile_one;
mod fetch;
mod pkg_archive;
mod repo;
mod solve;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "kiln")]
#[command(about = "A source-based C/C++ package manager and build driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resolves the project's dependencies and prints the chosen packages.
    Solve(solve::Args),
    /// Downloads and unpacks every resolved package into the local store.
    Fetch(fetch::Args),
    /// Builds the project: compiles, archives, links and runs tests.
    Build(build::Args),
    /// Compiles a single source file of the project.
    CompileOne(compile_one::Args),
    /// Checks a repository directory for internal consistency.
    ValidateRepo(repo::ValidateArgs),
    /// Imports package archives into a repository directory.
    RepoImport(repo::ImportArgs),
    /// Creates an empty repository directory.
    RepoInit(repo::InitArgs),
    /// Packs the project into an archive suitable for repo-import.
    PkgArchive(pkg_archive::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    cliutil::cli_main(|| match cli.command {
        Commands::Solve(args) => solve::solve_main(args),
        Commands::Fetch(args) => fetch::fetch_main(args),
        Commands::Build(args) => build::build_main(args),
        Commands::CompileOne(args) => compile_one::compile_one_main(args),
        Commands::ValidateRepo(args) => repo::validate_main(args),
        Commands::RepoImport(args) => repo::import_main(args),
        Commands::RepoInit(args) => repo::init_main(args),
        Commands::PkgArchive(args) => pkg_archive::pkg_archive_main(args),
    })
}
