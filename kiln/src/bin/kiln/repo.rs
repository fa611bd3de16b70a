// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use kiln::repository;

#[derive(clap::Args, Debug)]
pub struct ValidateArgs {
    /// Repository directory.
    pub dir: PathBuf,
}

pub fn validate_main(args: ValidateArgs) -> kiln::Result<()> {
    repository::repo_validate(&args.dir)?;
    println!("repository ok: {}", args.dir.display());
    Ok(())
}

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// Repository directory.
    pub dir: PathBuf,

    /// Package archives to import.
    #[arg(required = true)]
    pub archives: Vec<PathBuf>,
}

pub fn import_main(args: ImportArgs) -> kiln::Result<()> {
    let imported = repository::repo_import(&args.dir, &args.archives)?;
    for id in imported {
        println!("imported {}", id);
    }
    Ok(())
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to create the repository in.
    pub dir: PathBuf,

    /// Repository name.
    #[arg(short = 'n', long)]
    pub name: String,
}

pub fn init_main(args: InitArgs) -> kiln::Result<()> {
    repository::repo_init(&args.dir, &args.name)?;
    println!("initialized repository {:?} at {}", args.name, args.dir.display());
    Ok(())
}
