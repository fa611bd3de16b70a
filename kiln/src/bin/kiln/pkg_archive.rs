// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::PathBuf;

use kiln::repository;

#[derive(clap::Args, Debug)]
pub struct Args {
    /// Project directory.
    #[arg(short = 'p', long, value_name = "DIR", default_value = ".")]
    pub project: PathBuf,

    /// Where to write the archive (default: <project>/<id>.tar.gz).
    #[arg(short = 'o', long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

pub fn pkg_archive_main(args: Args) -> kiln::Result<()> {
    let archive = repository::pkg_archive(&args.project, args.out.as_deref())?;
    println!("{}", archive.display());
    Ok(())
}
