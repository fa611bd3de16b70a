// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use itertools::Itertools;
use kiln::transport::HttpTransport;

use crate::common::ProjectArgs;

#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub project: ProjectArgs,
}

pub fn solve_main(args: Args) -> kiln::Result<()> {
    let manifest = args.project.manifest()?;
    let transport = HttpTransport::new();
    let repos = args.project.repositories(&transport)?;
    let solution = args.project.solve(&manifest, &repos)?;

    if solution.is_empty() {
        println!("nothing to resolve");
        return Ok(());
    }
    for selection in solution.values() {
        println!(
            "{} using {}",
            selection.id,
            selection.enabled_libs.iter().join(",")
        );
    }
    Ok(())
}
