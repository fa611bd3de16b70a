// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use kiln::plan;
use kiln::store::PackageStore;
use kiln::transport::HttpTransport;

use crate::common::ProjectArgs;

#[derive(clap::Args, Debug)]
pub struct Args {
    #[command(flatten)]
    pub project: ProjectArgs,
}

pub fn fetch_main(args: Args) -> kiln::Result<()> {
    let manifest = args.project.manifest()?;
    let transport = HttpTransport::new();
    let repos = args.project.repositories(&transport)?;
    let solution = args.project.solve(&manifest, &repos)?;

    let store = PackageStore::open(&args.project.cache_root()?)?;
    plan::materialize(
        &args.project.project,
        &manifest,
        &solution,
        &store,
        &transport,
    )?;

    for selection in solution.values() {
        println!(
            "{} {}",
            selection.id,
            store.package_dir(&selection.id).display()
        );
    }
    Ok(())
}
