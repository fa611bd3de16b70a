// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{Context, Result};

/// Writes a list of `(relative path, content)` pairs under `root`, creating
/// parent directories as needed.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) -> Result<()> {
    for (path, content) in files {
        let dest = root.join(path);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&dest, content).with_context(|| format!("writing {}", dest.display()))?;
    }
    Ok(())
}

/// A scratch project directory: a manifest plus sources.
pub struct ScratchProject {
    root: std::path::PathBuf,
}

impl ScratchProject {
    /// Creates a project under `dir` with the given `kiln.toml` content.
    pub fn create(dir: &Path, manifest: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("kiln.toml"), manifest)?;
        Ok(Self {
            root: dir.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file(&self, path: &str, content: &str) -> Result<&Self> {
        write_tree(&self.root, &[(path, content)])?;
        Ok(self)
    }
}
