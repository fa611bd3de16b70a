// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::remove_dir_all_with_chmod;

/// A scratch directory for assembling content that will be published by
/// rename, typically under a store's `tmp/` subtree.
///
/// The directory gets a unique `stage.*` name so concurrent processes
/// populating the same store never collide, and the whole tree is removed
/// when the value is dropped. Removal restores permissions first, because
/// unpacked package archives may leave read-only directories behind. A
/// staging tree whose payload was already renamed into its final location
/// simply loses its leftovers; readers of the surrounding store ignore
/// everything under the staging parent.
pub struct StagingDir {
    path: Option<PathBuf>,
}

impl StagingDir {
    /// Creates a fresh staging directory under `parent`, creating `parent`
    /// itself if needed.
    pub fn create_under(parent: &Path) -> Result<Self> {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix("stage.")
            .tempdir_in(parent)
            .with_context(|| format!("staging under {}", parent.display()))?;
        Ok(Self {
            path: Some(dir.into_path()),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().expect("staging directory was detached")
    }

    /// Releases ownership of the directory: it survives this value, and
    /// removing it becomes the caller's responsibility.
    pub fn detach(mut self) -> PathBuf {
        self.path.take().expect("staging directory was detached")
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        // Cleanup is best effort: a leftover staging directory is inert,
        // and cache maintenance can sweep it later.
        if let Err(e) = remove_dir_all_with_chmod(&path) {
            tracing::warn!(
                "leaving staging directory {} behind: {:#}",
                path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_under_the_parent() -> Result<()> {
        let root = tempfile::tempdir()?;
        let parent = root.path().join("tmp");

        let a = StagingDir::create_under(&parent)?;
        let b = StagingDir::create_under(&parent)?;
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(&parent));
        let name = a.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("stage."), "name: {}", name);
        Ok(())
    }

    #[test]
    fn drop_removes_read_only_content() -> Result<()> {
        let root = tempfile::tempdir()?;
        let staging = StagingDir::create_under(root.path())?;
        let path = staging.path().to_owned();

        let locked = path.join("unpacked");
        std::fs::create_dir(&locked)?;
        std::fs::write(locked.join("file"), b"x")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500))?;
        }

        drop(staging);
        assert!(!path.try_exists()?);
        Ok(())
    }

    #[test]
    fn drop_tolerates_a_renamed_away_tree() -> Result<()> {
        let root = tempfile::tempdir()?;
        let staging = StagingDir::create_under(root.path())?;
        let published = root.path().join("published");

        std::fs::create_dir(staging.path().join("src"))?;
        std::fs::write(staging.path().join("src/file"), b"x")?;
        std::fs::rename(staging.path().join("src"), &published)?;

        drop(staging);
        // The published tree is untouched; only the staging leftovers go.
        assert_eq!("x", std::fs::read_to_string(published.join("file"))?);
        Ok(())
    }

    #[test]
    fn detach_transfers_responsibility() -> Result<()> {
        let root = tempfile::tempdir()?;
        let staging = StagingDir::create_under(root.path())?;

        let path = staging.detach();
        assert!(path.try_exists()?);
        remove_dir_all_with_chmod(&path)?;
        Ok(())
    }
}
