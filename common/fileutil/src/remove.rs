// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

/// Removes a directory tree like [`std::fs::remove_dir_all`], additionally
/// restoring permissions on entries the plain removal cannot descend into.
///
/// Unpacked package sources occasionally carry read-only directories; those
/// must not keep cache maintenance from deleting a staging tree.
pub fn remove_dir_all_with_chmod(root: &Path) -> Result<()> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            make_tree_writable(root)?;
            std::fs::remove_dir_all(root)
                .with_context(|| format!("Failed to remove {}", root.display()))
        }
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove {}", root.display()))
        }
    }
}

fn make_tree_writable(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    make_writable(path, &metadata)?;
    if metadata.is_dir() {
        let entries = std::fs::read_dir(path)
            .with_context(|| format!("Failed to list {}", path.display()))?;
        for entry in entries {
            make_tree_writable(&entry?.path())?;
        }
    }
    Ok(())
}

fn make_writable(path: &Path, metadata: &Metadata) -> Result<()> {
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut permissions = metadata.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        permissions.set_mode(permissions.mode() | 0o700);
    }
    #[cfg(not(unix))]
    permissions.set_readonly(false);
    std::fs::set_permissions(path, permissions)
        .with_context(|| format!("Failed to chmod {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_read_only_subtrees() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("tree");
        let locked = root.join("locked");
        std::fs::create_dir_all(&locked)?;
        std::fs::write(locked.join("file"), b"x")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500))?;
        }

        remove_dir_all_with_chmod(&root)?;
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn missing_path_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        remove_dir_all_with_chmod(&dir.path().join("absent"))?;
        Ok(())
    }
}
