// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// Writes `data` to `path` atomically: readers observe either the complete
/// previous content or the complete new content, never a partial write.
///
/// The temporary file is created in the destination's parent directory so
/// the final rename stays on one filesystem.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    let mut file = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to stage a write under {}", parent.display()))?;
    file.write_all(data)?;
    file.flush()?;
    file.persist(path)
        .with_context(|| format!("Failed to publish {}", path.display()))?;
    Ok(())
}

/// Publishes a staged directory at `dest` by rename.
///
/// The rename is the linearization point: concurrent publishers may race,
/// and exactly one wins. Returns `true` if this call published `staged`,
/// `false` if another publisher got there first (in which case `staged` is
/// left in place for the caller to discard).
pub fn publish_dir(staged: &Path, dest: &Path) -> Result<bool> {
    match std::fs::rename(staged, dest) {
        Ok(()) => Ok(true),
        // A lost race surfaces differently per platform: the rename fails
        // because `dest` now exists (DirectoryNotEmpty / AlreadyExists), or
        // it clobbers nothing because someone renamed over us first.
        Err(_) if dest.is_dir() => Ok(false),
        Err(e) => Err(e).with_context(|| {
            format!(
                "Failed to publish {} to {}",
                staged.display(),
                dest.display()
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("file");
        atomic_write(&path, b"first")?;
        assert_eq!("first", std::fs::read_to_string(&path)?);
        atomic_write(&path, b"second")?;
        assert_eq!("second", std::fs::read_to_string(&path)?);
        Ok(())
    }

    #[test]
    fn publish_dir_moves_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let staged = dir.path().join("staged");
        std::fs::create_dir(&staged)?;
        std::fs::write(staged.join("file"), b"x")?;
        let dest = dir.path().join("dest");

        assert!(publish_dir(&staged, &dest)?);
        assert!(!staged.exists());
        assert_eq!("x", std::fs::read_to_string(dest.join("file"))?);
        Ok(())
    }

    #[test]
    fn publish_dir_reports_lost_race() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let winner = dir.path().join("winner");
        std::fs::create_dir(&winner)?;
        std::fs::write(winner.join("file"), b"w")?;
        let dest = dir.path().join("dest");
        assert!(publish_dir(&winner, &dest)?);

        let loser = dir.path().join("loser");
        std::fs::create_dir(&loser)?;
        std::fs::write(loser.join("file"), b"l")?;
        assert!(!publish_dir(&loser, &dest)?);
        // The published entry is untouched.
        assert_eq!("w", std::fs::read_to_string(dest.join("file"))?);
        Ok(())
    }
}
