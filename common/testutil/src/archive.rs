// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

/// Builds a package archive (tar.gz of a manifest plus sources) in memory.
pub struct ArchiveBuilder {
    files: Vec<(String, Vec<u8>)>,
}

impl ArchiveBuilder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self { files: Vec::new() }
    }

    pub fn file(&mut self, path: &str, content: &str) -> &mut Self {
        self.files.push((path.to_owned(), content.as_bytes().to_vec()));
        self
    }

    /// Renders the archive bytes.
    pub fn build(&self) -> Result<Vec<u8>> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = tar::Builder::new(encoder);
        for (path, content) in &self.files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append_data(&mut header, path, content.as_slice())
                .with_context(|| format!("appending {}", path))?;
        }
        let encoder = tar.into_inner().context("finishing tar")?;
        Ok(encoder.finish().context("finishing gzip")?)
    }

    /// Writes the archive to `dest` and returns its hex-encoded sha256.
    pub fn write_tar_gz(&self, dest: &Path) -> Result<String> {
        let data = self.build()?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(dest, &data).with_context(|| format!("writing {}", dest.display()))?;
        Ok(sha256_hex(&data))
    }
}

/// Hex-encoded sha256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
