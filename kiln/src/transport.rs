// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fetching bytes from repository URLs.
//!
//! The trait exists so the index and store layers can be exercised against
//! `file://` fixtures; the default implementation speaks HTTP(S) and
//! `file://`.

use std::io::{Read, Write};
use std::time::Duration;

use anyhow::anyhow;
use url::Url;

/// Why a fetch failed, split by what the caller may do about it.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The resource does not exist (HTTP 404 or a missing file).
    #[error("not found")]
    NotFound,
    /// A transient transport problem; retrying may help.
    #[error("transient network failure: {0}")]
    Transient(#[source] anyhow::Error),
    /// A permanent transport problem; retrying will not help.
    #[error("network failure: {0}")]
    Permanent(#[source] anyhow::Error),
}

pub trait Transport: Send + Sync {
    /// Fetches `url` fully into memory.
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let mut buf = Vec::new();
        self.fetch_to(url, &mut buf)?;
        Ok(buf)
    }

    /// Streams `url` into `out`.
    fn fetch_to(&self, url: &Url, out: &mut dyn Write) -> Result<(), FetchError>;
}

/// The production transport: HTTP(S) via a blocking client, plus `file://`.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("constructing an HTTP client cannot fail");
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn fetch_to(&self, url: &Url, out: &mut dyn Write) -> Result<(), FetchError> {
        match url.scheme() {
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| FetchError::Permanent(anyhow!("unusable file URL {}", url)))?;
                let mut file = match std::fs::File::open(&path) {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(FetchError::NotFound)
                    }
                    Err(e) => return Err(FetchError::Permanent(e.into())),
                };
                copy(&mut file, out)
            }
            "http" | "https" => {
                let response = self
                    .client
                    .get(url.clone())
                    .send()
                    .map_err(classify_reqwest)?;
                let status = response.status();
                if status == reqwest::StatusCode::NOT_FOUND {
                    return Err(FetchError::NotFound);
                }
                if status.is_server_error() {
                    return Err(FetchError::Transient(anyhow!(
                        "server returned {} for {}",
                        status,
                        url
                    )));
                }
                if !status.is_success() {
                    return Err(FetchError::Permanent(anyhow!(
                        "server returned {} for {}",
                        status,
                        url
                    )));
                }
                copy(&mut ResponseReader(response), out)
            }
            other => Err(FetchError::Permanent(anyhow!(
                "unsupported URL scheme {:?} in {}",
                other,
                url
            ))),
        }
    }
}

fn classify_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() {
        FetchError::Transient(e.into())
    } else {
        FetchError::Permanent(e.into())
    }
}

struct ResponseReader(reqwest::blocking::Response);

impl Read for ResponseReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

fn copy(from: &mut dyn Read, to: &mut dyn Write) -> Result<(), FetchError> {
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = from
            .read(&mut buf)
            .map_err(|e| FetchError::Transient(e.into()))?;
        if n == 0 {
            return Ok(());
        }
        to.write_all(&buf[..n])
            .map_err(|e| FetchError::Permanent(e.into()))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_scheme_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"payload").unwrap();

        let transport = HttpTransport::new();
        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(b"payload".to_vec(), transport.fetch(&url).unwrap());
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let transport = HttpTransport::new();
        let url = Url::from_file_path(dir.path().join("absent")).unwrap();
        assert!(matches!(transport.fetch(&url), Err(FetchError::NotFound)));
    }

    #[test]
    fn unknown_scheme_is_permanent() {
        let transport = HttpTransport::new();
        let url = Url::parse("ftp://example.com/x").unwrap();
        assert!(matches!(
            transport.fetch(&url),
            Err(FetchError::Permanent(_))
        ));
    }
}
