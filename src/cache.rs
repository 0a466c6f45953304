//! On-disk cache for fetched remote content.
//!
//! Network fetches (web pages, transcript tracks) are written to a cache
//! directory keyed by URL, so repeated builds against the same sources do
//! not re-download unchanged content. Entries are plain files named
//! `<hash12>-<sanitized-tail>`, where the hash prefix guarantees uniqueness
//! and the sanitized tail keeps the directory browsable.
//!
//! The cache stores raw fetched bytes as text. Invalidation is manual:
//! passing `--force-fetch` to a build bypasses reads (writes still happen),
//! and deleting the directory clears it entirely.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;

/// URL-keyed cache of fetched content under a root directory.
pub struct FetchCache {
    root: PathBuf,
}

impl FetchCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cache entry for a URL.
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let name = format!("{}-{}", short_hash(url), sanitize_component(url_tail(url)));
        self.root.join(name)
    }

    /// Read a cached entry, if one exists.
    pub async fn load(&self, url: &str) -> Result<Option<String>> {
        let path = self.entry_path(url);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        debug!(%url, path = %path.display(), "cache hit");
        Ok(Some(content))
    }

    /// Write an entry, creating the cache directory if needed.
    pub async fn store(&self, url: &str, content: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.entry_path(url);
        tokio::fs::write(&path, content).await?;
        debug!(%url, path = %path.display(), "cache store");
        Ok(path)
    }
}

/// First 12 hex chars of the SHA-256 of the input.
fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}

/// Last path-ish segment of a URL, for a readable file name.
fn url_tail(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if tail.is_empty() {
        trimmed
    } else {
        tail
    }
}

/// Replace filesystem-hostile characters and cap the length.
fn sanitize_component(s: &str) -> String {
    let mut out: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(80);
    if out.is_empty() {
        out.push('_');
    }
    out
}
