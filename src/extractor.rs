//! Source extraction trait and reference-kind detection.
//!
//! ═══════════════════════════════════════════════════════════════════════
//! EXTRACTORS
//! ═══════════════════════════════════════════════════════════════════════
//!
//! Every source kind implements [`Extract`]: given a reference string,
//! produce the indexable text units found there. The trait keeps the build
//! pipeline uniform; chunking, embedding, and persistence downstream never
//! care where text came from.
//!
//! | Implementation | Module | Accepts |
//! |----------------|--------|---------|
//! | `WebExtractor` | [`crate::extract_web`] | `http(s)://` page URLs |
//! | `VideoExtractor` | [`crate::extract_video`] | YouTube watch/short URLs |
//! | `RepoExtractor` | [`crate::extract_repo`] | clonable git URLs, local repos |
//! | `FileExtractor` | [`crate::extract_file`] | local file paths |
//!
//! [`detect_kind`] maps a raw reference to the extractor that should handle
//! it; a build can override the heuristic with an explicit kind.

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::models::{ExtractedUnit, SourceKind};

/// Turns one source reference into indexable text units.
#[async_trait]
pub trait Extract: Send + Sync {
    /// The source kind this extractor handles.
    fn kind(&self) -> SourceKind;

    /// Extract all text units from the referenced source.
    ///
    /// Returns an empty vector when the source exists but holds no
    /// indexable text; returns an error when it cannot be reached at all.
    async fn extract(&self, origin: &str) -> Result<Vec<ExtractedUnit>>;
}

/// Guess the source kind from the shape of a reference.
///
/// | Reference looks like | Kind |
/// |----------------------|------|
/// | ends in `.git`, or `git@...` | Repository |
/// | YouTube watch/short/embed URL | Video |
/// | any other `http(s)://` URL | Web |
/// | anything else | LocalFile |
///
/// The guess is a default. Builds may pin the kind explicitly, e.g. to
/// ingest a GitHub project page as a repository rather than a web page.
pub fn detect_kind(reference: &str) -> SourceKind {
    if reference.ends_with(".git") || reference.starts_with("git@") {
        return SourceKind::Repository;
    }

    if let Ok(url) = Url::parse(reference) {
        if matches!(url.scheme(), "http" | "https") {
            if url.host_str().is_some_and(is_youtube_host) {
                return SourceKind::Video;
            }
            return SourceKind::Web;
        }
    }

    SourceKind::LocalFile
}

pub(crate) fn is_youtube_host(host: &str) -> bool {
    host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtu.be"
}
