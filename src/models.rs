//! Core data models for the ingestion and retrieval pipeline.
//!
//! These types represent the sources, passages, and ranked results that flow
//! through the build and query paths. A [`Source`] is one ingested origin, a
//! [`Passage`] is one embedded unit of its text, and the [`Manifest`]
//! summarizes everything a context currently holds.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a source reference is interpreted by the build pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Web,
    Video,
    Repository,
    LocalFile,
}

impl SourceKind {
    /// Canonical label stored in the database and shown in reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Web => "web",
            SourceKind::Video => "video",
            SourceKind::Repository => "repository",
            SourceKind::LocalFile => "local-file",
        }
    }

    /// Parse a kind label. Accepts the short CLI aliases `repo` and `file`.
    pub fn parse(s: &str) -> Option<SourceKind> {
        match s {
            "web" => Some(SourceKind::Web),
            "video" => Some(SourceKind::Video),
            "repo" | "repository" => Some(SourceKind::Repository),
            "file" | "local-file" => Some(SourceKind::LocalFile),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion status of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Pending,
    Indexed,
    Failed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Indexed => "indexed",
            SourceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<SourceStatus> {
        match s {
            "pending" => Some(SourceStatus::Pending),
            "indexed" => Some(SourceStatus::Indexed),
            "failed" => Some(SourceStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingested origin. Origins are unique within a context: re-ingesting the
/// same reference updates the source under `refresh` mode instead of
/// duplicating it.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub kind: SourceKind,
    /// URL or path identifying the origin. For crawled pages this is the
    /// normalized page URL, not the crawl seed.
    pub origin: String,
    pub title: Option<String>,
    pub status: SourceStatus,
    /// Failure reason when `status` is failed.
    pub detail: Option<String>,
    pub passage_count: i64,
    pub ingested_at: DateTime<Utc>,
}

/// Position of a passage within its source, used for citations.
///
/// Serialized as tagged JSON in the store, e.g.
/// `{"type":"time","start":12.0,"end":31.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Locator {
    /// Byte span within the extracted text body.
    Span { start: usize, end: usize },
    /// Line range within a repository or local file (1-based, inclusive).
    Lines { file: String, start: usize, end: usize },
    /// Time range within a transcript, in seconds of playback.
    Time { start: f64, end: f64 },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Span { start, end } => write!(f, "chars {}-{}", start, end),
            Locator::Lines { file, start, end } => write!(f, "{}:{}-{}", file, start, end),
            Locator::Time { start, end } => {
                write!(f, "{}-{}", format_secs(*start), format_secs(*end))
            }
        }
    }
}

fn format_secs(secs: f64) -> String {
    let total = secs.max(0.0) as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// One indexed unit of text. Immutable once stored; deleted only by a
/// refresh of its owning source or a full clear.
#[derive(Debug, Clone)]
pub struct Passage {
    pub id: String,
    pub source_id: String,
    /// Position within the source's reading order, starting at 0.
    pub seq: i64,
    pub text: String,
    pub token_count: i64,
    pub embedding: Vec<f32>,
    pub locator: Option<Locator>,
}

/// Whole-context summary: every source the store holds, plus the embedding
/// model identity the vectors were produced with.
#[derive(Debug, Clone)]
pub struct Manifest {
    pub context_name: String,
    /// `None` until the first source is indexed (or after a clear).
    pub embedding_identity: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sources: Vec<Source>,
    pub passage_count: i64,
}

/// Raw unit of text produced by an extractor before chunking.
#[derive(Debug, Clone)]
pub struct ExtractedUnit {
    pub text: String,
    pub title: Option<String>,
    /// Where `text` came from, so chunk spans can be turned into locators.
    pub provenance: UnitProvenance,
}

/// Origin shape of an extracted unit. Determines how a byte span within the
/// unit's text is cited.
#[derive(Debug, Clone)]
pub enum UnitProvenance {
    /// Free-flowing body text; spans are cited as byte offsets.
    Body,
    /// Text read from a file; spans are cited as line ranges.
    File { path: String },
    /// Concatenated transcript; spans are mapped back to playback time.
    Transcript { marks: Vec<TimeMark> },
}

/// Maps a byte offset in concatenated transcript text to playback time.
#[derive(Debug, Clone, Copy)]
pub struct TimeMark {
    /// Byte offset where this caption segment begins in the unit text.
    pub offset: usize,
    pub start_secs: f64,
    pub end_secs: f64,
}

impl UnitProvenance {
    /// Translate a chunk's byte span within `text` into a citation locator.
    pub fn locate(&self, text: &str, start: usize, end: usize) -> Locator {
        match self {
            UnitProvenance::Body => Locator::Span { start, end },
            UnitProvenance::File { path } => {
                let first = line_of(text, start);
                // `end` is exclusive; cite the line holding the last byte
                let last = line_of(text, end.saturating_sub(1).max(start));
                Locator::Lines {
                    file: path.clone(),
                    start: first,
                    end: last,
                }
            }
            UnitProvenance::Transcript { marks } => {
                if marks.is_empty() {
                    return Locator::Span { start, end };
                }
                let from = marks
                    .iter()
                    .rev()
                    .find(|m| m.offset <= start)
                    .unwrap_or(&marks[0]);
                let to = marks
                    .iter()
                    .rev()
                    .find(|m| m.offset < end)
                    .unwrap_or(&marks[0]);
                Locator::Time {
                    start: from.start_secs,
                    end: to.end_secs,
                }
            }
        }
    }
}

/// 1-based line number holding byte offset `at`.
fn line_of(text: &str, at: usize) -> usize {
    let at = at.min(text.len());
    text.as_bytes()[..at].iter().filter(|&&b| b == b'\n').count() + 1
}

/// A passage returned by the query engine, annotated with its source.
#[derive(Debug, Clone)]
pub struct RankedPassage {
    pub passage_id: String,
    pub source_origin: String,
    pub source_title: Option<String>,
    pub kind: SourceKind,
    pub seq: i64,
    pub text: String,
    pub locator: Option<Locator>,
    /// Cosine similarity to the question vector, higher is closer.
    pub score: f32,
}

/// Outcome of a query. An empty store is a distinguishable status, not an
/// error and not a silent empty result list.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// The store holds no indexed passages.
    EmptyContext,
    Ranked(Vec<RankedPassage>),
}

/// How a build interacts with existing context state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Add new sources; same-origin sources already present are left untouched.
    #[default]
    Append,
    /// Replace each re-ingested source's passages atomically.
    Refresh,
    /// Wipe the context (and its recorded model identity) before ingesting.
    Clear,
}

impl BuildMode {
    pub fn parse(s: &str) -> Option<BuildMode> {
        match s {
            "append" => Some(BuildMode::Append),
            "refresh" => Some(BuildMode::Refresh),
            "clear" => Some(BuildMode::Clear),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildMode::Append => "append",
            BuildMode::Refresh => "refresh",
            BuildMode::Clear => "clear",
        }
    }
}

/// Outcome recorded for one source in a build report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportStatus {
    Indexed,
    /// Already present under append mode; nothing was written.
    Skipped,
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportStatus::Indexed => "indexed",
            ReportStatus::Skipped => "skipped",
            ReportStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-source entry in a build report.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub origin: String,
    pub kind: SourceKind,
    pub status: ReportStatus,
    pub passages: i64,
    /// Failure reason or skip explanation.
    pub detail: Option<String>,
}

/// Aggregate result of one build run. Always produced, even when every
/// source failed.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub mode: &'static str,
    pub sources: Vec<SourceReport>,
}

impl BuildReport {
    pub fn indexed(&self) -> usize {
        self.count(ReportStatus::Indexed)
    }

    pub fn skipped(&self) -> usize {
        self.count(ReportStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(ReportStatus::Failed)
    }

    pub fn passages_written(&self) -> i64 {
        self.sources
            .iter()
            .filter(|s| s.status == ReportStatus::Indexed)
            .map(|s| s.passages)
            .sum()
    }

    fn count(&self, status: ReportStatus) -> usize {
        self.sources.iter().filter(|s| s.status == status).count()
    }
}
