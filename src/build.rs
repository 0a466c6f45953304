//! Build pipeline: turn source references into indexed passages.
//!
//! ```text
//! refs ──► detect kind ──► extract ──► chunk ──► embed ──► store
//!             │                                              │
//!             └── web seeds expand into a BFS crawl ─────────┘
//! ```
//!
//! One build processes every reference it was given, up to `workers`
//! sources at a time, and always produces a [`BuildReport`]: a source
//! that cannot be extracted or embedded becomes a `failed` entry with a
//! reason instead of aborting the run. Only two things stop a build
//! outright: a configuration problem and an embedding identity mismatch
//! against what the store already holds.
//!
//! Sources are persisted atomically one by one, so an interrupted build
//! keeps every source that finished. Each crawled page is its own source
//! under its normalized URL; re-running a crawl under `append` skips
//! pages already indexed while still following their links to anything
//! new.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::chunk::{approx_tokens, chunk_text};
use crate::config::Config;
use crate::crawl::{normalize_url, CrawlItem, Crawler};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::extract_file::FileExtractor;
use crate::extract_repo::RepoExtractor;
use crate::extract_video::VideoExtractor;
use crate::extract_web::WebExtractor;
use crate::extractor::{detect_kind, Extract};
use crate::cache::FetchCache;
use crate::models::{
    BuildMode, BuildReport, ExtractedUnit, Passage, ReportStatus, Source, SourceKind,
    SourceReport, SourceStatus, UnitProvenance,
};
use crate::store::ContextStore;

/// Per-invocation overrides layered over the configuration.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    /// Pin every reference to this kind instead of detecting.
    pub kind: Option<SourceKind>,
    pub max_depth: Option<usize>,
    pub max_pages: Option<usize>,
    /// Ingest web references as single pages without crawling.
    pub single_page: bool,
    /// Lift the same-domain crawl restriction.
    pub allow_external: bool,
    /// Bypass cache reads and re-download everything.
    pub force_fetch: bool,
}

/// Run a build over the given references.
pub async fn run_build(
    config: &Config,
    store: Arc<ContextStore>,
    refs: &[String],
    opts: &BuildOptions,
) -> Result<BuildReport> {
    let provider = create_provider(&config.embedding)?;

    if opts.mode == BuildMode::Clear {
        store.clear().await?;
    }
    store.ensure_embedding_identity(&provider.identity()).await?;

    // Duplicate references collapse to their first occurrence.
    let mut seen: HashSet<&str> = HashSet::new();
    let refs: Vec<String> = refs
        .iter()
        .filter(|r| seen.insert(r.as_str()))
        .cloned()
        .collect();

    info!(mode = opts.mode.as_str(), refs = refs.len(), "build started");

    let ctx = Arc::new(BuildContext {
        config: config.clone(),
        store,
        provider,
        opts: opts.clone(),
        claimed: Mutex::new(HashSet::new()),
    });

    let semaphore = Arc::new(Semaphore::new(config.build.workers.max(1)));
    let mut tasks = JoinSet::new();
    for (index, reference) in refs.into_iter().enumerate() {
        let ctx = ctx.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            (index, dispatch(ctx, reference).await)
        });
    }

    let mut collected: Vec<(usize, Vec<SourceReport>)> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(pair) => collected.push(pair),
            Err(e) => warn!(error = %e, "build task aborted"),
        }
    }
    collected.sort_by_key(|(index, _)| *index);

    let report = BuildReport {
        mode: opts.mode.as_str(),
        sources: collected.into_iter().flat_map(|(_, r)| r).collect(),
    };
    info!(
        indexed = report.indexed(),
        skipped = report.skipped(),
        failed = report.failed(),
        passages = report.passages_written(),
        "build finished"
    );
    Ok(report)
}

async fn dispatch(ctx: Arc<BuildContext>, reference: String) -> Vec<SourceReport> {
    let kind = ctx.opts.kind.unwrap_or_else(|| detect_kind(&reference));
    debug!(%reference, kind = %kind, "processing reference");
    match kind {
        SourceKind::Web if !ctx.opts.single_page => ctx.crawl_seed(&reference).await,
        kind => vec![ctx.single_source(kind, &reference).await],
    }
}

/// Everything a build task needs, shared across the worker pool.
struct BuildContext {
    config: Config,
    store: Arc<ContextStore>,
    provider: Arc<dyn EmbeddingProvider>,
    opts: BuildOptions,
    /// Origins already handled in this run, across all tasks.
    claimed: Mutex<HashSet<String>>,
}

impl BuildContext {
    /// True the first time an origin is seen in this run.
    async fn claim(&self, origin: &str) -> bool {
        self.claimed.lock().await.insert(origin.to_string())
    }

    fn fetch_cache(&self) -> Option<FetchCache> {
        self.config
            .cache
            .enabled
            .then(|| FetchCache::new(self.config.cache_dir()))
    }

    fn crawl_limits(&self) -> (usize, usize, bool) {
        let depth = self.opts.max_depth.unwrap_or(self.config.crawl.max_depth);
        let pages = self.opts.max_pages.unwrap_or(self.config.crawl.max_pages).max(1);
        let same_domain = self.config.crawl.same_domain_only && !self.opts.allow_external;
        (depth, pages, same_domain)
    }

    /// Crawl out from a seed URL, persisting each page as its own source.
    async fn crawl_seed(&self, reference: &str) -> Vec<SourceReport> {
        let seed = match Url::parse(reference) {
            Ok(url) => url,
            Err(e) => {
                return vec![report_failed(
                    SourceKind::Web,
                    reference.to_string(),
                    format!("invalid url: {}", e),
                )]
            }
        };
        let extractor =
            match WebExtractor::new(&self.config.crawl, self.fetch_cache(), self.opts.force_fetch)
            {
                Ok(extractor) => Arc::new(extractor),
                Err(e) => {
                    return vec![report_failed(
                        SourceKind::Web,
                        reference.to_string(),
                        e.to_string(),
                    )]
                }
            };

        let (depth, pages, same_domain) = self.crawl_limits();
        let mut crawler = Crawler::new(extractor, seed, depth, pages, same_domain);
        let mut reports = Vec::new();

        while let Some(item) = crawler.next_page().await {
            match item {
                CrawlItem::Page(page) => {
                    let origin = normalize_url(&page.url);
                    if !self.claim(&origin).await {
                        debug!(%origin, "page already handled in this build");
                        continue;
                    }
                    if let Some(skip) = self.append_skip(SourceKind::Web, &origin).await {
                        // Links were already enqueued; only persistence is skipped.
                        reports.push(skip);
                        continue;
                    }

                    let title = page.title.clone();
                    let units = if page.text.is_empty() {
                        Vec::new()
                    } else {
                        vec![ExtractedUnit {
                            text: page.text,
                            title: page.title,
                            provenance: UnitProvenance::Body,
                        }]
                    };
                    reports
                        .push(self.persist(SourceKind::Web, origin, title, units).await);
                }
                CrawlItem::Failed { url, reason } => {
                    let origin = normalize_url(&url);
                    reports.push(self.fail(SourceKind::Web, origin, reason).await);
                }
            }
        }
        reports
    }

    /// Ingest one non-crawled reference.
    async fn single_source(&self, kind: SourceKind, reference: &str) -> SourceReport {
        let origin = match kind {
            SourceKind::Web => match Url::parse(reference) {
                Ok(url) => normalize_url(&url),
                Err(e) => {
                    return report_failed(
                        kind,
                        reference.to_string(),
                        format!("invalid url: {}", e),
                    )
                }
            },
            _ => reference.to_string(),
        };

        if !self.claim(&origin).await {
            return SourceReport {
                origin,
                kind,
                status: ReportStatus::Skipped,
                passages: 0,
                detail: Some("already handled in this build".to_string()),
            };
        }
        if let Some(skip) = self.append_skip(kind, &origin).await {
            return skip;
        }

        let extractor: Box<dyn Extract> = match kind {
            SourceKind::Web => {
                match WebExtractor::new(
                    &self.config.crawl,
                    self.fetch_cache(),
                    self.opts.force_fetch,
                ) {
                    Ok(e) => Box::new(e),
                    Err(e) => return report_failed(kind, origin, e.to_string()),
                }
            }
            SourceKind::Video => {
                match VideoExtractor::new(
                    &self.config.crawl,
                    &self.config.video,
                    self.fetch_cache(),
                    self.opts.force_fetch,
                ) {
                    Ok(e) => Box::new(e),
                    Err(e) => return report_failed(kind, origin, e.to_string()),
                }
            }
            SourceKind::Repository => Box::new(RepoExtractor::new(self.config.repository.clone())),
            SourceKind::LocalFile => Box::new(FileExtractor),
        };

        // Extraction fetches the reference as given; only identity is
        // normalized.
        match extractor.extract(reference).await {
            Ok(units) => {
                let title = match kind {
                    SourceKind::Repository => None,
                    _ => units.first().and_then(|u| u.title.clone()),
                };
                self.persist(kind, origin, title, units).await
            }
            Err(e) => self.fail(kind, origin, failure_detail(&e)).await,
        }
    }

    /// Skip report when append mode meets an already-indexed origin.
    async fn append_skip(&self, kind: SourceKind, origin: &str) -> Option<SourceReport> {
        if self.opts.mode != BuildMode::Append {
            return None;
        }
        match self.store.source_by_origin(origin).await {
            Ok(Some(existing)) if existing.status == SourceStatus::Indexed => {
                Some(SourceReport {
                    origin: origin.to_string(),
                    kind,
                    status: ReportStatus::Skipped,
                    passages: existing.passage_count,
                    detail: Some("already indexed".to_string()),
                })
            }
            _ => None,
        }
    }

    /// Chunk, embed, and store one source's units. Never propagates:
    /// problems become a failed report entry.
    async fn persist(
        &self,
        kind: SourceKind,
        origin: String,
        title: Option<String>,
        units: Vec<ExtractedUnit>,
    ) -> SourceReport {
        match self.try_persist(kind, &origin, title, units).await {
            Ok(report) => report,
            Err(e) => self.fail(kind, origin, failure_detail(&e)).await,
        }
    }

    async fn try_persist(
        &self,
        kind: SourceKind,
        origin: &str,
        title: Option<String>,
        units: Vec<ExtractedUnit>,
    ) -> Result<SourceReport> {
        let chunking = &self.config.chunking;
        let mut texts: Vec<String> = Vec::new();
        let mut locators = Vec::new();
        for unit in &units {
            for span in chunk_text(&unit.text, chunking.max_tokens, chunking.overlap_tokens) {
                locators.push(Some(unit.provenance.locate(&unit.text, span.start, span.end)));
                texts.push(span.text);
            }
        }

        if texts.is_empty() {
            if let Err(e) = self
                .store
                .record_failure(kind, origin, "no indexable text")
                .await
            {
                warn!(%origin, error = %e, "failed to record source failure");
            }
            return Ok(SourceReport {
                origin: origin.to_string(),
                kind,
                status: ReportStatus::Failed,
                passages: 0,
                detail: Some("no indexable text".to_string()),
            });
        }

        let mut embeddings: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embedding.batch_size.max(1)) {
            let mut vectors = self.provider.embed(batch).await?;
            embeddings.append(&mut vectors);
        }
        if embeddings.len() != texts.len() {
            return Err(EngineError::EmbeddingTransientFailure {
                attempts: 1,
                reason: format!(
                    "provider returned {} vectors for {} passages",
                    embeddings.len(),
                    texts.len()
                ),
            });
        }

        let source_id = Uuid::new_v4().to_string();
        let mut passages = Vec::with_capacity(texts.len());
        for (seq, ((text, locator), embedding)) in
            texts.into_iter().zip(locators).zip(embeddings).enumerate()
        {
            passages.push(Passage {
                id: Uuid::new_v4().to_string(),
                source_id: source_id.clone(),
                seq: seq as i64,
                token_count: approx_tokens(&text) as i64,
                text,
                embedding,
                locator,
            });
        }

        let source = Source {
            id: source_id,
            kind,
            origin: origin.to_string(),
            title,
            status: SourceStatus::Indexed,
            detail: None,
            passage_count: passages.len() as i64,
            ingested_at: Utc::now(),
        };

        // A leftover row (failed earlier, or refresh mode) is replaced;
        // a brand-new origin is a plain insert.
        match self.store.source_by_origin(origin).await? {
            Some(_) => self.store.refresh_source(&source, &passages).await?,
            None => self.store.insert_source(&source, &passages).await?,
        }

        Ok(SourceReport {
            origin: origin.to_string(),
            kind,
            status: ReportStatus::Indexed,
            passages: source.passage_count,
            detail: None,
        })
    }

    /// Record a failure, preserving any indexed content the origin holds.
    async fn fail(&self, kind: SourceKind, origin: String, reason: String) -> SourceReport {
        let retained = matches!(
            self.store.source_by_origin(&origin).await,
            Ok(Some(existing)) if existing.status == SourceStatus::Indexed
        );
        if let Err(e) = self.store.record_failure(kind, &origin, &reason).await {
            warn!(%origin, error = %e, "failed to record source failure");
        }

        let detail = if retained {
            format!("{} (previous content retained)", reason)
        } else {
            reason
        };
        warn!(%origin, %detail, "source failed");
        SourceReport {
            origin,
            kind,
            status: ReportStatus::Failed,
            passages: 0,
            detail: Some(detail),
        }
    }
}

fn report_failed(kind: SourceKind, origin: String, detail: String) -> SourceReport {
    SourceReport {
        origin,
        kind,
        status: ReportStatus::Failed,
        passages: 0,
        detail: Some(detail),
    }
}

/// Human-readable reason for a report line: unwrap the reference from
/// extraction failures since the report already names the origin.
fn failure_detail(e: &EngineError) -> String {
    match e {
        EngineError::SourceUnavailable { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    async fn harness() -> (tempfile::TempDir, Config, Arc<ContextStore>) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::minimal(dir.path().join("ctx.db"));
        let store = Arc::new(ContextStore::open(&config).await.unwrap());
        (dir, config, store)
    }

    fn write_note(dir: &tempfile::TempDir, name: &str, text: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_build_local_file_end_to_end() {
        let (dir, config, store) = harness().await;
        let note = write_note(&dir, "notes.md", "Ownership rules govern moves and borrows.\n");

        let report = run_build(&config, store.clone(), &[note.clone()], &BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(report.indexed(), 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.passages_written(), 1);
        assert_eq!(report.sources[0].kind, SourceKind::LocalFile);

        let source = store.source_by_origin(&note).await.unwrap().unwrap();
        assert_eq!(source.status, SourceStatus::Indexed);
        assert_eq!(source.title.as_deref(), Some("notes.md"));
        assert_eq!(
            store.embedding_identity().await.unwrap().as_deref(),
            Some("hash-v1:384")
        );
    }

    #[tokio::test]
    async fn test_long_file_splits_into_overlapping_passages() {
        let (dir, config, store) = harness().await;
        // ~520 tokens against the default 500-token budget.
        let body = vec!["abcd"; 416].join(" ");
        let note = write_note(&dir, "long.md", &body);

        let report = run_build(&config, store.clone(), &[note], &BuildOptions::default())
            .await
            .unwrap();

        assert_eq!(report.indexed(), 1);
        assert_eq!(report.passages_written(), 2);

        let provider = crate::embedding::HashProvider::new(384);
        let query = provider
            .embed(&["abcd".to_string()])
            .await
            .unwrap()
            .remove(0);
        let hits = store.nearest_passages(&query, 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.text.contains("abcd")));
    }

    #[tokio::test]
    async fn test_append_skips_existing_origin() {
        let (dir, config, store) = harness().await;
        let note = write_note(&dir, "a.md", "first version of the notes\n");

        let first = run_build(&config, store.clone(), &[note.clone()], &BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(first.indexed(), 1);

        let second = run_build(&config, store.clone(), &[note.clone()], &BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(second.indexed(), 0);
        assert_eq!(second.skipped(), 1);
        assert_eq!(
            second.sources[0].detail.as_deref(),
            Some("already indexed")
        );
        assert_eq!(store.passage_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_replaces_content() {
        let (dir, config, store) = harness().await;
        let note = write_note(&dir, "a.md", "original text about lifetimes\n");
        run_build(&config, store.clone(), &[note.clone()], &BuildOptions::default())
            .await
            .unwrap();

        write_note(&dir, "a.md", "rewritten text about generics\n");
        let opts = BuildOptions {
            mode: BuildMode::Refresh,
            ..Default::default()
        };
        let report = run_build(&config, store.clone(), &[note.clone()], &opts)
            .await
            .unwrap();
        assert_eq!(report.indexed(), 1);

        let hits = store.nearest_passages(&[0.0; 384], 10).await.unwrap();
        assert_eq!(store.passage_total().await.unwrap(), 1);
        assert!(hits.iter().all(|h| !h.text.contains("original")));
    }

    #[tokio::test]
    async fn test_clear_mode_starts_fresh() {
        let (dir, config, store) = harness().await;
        let a = write_note(&dir, "a.md", "keep me around\n");
        run_build(&config, store.clone(), &[a], &BuildOptions::default())
            .await
            .unwrap();

        let b = write_note(&dir, "b.md", "the only survivor\n");
        let opts = BuildOptions {
            mode: BuildMode::Clear,
            ..Default::default()
        };
        run_build(&config, store.clone(), &[b.clone()], &opts).await.unwrap();

        let manifest = store.manifest().await.unwrap();
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.sources[0].origin, b);
    }

    #[tokio::test]
    async fn test_missing_file_reports_failed_without_aborting() {
        let (dir, config, store) = harness().await;
        let good = write_note(&dir, "good.md", "healthy content\n");
        let bad = dir
            .path()
            .join("missing.md")
            .to_string_lossy()
            .to_string();

        let report = run_build(
            &config,
            store.clone(),
            &[bad.clone(), good],
            &BuildOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(report.indexed(), 1);
        assert_eq!(report.failed(), 1);
        let failed = store.source_by_origin(&bad).await.unwrap().unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert!(failed.detail.is_some());
    }

    #[tokio::test]
    async fn test_blank_file_fails_with_no_indexable_text() {
        let (dir, config, store) = harness().await;
        let blank = write_note(&dir, "blank.md", "   \n\n");

        let report = run_build(&config, store.clone(), &[blank], &BuildOptions::default())
            .await
            .unwrap();
        assert_eq!(report.failed(), 1);
        assert_eq!(
            report.sources[0].detail.as_deref(),
            Some("no indexable text")
        );
    }

    #[tokio::test]
    async fn test_duplicate_refs_collapse() {
        let (dir, config, store) = harness().await;
        let note = write_note(&dir, "a.md", "deduplicated\n");

        let report = run_build(
            &config,
            store.clone(),
            &[note.clone(), note.clone()],
            &BuildOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.indexed(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_identity_is_fatal() {
        let (dir, config, store) = harness().await;
        store
            .ensure_embedding_identity("other-model:999")
            .await
            .unwrap();

        let note = write_note(&dir, "a.md", "content\n");
        let err = run_build(&config, store.clone(), &[note], &BuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingModelMismatch { .. }));
        assert_eq!(store.passage_total().await.unwrap(), 0);
    }
}
