//! SQLite-backed context store.
//!
//! One store file holds one context: a single-row `manifest`, the
//! `sources` table keyed by origin, and the `passages` table carrying
//! text, embedding BLOBs, and citation locators.
//!
//! ```text
//! manifest (id=1)          sources                  passages
//! ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ context_name     │     │ id (uuid)        │◄────│ source_id        │
//! │ embedding_identity│    │ origin UNIQUE    │     │ seq              │
//! │ created_at       │     │ kind/status      │     │ text             │
//! │ updated_at       │     │ passage_count    │     │ embedding BLOB   │
//! └──────────────────┘     └──────────────────┘     │ locator JSON     │
//!                                                   └──────────────────┘
//! ```
//!
//! # Consistency
//!
//! Every structural write happens inside one transaction, so a crashed
//! build never leaves half a source behind. Two locks coordinate
//! concurrent work within the process:
//!
//! | Operation | `writer` (Mutex) | `gate` (RwLock) |
//! |-----------|------------------|-----------------|
//! | `nearest_passages` | — | read |
//! | `insert_source`, `record_failure` | held | — |
//! | `refresh_source`, `clear` | held | write |
//!
//! Appends serialize with each other but run alongside queries; queries
//! against mid-append state are safe because a source's passages become
//! visible only at commit. A refresh takes the write gate for just its
//! delete+insert transaction, so no query can observe a source's stale
//! and fresh passages mixed. Lock order is always `writer` before
//! `gate`.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{EngineError, Result};
use crate::models::{
    Manifest, Passage, RankedPassage, Source, SourceKind, SourceStatus,
};

pub struct ContextStore {
    pool: SqlitePool,
    /// Readers hold this shared; refresh and clear hold it exclusively.
    gate: RwLock<()>,
    /// Serializes all structural writes. Acquired before `gate`.
    writer: Mutex<()>,
}

impl ContextStore {
    /// Open (creating if needed) the store at the configured path.
    pub async fn open(config: &Config) -> Result<Self> {
        let path = &config.context.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;

        let now = Utc::now().timestamp();
        sqlx::query(
            "INSERT OR IGNORE INTO manifest (id, context_name, embedding_identity, created_at, updated_at)
             VALUES (1, ?, NULL, ?, ?)",
        )
        .bind(&config.context.name)
        .bind(now)
        .bind(now)
        .execute(&pool)
        .await?;

        debug!(path = %path.display(), "context store open");
        Ok(Self {
            pool,
            gate: RwLock::new(()),
            writer: Mutex::new(()),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ============ Sources & passages ============

    pub async fn source_by_origin(&self, origin: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, kind, origin, title, status, detail, passage_count, ingested_at
             FROM sources WHERE origin = ?",
        )
        .bind(origin)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_source(&r)).transpose()
    }

    /// Insert a brand-new source and its passages in one transaction.
    ///
    /// The origin must not exist yet; replacing an existing origin goes
    /// through [`refresh_source`](Self::refresh_source).
    pub async fn insert_source(&self, source: &Source, passages: &[Passage]) -> Result<()> {
        let _w = self.writer.lock().await;

        let mut tx = self.pool.begin().await?;
        insert_source_row(&mut tx, source).await?;
        for passage in passages {
            insert_passage_row(&mut tx, passage).await?;
        }
        touch_manifest(&mut tx).await?;
        tx.commit().await?;

        debug!(origin = %source.origin, passages = passages.len(), "source inserted");
        Ok(())
    }

    /// Atomically replace whatever the origin previously held.
    ///
    /// Queries are excluded only for the duration of the transaction, and
    /// can never observe old and new passages of the source together.
    pub async fn refresh_source(&self, source: &Source, passages: &[Passage]) -> Result<()> {
        let _w = self.writer.lock().await;
        let _g = self.gate.write().await;

        let mut tx = self.pool.begin().await?;
        // Cascade removes the old passages.
        sqlx::query("DELETE FROM sources WHERE origin = ?")
            .bind(&source.origin)
            .execute(&mut *tx)
            .await?;
        insert_source_row(&mut tx, source).await?;
        for passage in passages {
            insert_passage_row(&mut tx, passage).await?;
        }
        touch_manifest(&mut tx).await?;
        tx.commit().await?;

        debug!(origin = %source.origin, passages = passages.len(), "source refreshed");
        Ok(())
    }

    /// Record a failed ingestion so the manifest lists the attempt.
    ///
    /// If the origin already holds indexed content (a refresh that broke
    /// mid-extraction), the content is kept and nothing is written.
    pub async fn record_failure(
        &self,
        kind: SourceKind,
        origin: &str,
        reason: &str,
    ) -> Result<()> {
        let _w = self.writer.lock().await;

        let existing: Option<String> =
            sqlx::query("SELECT status FROM sources WHERE origin = ?")
                .bind(origin)
                .fetch_optional(&self.pool)
                .await?
                .map(|r| r.get("status"));
        if existing.as_deref() == Some(SourceStatus::Indexed.as_str()) {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO sources (id, kind, origin, title, status, detail, passage_count, ingested_at)
             VALUES (?, ?, ?, NULL, 'failed', ?, 0, ?)
             ON CONFLICT(origin) DO UPDATE SET
                 kind = excluded.kind,
                 status = 'failed',
                 detail = excluded.detail,
                 ingested_at = excluded.ingested_at",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(kind.as_str())
        .bind(origin)
        .bind(reason)
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        touch_manifest(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete all sources and passages and forget the embedding identity.
    pub async fn clear(&self) -> Result<()> {
        let _w = self.writer.lock().await;
        let _g = self.gate.write().await;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM passages").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sources").execute(&mut *tx).await?;
        sqlx::query("UPDATE manifest SET embedding_identity = NULL, updated_at = ? WHERE id = 1")
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("context cleared");
        Ok(())
    }

    // ============ Embedding identity ============

    pub async fn embedding_identity(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT embedding_identity FROM manifest WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::CorruptStore("manifest row missing".to_string()))?;
        Ok(row.get("embedding_identity"))
    }

    /// Stamp the identity on first use; reject any later change.
    ///
    /// Vectors from different models are incomparable, so a context keeps
    /// exactly one identity from its first indexed source until a clear.
    pub async fn ensure_embedding_identity(&self, identity: &str) -> Result<()> {
        let _w = self.writer.lock().await;

        match self.embedding_identity().await? {
            None => {
                sqlx::query(
                    "UPDATE manifest SET embedding_identity = ?, updated_at = ? WHERE id = 1",
                )
                .bind(identity)
                .bind(Utc::now().timestamp())
                .execute(&self.pool)
                .await?;
                Ok(())
            }
            Some(stored) if stored == identity => Ok(()),
            Some(stored) => Err(EngineError::EmbeddingModelMismatch {
                stored,
                current: identity.to_string(),
            }),
        }
    }

    // ============ Reads ============

    pub async fn passage_total(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM passages")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Whole-context summary: manifest row plus every source.
    pub async fn manifest(&self) -> Result<Manifest> {
        let row = sqlx::query(
            "SELECT context_name, embedding_identity, created_at, updated_at
             FROM manifest WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::CorruptStore("manifest row missing".to_string()))?;

        let source_rows = sqlx::query(
            "SELECT id, kind, origin, title, status, detail, passage_count, ingested_at
             FROM sources ORDER BY ingested_at ASC, origin ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        let sources = source_rows
            .iter()
            .map(row_to_source)
            .collect::<Result<Vec<_>>>()?;

        Ok(Manifest {
            context_name: row.get("context_name"),
            embedding_identity: row.get("embedding_identity"),
            created_at: ts(row.get("created_at")),
            updated_at: ts(row.get("updated_at")),
            passage_count: self.passage_total().await?,
            sources,
        })
    }

    /// The `k` passages closest to the query vector by cosine similarity.
    ///
    /// Scoring happens in process: candidate vectors are decoded from
    /// their BLOBs and compared one by one. Ordering is deterministic:
    /// score descending, then passage id ascending on exact ties.
    pub async fn nearest_passages(&self, query: &[f32], k: usize) -> Result<Vec<RankedPassage>> {
        let _g = self.gate.read().await;

        let rows = sqlx::query(
            "SELECT p.id, p.seq, p.text, p.embedding, p.locator,
                    s.origin, s.title, s.kind
             FROM passages p JOIN sources s ON s.id = p.source_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut ranked = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            let score = cosine_similarity(query, &embedding);

            let kind_raw: String = row.get("kind");
            let kind = SourceKind::parse(&kind_raw).ok_or_else(|| {
                EngineError::CorruptStore(format!("unknown source kind '{}'", kind_raw))
            })?;

            ranked.push(RankedPassage {
                passage_id: row.get("id"),
                source_origin: row.get("origin"),
                source_title: row.get("title"),
                kind,
                seq: row.get("seq"),
                text: row.get("text"),
                locator: decode_locator(row.get("locator"))?,
                score,
            });
        }

        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.passage_id.cmp(&b.passage_id))
        });
        ranked.truncate(k);
        Ok(ranked)
    }
}

// ============ Schema ============

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS manifest (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            context_name TEXT NOT NULL,
            embedding_identity TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            origin TEXT NOT NULL UNIQUE,
            title TEXT,
            status TEXT NOT NULL,
            detail TEXT,
            passage_count INTEGER NOT NULL DEFAULT 0,
            ingested_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS passages (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_count INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            locator TEXT,
            UNIQUE (source_id, seq)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_passages_source ON passages(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}

// ============ Row helpers ============

async fn insert_source_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    source: &Source,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO sources (id, kind, origin, title, status, detail, passage_count, ingested_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&source.id)
    .bind(source.kind.as_str())
    .bind(&source.origin)
    .bind(&source.title)
    .bind(source.status.as_str())
    .bind(&source.detail)
    .bind(source.passage_count)
    .bind(source.ingested_at.timestamp())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_passage_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    passage: &Passage,
) -> Result<()> {
    let locator = passage
        .locator
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    sqlx::query(
        "INSERT INTO passages (id, source_id, seq, text, token_count, embedding, locator)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&passage.id)
    .bind(&passage.source_id)
    .bind(passage.seq)
    .bind(&passage.text)
    .bind(passage.token_count)
    .bind(vec_to_blob(&passage.embedding))
    .bind(locator)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn touch_manifest(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query("UPDATE manifest SET updated_at = ? WHERE id = 1")
        .bind(Utc::now().timestamp())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    let kind_raw: String = row.get("kind");
    let kind = SourceKind::parse(&kind_raw)
        .ok_or_else(|| EngineError::CorruptStore(format!("unknown source kind '{}'", kind_raw)))?;
    let status_raw: String = row.get("status");
    let status = SourceStatus::parse(&status_raw).ok_or_else(|| {
        EngineError::CorruptStore(format!("unknown source status '{}'", status_raw))
    })?;

    Ok(Source {
        id: row.get("id"),
        kind,
        origin: row.get("origin"),
        title: row.get("title"),
        status,
        detail: row.get("detail"),
        passage_count: row.get("passage_count"),
        ingested_at: ts(row.get("ingested_at")),
    })
}

fn decode_locator(raw: Option<String>) -> Result<Option<crate::models::Locator>> {
    raw.map(|s| {
        serde_json::from_str(&s)
            .map_err(|e| EngineError::CorruptStore(format!("locator: {}", e)))
    })
    .transpose()
}

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::approx_tokens;
    use crate::models::Locator;
    use std::collections::HashSet;
    use std::sync::Arc;
    use uuid::Uuid;

    async fn open_store() -> (tempfile::TempDir, ContextStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::minimal(dir.path().join("ctx.db"));
        let store = ContextStore::open(&config).await.unwrap();
        (dir, store)
    }

    fn source(origin: &str, passage_count: i64) -> Source {
        Source {
            id: Uuid::new_v4().to_string(),
            kind: SourceKind::Web,
            origin: origin.to_string(),
            title: Some("Title".to_string()),
            status: SourceStatus::Indexed,
            detail: None,
            passage_count,
            ingested_at: Utc::now(),
        }
    }

    fn passage(source_id: &str, seq: i64, text: &str, embedding: Vec<f32>) -> Passage {
        Passage {
            id: Uuid::new_v4().to_string(),
            source_id: source_id.to_string(),
            seq,
            text: text.to_string(),
            token_count: approx_tokens(text) as i64,
            embedding,
            locator: Some(Locator::Span { start: 0, end: text.len() }),
        }
    }

    #[tokio::test]
    async fn test_open_seeds_manifest() {
        let (_dir, store) = open_store().await;
        let manifest = store.manifest().await.unwrap();
        assert_eq!(manifest.context_name, "default");
        assert_eq!(manifest.embedding_identity, None);
        assert!(manifest.sources.is_empty());
        assert_eq!(manifest.passage_count, 0);
    }

    #[tokio::test]
    async fn test_insert_and_fetch_roundtrip() {
        let (_dir, store) = open_store().await;
        let src = source("https://example.com/a", 2);
        let passages = vec![
            passage(&src.id, 0, "first passage", vec![1.0, 0.0]),
            passage(&src.id, 1, "second passage", vec![0.0, 1.0]),
        ];
        store.insert_source(&src, &passages).await.unwrap();

        let fetched = store
            .source_by_origin("https://example.com/a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status, SourceStatus::Indexed);
        assert_eq!(fetched.passage_count, 2);
        assert_eq!(fetched.title.as_deref(), Some("Title"));
        assert_eq!(store.passage_total().await.unwrap(), 2);

        let manifest = store.manifest().await.unwrap();
        assert_eq!(manifest.sources.len(), 1);
        assert_eq!(manifest.passage_count, 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_exactly() {
        let (_dir, store) = open_store().await;
        let old = source("https://example.com/page", 3);
        let old_passages = vec![
            passage(&old.id, 0, "old zero", vec![1.0, 0.0]),
            passage(&old.id, 1, "old one", vec![1.0, 0.0]),
            passage(&old.id, 2, "old two", vec![1.0, 0.0]),
        ];
        store.insert_source(&old, &old_passages).await.unwrap();

        let new = source("https://example.com/page", 2);
        let new_passages = vec![
            passage(&new.id, 0, "new zero", vec![1.0, 0.0]),
            passage(&new.id, 1, "new one", vec![1.0, 0.0]),
        ];
        store.refresh_source(&new, &new_passages).await.unwrap();

        assert_eq!(store.passage_total().await.unwrap(), 2);
        let hits = store.nearest_passages(&[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.text.starts_with("new")));

        let manifest = store.manifest().await.unwrap();
        assert_eq!(manifest.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_record_failure_upserts() {
        let (_dir, store) = open_store().await;
        store
            .record_failure(SourceKind::Video, "https://youtu.be/x", "no transcript")
            .await
            .unwrap();

        let failed = store
            .source_by_origin("https://youtu.be/x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.detail.as_deref(), Some("no transcript"));
        assert_eq!(failed.passage_count, 0);

        // A later failure overwrites the detail.
        store
            .record_failure(SourceKind::Video, "https://youtu.be/x", "timeout")
            .await
            .unwrap();
        let failed = store
            .source_by_origin("https://youtu.be/x")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.detail.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_record_failure_keeps_indexed_content() {
        let (_dir, store) = open_store().await;
        let src = source("https://example.com/good", 1);
        let passages = vec![passage(&src.id, 0, "kept text", vec![1.0, 0.0])];
        store.insert_source(&src, &passages).await.unwrap();

        store
            .record_failure(SourceKind::Web, "https://example.com/good", "fetch broke")
            .await
            .unwrap();

        let still = store
            .source_by_origin("https://example.com/good")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(still.status, SourceStatus::Indexed);
        assert_eq!(store.passage_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_embedding_identity_lifecycle() {
        let (_dir, store) = open_store().await;
        assert_eq!(store.embedding_identity().await.unwrap(), None);

        store.ensure_embedding_identity("hash-v1:384").await.unwrap();
        store.ensure_embedding_identity("hash-v1:384").await.unwrap();
        assert_eq!(
            store.embedding_identity().await.unwrap().as_deref(),
            Some("hash-v1:384")
        );

        let err = store
            .ensure_embedding_identity("other-model:512")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingModelMismatch { .. }));

        // Clearing forgets the identity so a new model can take over.
        store.clear().await.unwrap();
        assert_eq!(store.embedding_identity().await.unwrap(), None);
        store
            .ensure_embedding_identity("other-model:512")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_wipes_everything() {
        let (_dir, store) = open_store().await;
        let src = source("https://example.com/a", 1);
        let passages = vec![passage(&src.id, 0, "text", vec![1.0])];
        store.insert_source(&src, &passages).await.unwrap();
        store.ensure_embedding_identity("hash-v1:384").await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.passage_total().await.unwrap(), 0);
        let manifest = store.manifest().await.unwrap();
        assert!(manifest.sources.is_empty());
        assert_eq!(manifest.embedding_identity, None);
    }

    #[tokio::test]
    async fn test_nearest_passages_ranks_and_truncates() {
        let (_dir, store) = open_store().await;
        let a = source("https://example.com/a", 2);
        store
            .insert_source(
                &a,
                &[
                    passage(&a.id, 0, "exact hit", vec![1.0, 0.0]),
                    passage(&a.id, 1, "close hit", vec![0.8, 0.6]),
                ],
            )
            .await
            .unwrap();
        let b = source("https://example.com/b", 1);
        store
            .insert_source(&b, &[passage(&b.id, 0, "orthogonal", vec![0.0, 1.0])])
            .await
            .unwrap();

        let hits = store.nearest_passages(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "exact hit");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert_eq!(hits[1].text, "close hit");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].source_origin, "https://example.com/a");
        assert_eq!(hits[0].kind, SourceKind::Web);
        assert!(hits[0].locator.is_some());
    }

    #[tokio::test]
    async fn test_nearest_passages_ties_break_by_id() {
        let (_dir, store) = open_store().await;
        let src = source("https://example.com/t", 2);
        let mut p1 = passage(&src.id, 0, "twin one", vec![1.0, 0.0]);
        p1.id = "aaaa".to_string();
        let mut p2 = passage(&src.id, 1, "twin two", vec![1.0, 0.0]);
        p2.id = "bbbb".to_string();
        store.insert_source(&src, &[p2, p1]).await.unwrap();

        let hits = store.nearest_passages(&[1.0, 0.0], 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["aaaa", "bbbb"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_see_whole_generations() {
        let (_dir, store) = open_store().await;
        let store = Arc::new(store);

        let seed = source("https://example.com/live", 3);
        let seed_passages: Vec<Passage> = (0..3)
            .map(|seq| passage(&seed.id, seq, &format!("gen0 passage {}", seq), vec![1.0, 0.0]))
            .collect();
        store.insert_source(&seed, &seed_passages).await.unwrap();

        let refresher = {
            let store = store.clone();
            tokio::spawn(async move {
                for gen in 1..=40 {
                    let next = source("https://example.com/live", 3);
                    let fresh: Vec<Passage> = (0..3)
                        .map(|seq| {
                            let text = format!("gen{} passage {}", gen, seq);
                            passage(&next.id, seq, &text, vec![1.0, 0.0])
                        })
                        .collect();
                    store.refresh_source(&next, &fresh).await.unwrap();
                }
            })
        };

        // Every query overlapping a refresh must see one whole
        // generation: three passages, all carrying the same tag.
        let readers: Vec<_> = (0..3)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    for _ in 0..60 {
                        let hits = store.nearest_passages(&[1.0, 0.0], 10).await.unwrap();
                        assert_eq!(hits.len(), 3, "query saw a partially replaced source");
                        let tags: HashSet<&str> = hits
                            .iter()
                            .map(|h| h.text.split_whitespace().next().unwrap())
                            .collect();
                        assert_eq!(tags.len(), 1, "query mixed generations: {:?}", tags);
                    }
                })
            })
            .collect();

        refresher.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }
}
