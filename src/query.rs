//! Query path: embed a question, rank passages, return citations.
//!
//! The question is embedded with the configured provider, compared
//! against every stored passage by cosine similarity, and the top `k`
//! come back with their source origin, title, and locator. An empty
//! context is reported as [`QueryOutcome::EmptyContext`] so callers can
//! tell "nothing indexed yet" apart from "nothing similar enough".
//!
//! Querying never writes. It runs concurrently with appends and is
//! briefly excluded only while a refresh or clear commits.

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::{EngineError, Result};
use crate::models::QueryOutcome;
use crate::store::ContextStore;

/// Answer a question against the context. `k` overrides the configured
/// result count.
pub async fn run_query(
    config: &Config,
    store: Arc<ContextStore>,
    question: &str,
    k: Option<usize>,
) -> Result<QueryOutcome> {
    let question = question.trim();
    if question.is_empty() {
        return Err(EngineError::InvalidReference("question is empty".to_string()));
    }

    if store.passage_total().await? == 0 {
        return Ok(QueryOutcome::EmptyContext);
    }

    let provider = create_provider(&config.embedding)?;
    if let Some(stored) = store.embedding_identity().await? {
        if stored != provider.identity() {
            return Err(EngineError::EmbeddingModelMismatch {
                stored,
                current: provider.identity(),
            });
        }
    }

    let vectors = provider
        .embed(&[question.to_string()])
        .await
        .map_err(|e| EngineError::QueryEmbeddingFailed(e.to_string()))?;
    let query_vec = vectors.into_iter().next().ok_or_else(|| {
        EngineError::QueryEmbeddingFailed("provider returned no vector".to_string())
    })?;

    let k = k.unwrap_or(config.query.top_k).max(1);
    let ranked = store.nearest_passages(&query_vec, k).await?;
    debug!(k, results = ranked.len(), "query ranked");
    Ok(QueryOutcome::Ranked(ranked))
}
