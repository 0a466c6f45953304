//! Error types for the ingestion and retrieval engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or querying a context.
///
/// Per-source failures ([`SourceUnavailable`](EngineError::SourceUnavailable),
/// [`EmbeddingTransientFailure`](EngineError::EmbeddingTransientFailure)) are
/// caught by the build pipeline, reported, and do not abort the run. Store-level
/// violations ([`EmbeddingModelMismatch`](EngineError::EmbeddingModelMismatch),
/// [`CorruptStore`](EngineError::CorruptStore)) are fatal for the whole operation.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A source could not be fetched or parsed.
    #[error("source unavailable: {reference}: {reason}")]
    SourceUnavailable { reference: String, reason: String },

    /// Embedding kept failing after bounded retries.
    #[error("embedding failed ({attempts} attempts): {reason}")]
    EmbeddingTransientFailure { attempts: u32, reason: String },

    /// The store was indexed with a different embedding model than the one
    /// configured now; vectors from different models are not comparable.
    #[error("embedding model mismatch: store has '{stored}', configured '{current}'")]
    EmbeddingModelMismatch { stored: String, current: String },

    /// A write to the context store failed. Prior state is left intact.
    #[error("store write failed: {0}")]
    StoreWriteFailure(#[from] sqlx::Error),

    /// The question text could not be embedded.
    #[error("query embedding failed: {0}")]
    QueryEmbeddingFailed(String),

    /// The store contents violate an invariant (bad manifest, undecodable row).
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// A reference could not be interpreted as any source kind.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Bad engine configuration (unknown provider, missing credentials).
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shorthand for the skip-and-continue extraction failure.
pub fn unavailable(reference: impl Into<String>, reason: impl ToString) -> EngineError {
    EngineError::SourceUnavailable {
        reference: reference.into(),
        reason: reason.to_string(),
    }
}
