use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub context: ContextConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Path of the SQLite store for this context.
    pub path: PathBuf,
    #[serde(default = "default_context_name")]
    pub name: String,
}

fn default_context_name() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Restrict expansion to the seed's host.
    #[serde(default = "default_true")]
    pub same_domain_only: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_pages: default_max_pages(),
            same_domain_only: true,
            timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_max_depth() -> usize {
    3
}
fn default_max_pages() -> usize {
    50
}
fn default_true() -> bool {
    true
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("rctx/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name for remote providers (e.g. `text-embedding-3-small`).
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepositoryConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    /// Upper bound on files read from one checkout.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.mdx".to_string(),
        "**/*.rst".to_string(),
        "**/*.txt".to_string(),
        "**/openapi.{json,yaml,yml}".to_string(),
        "**/*.proto".to_string(),
    ]
}
fn default_max_files() -> usize {
    200
}
fn default_max_file_bytes() -> u64 {
    256 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct VideoConfig {
    /// Preferred caption language.
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
        }
    }
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    /// Extraction worker pool size (sources processed in parallel).
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to a `cache/` directory next to the store file.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl Config {
    /// All-defaults configuration for a store at `path`. Used by tests and
    /// callers embedding the engine without a config file.
    pub fn minimal(path: impl Into<PathBuf>) -> Self {
        Self {
            context: ContextConfig {
                path: path.into(),
                name: default_context_name(),
            },
            chunking: ChunkingConfig::default(),
            crawl: CrawlConfig::default(),
            embedding: EmbeddingConfig::default(),
            repository: RepositoryConfig::default(),
            video: VideoConfig::default(),
            query: QueryConfig::default(),
            build: BuildConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Cache directory for this context, honoring the `[cache] dir` override.
    pub fn cache_dir(&self) -> PathBuf {
        match &self.cache.dir {
            Some(dir) => dir.clone(),
            None => {
                let parent = self
                    .context
                    .path
                    .parent()
                    .unwrap_or_else(|| Path::new("."));
                parent.join("cache")
            }
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate crawl
    if config.crawl.max_pages == 0 {
        anyhow::bail!("crawl.max_pages must be >= 1");
    }

    // Validate embedding
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be set when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    // Validate query and build
    if config.query.top_k == 0 {
        anyhow::bail!("query.top_k must be >= 1");
    }
    if config.build.workers == 0 {
        anyhow::bail!("build.workers must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_defaults() {
        let config = Config::minimal("/tmp/ctx.sqlite");
        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.crawl.max_depth, 3);
        assert_eq!(config.crawl.max_pages, 50);
        assert!(config.crawl.same_domain_only);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dims, 384);
        assert_eq!(config.query.top_k, 6);
    }

    #[test]
    fn test_cache_dir_defaults_next_to_store() {
        let config = Config::minimal("/data/ctx/store.sqlite");
        assert_eq!(config.cache_dir(), PathBuf::from("/data/ctx/cache"));
    }

    #[test]
    fn test_sparse_toml_fills_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [context]
            path = "ctx.sqlite"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.context.name, "default");
        assert_eq!(parsed.chunking.max_tokens, 500);
        assert_eq!(parsed.embedding.provider, "hash");
        assert_eq!(parsed.build.workers, 4);
    }
}
