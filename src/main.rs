//! # research-context CLI (`rctx`)
//!
//! The `rctx` binary is the command-line interface for research-context. It
//! provides commands for initializing a context, ingesting sources (web
//! pages, video transcripts, git repositories, local files), asking
//! questions, and inspecting what the context currently holds.
//!
//! ## Usage
//!
//! ```bash
//! rctx --config ./config/rctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rctx init` | Write a starter config and create the SQLite store |
//! | `rctx build <REFS...>` | Ingest references into the context |
//! | `rctx query "<question>"` | Ask a question against the indexed passages |
//! | `rctx inspect` | Show the context manifest and per-source breakdown |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize config and store
//! rctx init
//!
//! # Crawl and index a documentation site
//! rctx build https://docs.example.com
//!
//! # Index a talk transcript and some local notes
//! rctx build https://youtu.be/abc123 ./notes.md
//!
//! # Re-ingest a source, replacing its previous passages
//! rctx build https://docs.example.com --mode refresh
//!
//! # Ask a question
//! rctx query "how does the scheduler handle backpressure"
//!
//! # See what the context holds
//! rctx inspect
//! ```
//!
//! Reports print to stdout; diagnostics go to stderr via `tracing`
//! (set `RUST_LOG` to adjust verbosity).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use research_context::models::{ReportStatus, SourceStatus};
use research_context::{
    load_config, run_build, run_query, BuildMode, BuildOptions, BuildReport, Config, ContextStore,
    Manifest, QueryOutcome, SourceKind,
};

/// research-context CLI — local-first knowledge ingestion and semantic
/// retrieval for research assistants.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rctx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rctx",
    about = "research-context — build a queryable context from pages, videos, repositories, and files",
    version,
    long_about = "research-context ingests the material you are studying (documentation sites, \
    video transcripts, git repositories, local files), splits it into overlapping passages, \
    embeds them, and stores everything in a single SQLite file. Questions come back as ranked \
    passages with provenance you can cite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rctx.toml`. Store location, chunking, crawl
    /// limits, and embedding settings are read from this file.
    #[arg(long, global = true, default_value = "./config/rctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the configuration and context store.
    ///
    /// Writes a starter config file if none exists, then creates the SQLite
    /// store and its schema. This command is idempotent — running it
    /// multiple times is safe.
    Init,

    /// Ingest references into the context.
    ///
    /// Each reference is detected as a web page, video, git repository, or
    /// local file (override with --kind). Web references are crawled
    /// breadth-first within the configured limits unless --single-page is
    /// given. Sources that fail are reported without aborting the rest of
    /// the build.
    Build {
        /// References to ingest: URLs, repository URLs, or local paths.
        refs: Vec<String>,

        /// Build mode: `append` (skip already-indexed origins), `refresh`
        /// (replace re-ingested origins), or `clear` (wipe first).
        #[arg(long, default_value = "append")]
        mode: String,

        /// Treat every reference as this kind instead of detecting:
        /// `auto`, `web`, `video`, `repo`, or `file`.
        #[arg(long)]
        kind: Option<String>,

        /// Override the configured crawl depth limit.
        #[arg(long)]
        depth: Option<usize>,

        /// Override the configured crawl page budget.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Ingest web references as single pages without following links.
        #[arg(long)]
        single_page: bool,

        /// Allow the crawler to leave the seed's domain.
        #[arg(long)]
        allow_external: bool,

        /// Re-download everything, bypassing the fetch cache.
        #[arg(long)]
        force_fetch: bool,
    },

    /// Ask a question against the indexed context.
    ///
    /// Embeds the question, ranks every stored passage by similarity, and
    /// prints the top matches with scores and citations. An empty context
    /// is reported explicitly rather than as zero results.
    Query {
        /// The question to answer.
        question: String,

        /// Number of passages to return (defaults to `query.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Show the context manifest.
    ///
    /// Prints the embedding model identity, timestamps, totals, and a
    /// per-source breakdown with status and passage counts.
    Inspect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // init runs before config loading so it can scaffold the config file
    if matches!(cli.command, Commands::Init) {
        return run_init(&cli.config).await;
    }

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Build {
            refs,
            mode,
            kind,
            depth,
            max_pages,
            single_page,
            allow_external,
            force_fetch,
        } => {
            let mode = BuildMode::parse(&mode).ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown build mode: '{}'. Must be append, refresh, or clear.",
                    mode
                )
            })?;
            let kind = match kind.as_deref() {
                None | Some("auto") => None,
                Some(label) => Some(SourceKind::parse(label).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown source kind: '{}'. Must be auto, web, video, repo, or file.",
                        label
                    )
                })?),
            };
            let opts = BuildOptions {
                mode,
                kind,
                max_depth: depth,
                max_pages,
                single_page,
                allow_external,
                force_fetch,
            };

            let store = Arc::new(ContextStore::open(&cfg).await?);
            let report = run_build(&cfg, store.clone(), &refs, &opts).await?;
            store.close().await;
            print_build_report(&report);
        }
        Commands::Query { question, k } => {
            let store = Arc::new(ContextStore::open(&cfg).await?);
            let outcome = run_query(&cfg, store.clone(), &question, k).await?;
            store.close().await;
            print_query_outcome(&outcome);
        }
        Commands::Inspect => {
            let store = Arc::new(ContextStore::open(&cfg).await?);
            let manifest = store.manifest().await?;
            store.close().await;
            print_inspect(&cfg, &manifest);
        }
        Commands::Init => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}

/// Route diagnostics to stderr; stdout is reserved for reports.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,research_context=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Scaffold the config file if missing, then create the store and schema.
async fn run_init(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(config_path, STARTER_CONFIG)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Wrote starter config to {}", config_path.display());
    }

    let cfg = load_config(config_path)?;
    let store = ContextStore::open(&cfg).await?;
    store.close().await;
    println!(
        "Context store initialized at {}",
        cfg.context.path.display()
    );
    Ok(())
}

/// Per-source build outcome in the sync-report shape.
fn print_build_report(report: &BuildReport) {
    println!("build {}", report.mode);
    for source in &report.sources {
        match source.status {
            ReportStatus::Indexed => {
                println!(
                    "  indexed  {} ({} passages)",
                    source.origin, source.passages
                );
            }
            ReportStatus::Skipped => {
                let why = source.detail.as_deref().unwrap_or("skipped");
                println!("  skipped  {} ({})", source.origin, why);
            }
            ReportStatus::Failed => {
                let why = source.detail.as_deref().unwrap_or("unknown failure");
                println!("  failed   {} ({})", source.origin, why);
            }
        }
    }
    println!(
        "  sources: {} indexed, {} skipped, {} failed",
        report.indexed(),
        report.skipped(),
        report.failed()
    );
    println!("  passages written: {}", report.passages_written());
    println!("ok");
}

fn print_query_outcome(outcome: &QueryOutcome) {
    match outcome {
        QueryOutcome::EmptyContext => {
            println!("Context is empty. Ingest sources with `rctx build` first.");
        }
        QueryOutcome::Ranked(passages) => {
            if passages.is_empty() {
                println!("No results.");
                return;
            }
            for (i, passage) in passages.iter().enumerate() {
                let title = passage.source_title.as_deref().unwrap_or("(untitled)");
                println!("{}. [{:.2}] {} / {}", i + 1, passage.score, passage.kind, title);
                println!("    origin: {}", passage.source_origin);
                if let Some(locator) = &passage.locator {
                    println!("    cite: {}", locator);
                }
                println!("    excerpt: \"{}\"", excerpt(&passage.text, 240));
                println!();
            }
        }
    }
}

fn print_inspect(config: &Config, manifest: &Manifest) {
    let db_size = std::fs::metadata(&config.context.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("research-context — Context Inspect");
    println!("==================================");
    println!();
    println!("  Store:       {}", config.context.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Context:     {}", manifest.context_name);
    println!(
        "  Model:       {}",
        manifest.embedding_identity.as_deref().unwrap_or("(not set)")
    );
    println!("  Created:     {}", manifest.created_at.format("%Y-%m-%d %H:%M"));
    println!("  Updated:     {}", format_relative(manifest.updated_at));
    println!();
    println!("  Sources:     {}", manifest.sources.len());
    println!("  Passages:    {}", manifest.passage_count);

    if !manifest.sources.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<10} {:<8} {:>8}   {}",
            "KIND", "STATUS", "PASSAGES", "ORIGIN"
        );
        println!("  {}", "-".repeat(76));
        for source in &manifest.sources {
            println!(
                "  {:<10} {:<8} {:>8}   {}",
                source.kind.as_str(),
                source.status.as_str(),
                source.passage_count,
                source.origin
            );
            if source.status == SourceStatus::Failed {
                if let Some(detail) = &source.detail {
                    println!("      {}", detail);
                }
            }
        }
    }

    println!();
}

/// Flatten and truncate passage text for display.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time for recent activity, absolute beyond a month.
fn format_relative(ts: chrono::DateTime<chrono::Utc>) -> String {
    let delta = chrono::Utc::now().signed_duration_since(ts).num_seconds();
    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}

/// Written by `rctx init` when no config file exists yet.
const STARTER_CONFIG: &str = r#"# research-context configuration.
# See config/rctx.example.toml for every available setting.

[context]
path = "./context/research.sqlite"
name = "default"

[chunking]
max_tokens = 500
overlap_tokens = 50

[crawl]
max_depth = 3
max_pages = 50
same_domain_only = true

[embedding]
provider = "hash"
dims = 384

[query]
top_k = 6
"#;
