//! # research-context
//!
//! Local-first knowledge ingestion and semantic retrieval for research
//! assistants.
//!
//! Point it at the things you are studying — documentation sites, talk
//! recordings, git repositories, your own notes — and it builds a
//! queryable context: text is extracted, split into overlapping
//! passages, embedded, and stored in a single SQLite file. Questions
//! come back as ranked passages with enough provenance to cite (page
//! URL, file and line range, or playback timestamp).
//!
//! ## Architecture
//!
//! ```text
//!           ┌────────────────────────────────────────────────┐
//!  refs ───►│ build: detect ─► extract ─► chunk ─► embed ─►  │──► SQLite
//!           │        │                             persist   │  (one context)
//!           │        └─ web seeds fan out through a          │      │
//!           │           bounded breadth-first crawl          │      │
//!           └────────────────────────────────────────────────┘      │
//!                                                                   ▼
//!           ┌────────────────────────────────────────────────┐  passages +
//!  ask ────►│ query: embed ─► cosine rank ─► top-k citations │  locators
//!           └────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rctx init                                  # write a starter config
//! rctx build https://docs.example.com        # crawl and index a site
//! rctx build ./notes.md talk.md              # index local notes
//! rctx build https://youtu.be/abc123         # index a talk transcript
//! rctx query "how does the scheduler work"
//! rctx inspect                               # what the context holds
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`build`] | Build pipeline and worker pool |
//! | [`query`] | Question answering over the store |
//! | [`store`] | SQLite persistence, manifest, ranking |
//! | [`chunk`] | Overlapping passage splitter |
//! | [`embedding`] | Embedding providers and vector utilities |
//! | [`crawl`] | Bounded breadth-first page crawler |
//! | [`extractor`] | Extraction trait and kind detection |
//! | [`extract_web`] | HTML fetch, boilerplate stripping, links |
//! | [`extract_video`] | Caption track download and parsing |
//! | [`extract_repo`] | Git clone and documentation selection |
//! | [`extract_file`] | Local file reader |
//! | [`cache`] | On-disk fetch cache |
//! | [`config`] | TOML configuration |
//! | [`models`] | Sources, passages, locators, reports |
//! | [`error`] | Error taxonomy |

pub mod build;
pub mod cache;
pub mod chunk;
pub mod config;
pub mod crawl;
pub mod embedding;
pub mod error;
pub mod extract_file;
pub mod extract_repo;
pub mod extract_video;
pub mod extract_web;
pub mod extractor;
pub mod models;
pub mod query;
pub mod store;

pub use build::{run_build, BuildOptions};
pub use config::{load_config, Config};
pub use error::{EngineError, Result};
pub use models::{BuildMode, BuildReport, Manifest, QueryOutcome, RankedPassage, SourceKind};
pub use query::run_query;
pub use store::ContextStore;
