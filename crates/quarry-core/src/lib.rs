//! # quarry-core
//!
//! Core engine of Quarry: local semantic code search and structural
//! analysis. The crate ingests a source tree into a hierarchy of code
//! units, enriches it with LLM-generated documents, persists everything
//! into a hybrid index (dense vectors + FTS5 keyword postings + SQLite
//! metadata), and answers queries that blend semantic similarity,
//! keyword matching, structural relationships, and learned ranking.
//!
//! ## Architecture
//!
//! - **`config`** -- Layered configuration loading
//! - **`store`** -- SQLite store shared by all persistent subsystems
//! - **`tracker`** -- Durable per-file state and change detection
//! - **`parser`** -- Tree-sitter unit, symbol, and reference extraction
//! - **`graph`** -- Reference resolution, PageRank, graph queries
//! - **`enrich`** -- Dependency-ordered LLM document extraction
//! - **`index`** -- Typed document index with RRF hybrid search
//! - **`search`** -- Query routing, retrieval, learned weights, context
//! - **`repomap`** -- Token-budgeted structural outlines
//! - **`analysis`** -- Dead code, test gaps, change impact
//! - **`watcher`** -- Debounced filesystem observation
//! - **`bench`** -- Resumable model-benchmark state machine
//! - **`pipeline`** -- The engine wiring it all together
//!
//! Embedding and LLM providers stay outside this crate; implement the
//! [`llm::Embedder`] and [`llm::Llm`] traits and hand them to
//! [`pipeline::Engine::new`].

pub mod analysis;
pub mod bench;
pub mod config;
pub mod enrich;
pub mod error;
pub mod graph;
pub mod index;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod repomap;
pub mod search;
pub mod store;
pub mod tracker;
pub mod types;
pub mod watcher;

pub use config::Config;
pub use error::{QuarryError, QuarryResult};
pub use pipeline::Engine;
