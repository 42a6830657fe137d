//! Quarry CLI.
//!
//! Command-line interface for indexing, searching, analysing, and
//! watching a project. All real work lives in quarry-core; this binary
//! parses arguments, builds an engine, and prints results.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use quarry_core::analysis::DeadCodeOptions;
use quarry_core::types::UseCase;
use quarry_core::{Config, Engine};

/// Quarry - local semantic code search and structural analysis
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about = "Local semantic code-search engine")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Log level filter.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a project tree.
    Index {
        /// Path to the project root.
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Search the indexed project.
    Search {
        /// Search query (natural language, keywords, or a symbol name).
        query: String,

        /// Path to the project root.
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Retrieval preset.
        #[arg(long, default_value = "search", value_parser = ["fim", "search", "navigation"])]
        use_case: String,

        /// Print the formatted context block instead of the hit list.
        #[arg(long)]
        context: bool,
    },

    /// Print a token-budgeted structural map of the project.
    Map {
        /// Path to the project root.
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Token budget.
        #[arg(long, default_value_t = 2000)]
        max_tokens: u32,

        /// Focus the map on a query.
        #[arg(long)]
        query: Option<String>,
    },

    /// Structural analyses over the reference graph.
    Analyze {
        /// Path to the project root.
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Analysis to run.
        #[arg(value_parser = ["dead-code", "test-gaps", "impact"])]
        kind: String,

        /// Target symbol name (impact only).
        #[arg(long)]
        symbol: Option<String>,

        /// Maximum traversal depth (impact only).
        #[arg(long, default_value_t = 10)]
        max_depth: u32,

        /// Include exported symbols in dead-code results.
        #[arg(long)]
        include_exported: bool,
    },

    /// Watch the project and keep the index current.
    Watch {
        /// Path to the project root.
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Show engine status and index statistics.
    Status {
        /// Path to the project root.
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Commands::Index { path } => {
            let engine = open_engine(&path)?;
            let cancel = CancellationToken::new();
            let report = engine.run_index(&cancel).await?;
            println!(
                "indexed {} file(s), {} unchanged, {} deleted, {} failed",
                report.files_indexed,
                report.files_unchanged,
                report.files_deleted,
                report.files_failed
            );
            println!(
                "{} units, {} symbols, {} references, {} documents",
                report.units_extracted,
                report.symbols_extracted,
                report.references_extracted,
                report.documents_written
            );
            for error in &report.error_sample {
                eprintln!("  error: {error}");
            }
            engine.shutdown()?;
        }

        Commands::Search { query, path, use_case, context } => {
            let engine = open_engine(&path)?;
            let use_case = UseCase::from_str_lossy(&use_case);
            let response = engine.search(&query, use_case, None);

            if response.hits.is_empty() {
                println!("no results");
                if response.degraded {
                    println!("(search ran degraded; see logs)");
                }
                return Ok(());
            }

            if context {
                println!("{}", response.context.text);
            } else {
                println!("intent: {}", response.intent.as_str());
                for hit in &response.hits {
                    println!(
                        "{:>8.5}  {}  [{}]",
                        hit.fused_score,
                        hit.document.file_path.display(),
                        hit.document.document_type
                    );
                }
            }
        }

        Commands::Map { path, max_tokens, query } => {
            let engine = open_engine(&path)?;
            let cancel = CancellationToken::new();
            engine.run_index(&cancel).await?;
            let map = match query {
                Some(q) => engine.repo_map_for_query(&q, max_tokens),
                None => engine.repo_map(max_tokens),
            };
            print!("{map}");
        }

        Commands::Analyze { path, kind, symbol, max_depth, include_exported } => {
            let engine = open_engine(&path)?;
            let cancel = CancellationToken::new();
            engine.run_index(&cancel).await?;

            match kind.as_str() {
                "dead-code" => {
                    let opts = DeadCodeOptions { include_exported, ..DeadCodeOptions::default() };
                    for s in engine.dead_code(&opts) {
                        println!(
                            "{}:{}  {}  (rank {:.6})",
                            s.file_path.display(),
                            s.start_line,
                            s.name,
                            s.pagerank_score
                        );
                    }
                }
                "test-gaps" => {
                    for s in engine.test_gaps(quarry_core::analysis::TEST_GAP_MIN_PAGERANK) {
                        println!(
                            "{}:{}  {}  (rank {:.6})",
                            s.file_path.display(),
                            s.start_line,
                            s.name,
                            s.pagerank_score
                        );
                    }
                }
                "impact" => {
                    let symbol = symbol.context("--symbol is required for impact analysis")?;
                    let entries = engine.impact(&symbol, max_depth);
                    if entries.is_empty() {
                        println!("no symbol named '{symbol}' or nothing depends on it");
                    }
                    for entry in entries {
                        println!(
                            "depth {}  {}:{}  {}",
                            entry.depth,
                            entry.symbol.file_path.display(),
                            entry.symbol.start_line,
                            entry.symbol.name
                        );
                    }
                }
                _ => unreachable!("clap validates the analysis kind"),
            }
        }

        Commands::Watch { path } => {
            let engine = open_engine(&path)?;
            let cancel = CancellationToken::new();
            engine.run_index(&cancel).await?;
            println!("watching {} (ctrl-c to stop)", path.display());

            let watch_cancel = cancel.clone();
            tokio::select! {
                result = engine.watch(watch_cancel) => result?,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                }
            }
            engine.shutdown()?;
        }

        Commands::Status { path } => {
            let engine = open_engine(&path)?;
            let status = engine.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn open_engine(path: &PathBuf) -> Result<Engine> {
    let root = path
        .canonicalize()
        .with_context(|| format!("project root {} not found", path.display()))?;
    let config = Config::load(&root)?;
    // Providers plug in via the library API; the CLI runs keyword-only
    // with enrichment disabled until one is wired up.
    Engine::new(config, None, None).context("engine initialisation failed")
}
