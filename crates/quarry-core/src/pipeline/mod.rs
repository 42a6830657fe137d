//! Pipeline orchestrator.
//!
//! Wires the subsystems into one engine and drives ingestion:
//!
//! ```text
//! watcher -> tracker.diff -> parser (units) -> symbols/refs
//!         -> chunk documents -> embedder -> document index
//!         -> reference graph rebuild (atomic swap)
//!         -> enrichment orchestrator (LLM types)
//! ```
//!
//! Parsing is CPU-bound and fans out over a rayon pool; all store
//! writes stay on the calling task. Unchanged files produce zero writes,
//! so re-running ingestion over an untouched tree is a no-op.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::analysis;
use crate::config::Config;
use crate::enrich::{extractors, EnrichmentOrchestrator, ExtractionInput, FileJob};
use crate::error::{QuarryError, QuarryResult};
use crate::graph::{GraphHandle, PageRankParams, ReferenceGraph, SymbolTable};
use crate::index::DocumentIndex;
use crate::llm::{Embedder, Llm};
use crate::parser::{refs, units, ParserHost};
use crate::repomap;
use crate::search::weights::LearnedWeightsStore;
use crate::search::{SearchEngine, SearchResponse};
use crate::store::Store;
use crate::tracker::{hash_bytes, FileTracker};
use crate::types::{
    CodeUnit, DocumentType, EnrichmentStatus, Language, SymbolDefinition, SymbolReference,
    UseCase,
};
use crate::watcher::{self, ReindexLock, WatchEvent, Watcher};

const EMBEDDING_DIM_FALLBACK: usize = 256;
const ERROR_SAMPLE_CAP: usize = 10;

/// Result of one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    /// Files parsed and stored this run.
    pub files_indexed: usize,
    /// Files that failed to read or store.
    pub files_failed: usize,
    /// Files skipped as unchanged.
    pub files_unchanged: usize,
    /// Files removed from the index.
    pub files_deleted: usize,
    /// Units extracted this run.
    pub units_extracted: usize,
    /// Symbols extracted this run.
    pub symbols_extracted: usize,
    /// References extracted this run.
    pub references_extracted: usize,
    /// Documents written this run (chunks plus enrichments).
    pub documents_written: usize,
    /// Enrichment items that failed.
    pub enrichment_failed: usize,
    /// Bounded sample of error strings.
    pub error_sample: Vec<String>,
}

/// Status snapshot for user-facing reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    /// Project root.
    pub repo_path: String,
    /// Tracked file count.
    pub files_indexed: usize,
    /// Stored symbol count.
    pub symbols: usize,
    /// Stored reference count.
    pub references: usize,
    /// Document counts by type tag.
    pub documents: std::collections::BTreeMap<String, usize>,
    /// Reference-graph node count.
    pub graph_nodes: usize,
    /// Reference-graph edge count.
    pub graph_edges: usize,
    /// `hybrid` with an embedder, `keyword-only` without.
    pub search_mode: String,
}

/// The top-level engine owning every subsystem.
pub struct Engine {
    config: Config,
    tracker: FileTracker,
    index: Arc<DocumentIndex>,
    symbols: SymbolTable,
    graph: GraphHandle,
    parser: Arc<ParserHost>,
    search: SearchEngine,
    orchestrator: Option<EnrichmentOrchestrator>,
    embedder: Option<Arc<dyn Embedder>>,
}

struct ParsedFile {
    path: PathBuf,
    hash: String,
    content: String,
    language: Language,
    units: Vec<CodeUnit>,
    symbols: Vec<SymbolDefinition>,
    references: Vec<SymbolReference>,
}

impl Engine {
    /// Create an engine for a project with optional embedding and LLM
    /// collaborators. Without an embedder the engine runs keyword-only;
    /// without an LLM, enrichment beyond raw chunks is skipped.
    pub fn new(
        config: Config,
        embedder: Option<Arc<dyn Embedder>>,
        llm: Option<Arc<dyn Llm>>,
    ) -> QuarryResult<Self> {
        let data_dir = config.data_dir();
        std::fs::create_dir_all(&data_dir)?;

        let store = Arc::new(Store::open(&data_dir.join("index.db"))?);

        let dimension = embedder
            .as_ref()
            .map(|e| e.dimension())
            .unwrap_or(EMBEDDING_DIM_FALLBACK);
        let index = Arc::new(DocumentIndex::open(
            Arc::clone(&store),
            &data_dir.join("vectors.bin"),
            dimension,
        )?);

        // An embedding-model change invalidates every stored vector;
        // force a clean re-index by dropping all tracked state.
        let stored_model = store.get_meta("embedding_model")?;
        if let Some(stored) = &stored_model {
            if stored != &config.model {
                tracing::warn!(
                    old = %stored,
                    new = %config.model,
                    "embedding model changed, dropping index for re-ingestion"
                );
                let tracker = FileTracker::new(Arc::clone(&store), &config.repo_path);
                for path in tracker.all_paths()? {
                    index.delete_by_file(&path)?;
                    tracker.remove(&path)?;
                }
            }
        }
        store.set_meta("embedding_model", &config.model)?;

        let tracker = FileTracker::new(Arc::clone(&store), &config.repo_path);
        let symbols = SymbolTable::new(Arc::clone(&store));
        let weights = Arc::new(LearnedWeightsStore::new(
            Arc::clone(&store),
            config.search.min_samples,
        ));
        let search = SearchEngine::new(
            Arc::clone(&index),
            weights,
            embedder.clone(),
            llm.clone(),
            config.search.clone(),
        );
        let orchestrator = llm.map(|llm| {
            EnrichmentOrchestrator::new(llm, embedder.clone(), config.enrichment.clone())
        });

        tracing::info!(
            repo = %config.repo_path.display(),
            embedding_available = embedder.is_some(),
            enrichment_available = orchestrator.is_some(),
            "engine initialized"
        );

        Ok(Self {
            config,
            tracker,
            index,
            symbols,
            graph: GraphHandle::new(),
            parser: Arc::new(ParserHost::new()),
            search,
            orchestrator,
            embedder,
        })
    }

    /// Run a full incremental ingestion pass.
    pub async fn run_index(&self, cancel: &CancellationToken) -> QuarryResult<IndexReport> {
        let mut report = IndexReport::default();

        let current = self.scan_files()?;
        let diff = self.tracker.diff(&current)?;
        report.files_unchanged = diff.unchanged.len();

        for path in &diff.deleted {
            self.index.delete_by_file(path)?;
            self.symbols.replace_file(path, &[], &[])?;
            self.tracker.remove(path)?;
            report.files_deleted += 1;
        }

        let mut to_process: Vec<PathBuf> = diff.new;
        to_process.extend(diff.modified);

        if to_process.is_empty() && report.files_deleted == 0 {
            tracing::debug!("ingestion no-op: nothing changed");
            return Ok(report);
        }

        // CPU-bound parse pass on the rayon pool.
        let parser = Arc::clone(&self.parser);
        let root = self.config.repo_path.clone();
        let parsed: Vec<Result<ParsedFile, (PathBuf, String)>> = to_process
            .par_iter()
            .map(|path| parse_one(&parser, &root, path))
            .collect();

        let mut jobs: Vec<FileJob> = Vec::new();
        for result in parsed {
            if cancel.is_cancelled() {
                return Err(QuarryError::Aborted);
            }
            match result {
                Ok(file) => match self.store_file(&file, &mut report) {
                    Ok(()) => {
                        report.files_indexed += 1;
                        jobs.push(FileJob {
                            path: file.path,
                            hash: file.hash,
                            content: file.content,
                            language: file.language,
                            units: file.units,
                        });
                    }
                    Err(e) => {
                        report.files_failed += 1;
                        push_error(&mut report, format!("{}: {e}", file.path.display()));
                        tracing::warn!(path = %file.path.display(), error = %e, "failed to store file");
                    }
                },
                Err((path, message)) => {
                    report.files_failed += 1;
                    push_error(&mut report, format!("{}: {message}", path.display()));
                    tracing::warn!(path = %path.display(), error = %message, "failed to parse file");
                }
            }
        }

        self.rebuild_graph()?;

        if let Some(orchestrator) = &self.orchestrator {
            if self.config.enrichment.enabled && !jobs.is_empty() {
                let enrich_report = orchestrator
                    .enrich_files(&jobs, &self.tracker, &self.index, cancel)
                    .await?;
                report.documents_written += enrich_report.documents_produced;
                report.enrichment_failed += enrich_report.items_failed;
                for e in enrich_report.error_sample {
                    push_error(&mut report, e);
                }
                if enrich_report.aborted {
                    return Err(QuarryError::Aborted);
                }
            }
        }

        self.index.save_vectors()?;

        tracing::info!(
            indexed = report.files_indexed,
            unchanged = report.files_unchanged,
            deleted = report.files_deleted,
            failed = report.files_failed,
            units = report.units_extracted,
            symbols = report.symbols_extracted,
            documents = report.documents_written,
            "ingestion complete"
        );
        Ok(report)
    }

    /// Re-index one file (watcher path). A vanished file is removed.
    pub async fn reindex_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> QuarryResult<()> {
        let abs = self.config.repo_path.join(path);
        if !abs.exists() {
            self.index.delete_by_file(path)?;
            self.symbols.replace_file(path, &[], &[])?;
            self.tracker.remove(path)?;
            self.rebuild_graph()?;
            return Ok(());
        }

        let mut report = IndexReport::default();
        match parse_one(&self.parser, &self.config.repo_path, path) {
            Ok(file) => {
                // Skip untouched content; watchers fire on metadata too.
                if let Some(state) = self.tracker.get_state(path)? {
                    if state.content_hash == file.hash {
                        return Ok(());
                    }
                }
                let job = FileJob {
                    path: file.path.clone(),
                    hash: file.hash.clone(),
                    content: file.content.clone(),
                    language: file.language,
                    units: file.units.clone(),
                };
                self.store_file(&file, &mut report)?;
                self.rebuild_graph()?;
                if let Some(orchestrator) = &self.orchestrator {
                    if self.config.enrichment.enabled {
                        orchestrator
                            .enrich_files(&[job], &self.tracker, &self.index, cancel)
                            .await?;
                    }
                }
                self.index.save_vectors()?;
            }
            Err((path, message)) => {
                tracing::warn!(path = %path.display(), error = %message, "reindex parse failed");
            }
        }
        Ok(())
    }

    /// Watch the project tree and keep the index current until
    /// cancellation. Code-file changes re-index that file; manifest
    /// changes refresh project docs.
    pub async fn watch(&self, cancel: CancellationToken) -> QuarryResult<()> {
        let (tx, mut rx) = mpsc::channel::<WatchEvent>(256);
        let _watcher = Watcher::spawn(
            &self.config.repo_path,
            &self.config.watcher,
            &self.config.indexing.include_extensions,
            tx,
        )?;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        WatchEvent::FileChanged(abs) => {
                            let rel = abs
                                .strip_prefix(&self.config.repo_path)
                                .map(Path::to_path_buf)
                                .unwrap_or(abs);
                            let Some(_lock) = ReindexLock::acquire(&self.config.data_dir())? else {
                                tracing::debug!("reindex lock held elsewhere, skipping event");
                                continue;
                            };
                            if let Err(e) = self.reindex_file(&rel, &cancel).await {
                                tracing::warn!(path = %rel.display(), error = %e, "reindex failed");
                            }
                            ReindexLock::touch_timestamp(&self.config.data_dir())?;
                        }
                        WatchEvent::ManifestChanged(path) => {
                            tracing::info!(path = %path.display(), "dependency manifest changed");
                            if let Err(e) = self.refresh_project_docs(&cancel).await {
                                tracing::warn!(error = %e, "project doc refresh failed");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Reset project-doc enrichment and re-run it across the tree.
    pub async fn refresh_project_docs(&self, cancel: &CancellationToken) -> QuarryResult<()> {
        let Some(orchestrator) = &self.orchestrator else {
            return Ok(());
        };
        if !self.config.enrichment.enabled {
            return Ok(());
        }

        let mut jobs = Vec::new();
        for path in self.tracker.all_paths()? {
            self.tracker
                .set_enrichment(&path, DocumentType::ProjectDoc, EnrichmentStatus::Pending)?;
            match parse_one(&self.parser, &self.config.repo_path, &path) {
                Ok(file) => jobs.push(FileJob {
                    path: file.path,
                    hash: file.hash,
                    content: file.content,
                    language: file.language,
                    units: file.units,
                }),
                Err((path, message)) => {
                    tracing::debug!(path = %path.display(), error = %message, "skipping in doc refresh");
                }
            }
        }
        orchestrator
            .enrich_files(&jobs, &self.tracker, &self.index, cancel)
            .await?;
        Ok(())
    }

    /// Execute a search query.
    pub fn search(
        &self,
        query: &str,
        use_case: UseCase,
        cancel: Option<&CancellationToken>,
    ) -> SearchResponse {
        self.search.search(query, use_case, cancel)
    }

    /// Record click-through feedback.
    pub fn record_feedback(
        &self,
        use_case: UseCase,
        query: &str,
        selected: &[String],
        negative: &[String],
    ) -> QuarryResult<()> {
        self.search.record_feedback(use_case, query, selected, negative)
    }

    /// Token-budgeted structural repo map.
    pub fn repo_map(&self, max_tokens: u32) -> String {
        repomap::generate(&self.graph.snapshot(), max_tokens)
    }

    /// Query-focused repo map.
    pub fn repo_map_for_query(&self, query: &str, max_tokens: u32) -> String {
        repomap::generate_for_query(&self.graph.snapshot(), query, max_tokens)
    }

    /// Dead-code candidates.
    pub fn dead_code(&self, opts: &analysis::DeadCodeOptions) -> Vec<SymbolDefinition> {
        let graph = self.graph.snapshot();
        analysis::dead_code(&graph, opts).into_iter().cloned().collect()
    }

    /// Test-gap candidates.
    pub fn test_gaps(&self, min_pagerank: f64) -> Vec<SymbolDefinition> {
        let graph = self.graph.snapshot();
        analysis::test_gaps(&graph, min_pagerank)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Change impact for a symbol name.
    pub fn impact(&self, symbol_name: &str, max_depth: u32) -> Vec<crate::graph::ImpactEntry> {
        let graph = self.graph.snapshot();
        let Some(symbol) = graph
            .symbols
            .values()
            .filter(|s| s.name == symbol_name)
            .max_by(|a, b| {
                a.pagerank_score
                    .partial_cmp(&b.pagerank_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        else {
            return Vec::new();
        };
        analysis::impact(&graph, &symbol.id, max_depth)
    }

    /// Status snapshot.
    pub fn status(&self) -> QuarryResult<EngineStatus> {
        let graph = self.graph.snapshot();
        let documents = self
            .index
            .stats()?
            .into_iter()
            .map(|(ty, count)| (ty.as_str().to_string(), count))
            .collect();
        Ok(EngineStatus {
            repo_path: self.config.repo_path.display().to_string(),
            files_indexed: self.tracker.file_count()?,
            symbols: self.symbols.symbol_count()?,
            references: self.symbols.reference_count()?,
            documents,
            graph_nodes: graph.node_count(),
            graph_edges: graph.edge_count(),
            search_mode: if self.embedder.is_some() {
                "hybrid".into()
            } else {
                "keyword-only".into()
            },
        })
    }

    /// The current graph snapshot (read-only).
    pub fn graph(&self) -> Arc<ReferenceGraph> {
        self.graph.snapshot()
    }

    /// The engine's configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Persist volatile state (vectors) to disk.
    pub fn shutdown(&self) -> QuarryResult<()> {
        self.index.save_vectors()?;
        tracing::info!("engine shut down");
        Ok(())
    }

    // -- internals ---------------------------------------------------------

    fn store_file(&self, file: &ParsedFile, report: &mut IndexReport) -> QuarryResult<()> {
        // Stale documents from the previous content go first.
        self.index.delete_by_file(&file.path)?;
        self.symbols
            .replace_file(&file.path, &file.symbols, &file.references)?;

        let input = ExtractionInput {
            file_path: &file.path,
            file_hash: &file.hash,
            file_content: &file.content,
            language: file.language,
            code_units: &file.units,
            prior_docs: Vec::new(),
        };
        let mut chunks = extractors::chunk_documents(&input);

        if let Some(embedder) = &self.embedder {
            let texts: Vec<&str> = chunks.iter().map(|d| d.content.as_str()).collect();
            match embedder.embed_many(&texts) {
                Ok(vectors) => {
                    for (doc, v) in chunks.iter_mut().zip(vectors) {
                        doc.vector = Some(v);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chunk embedding failed, keyword-only for file");
                }
            }
        }

        self.index.insert(&chunks)?;
        let chunk_ids: Vec<String> = chunks.iter().map(|d| d.id.clone()).collect();
        self.tracker.mark_indexed(&file.path, &file.hash, &chunk_ids)?;
        self.tracker.set_enrichment(
            &file.path,
            DocumentType::CodeChunk,
            EnrichmentStatus::Complete,
        )?;

        report.units_extracted += file.units.len();
        report.symbols_extracted += file.symbols.len();
        report.references_extracted += file.references.len();
        report.documents_written += chunks.len();
        Ok(())
    }

    fn rebuild_graph(&self) -> QuarryResult<()> {
        let graph = ReferenceGraph::build(
            self.symbols.load_symbols()?,
            self.symbols.load_references()?,
            PageRankParams {
                damping: self.config.indexing.pagerank_damping,
                iterations: self.config.indexing.pagerank_iterations,
            },
        );
        self.symbols.persist_graph(&graph)?;
        self.graph.swap(graph);
        Ok(())
    }

    fn scan_files(&self) -> QuarryResult<Vec<PathBuf>> {
        let mut excludes = globset::GlobSetBuilder::new();
        for pattern in &self.config.indexing.exclude_patterns {
            // Bare names exclude a directory anywhere in the tree.
            let glob = if pattern.contains('/') || pattern.contains('*') {
                pattern.clone()
            } else {
                format!("**/{pattern}/**")
            };
            if let Ok(g) = globset::Glob::new(&glob) {
                excludes.add(g);
            }
        }
        let excludes = excludes
            .build()
            .map_err(|e| QuarryError::Config { details: format!("bad exclude pattern: {e}") })?;

        let mut files = Vec::new();
        let root = self.config.repo_path.clone();
        let mut stack = vec![root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), error = %e, "scan skipping dir");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let rel = path.strip_prefix(&root).unwrap_or(&path).to_path_buf();
                if watcher::is_ignored(&rel) || excludes.is_match(&rel) {
                    continue;
                }
                let Ok(file_type) = entry.file_type() else { continue };
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                let tracked = Language::from_extension(ext).is_some()
                    || self.config.indexing.include_extensions.iter().any(|e| e == ext);
                if !tracked {
                    continue;
                }
                if let Ok(meta) = entry.metadata() {
                    if meta.len() > self.config.indexing.max_file_size {
                        tracing::debug!(path = %rel.display(), "skipping oversized file");
                        continue;
                    }
                }
                files.push(rel);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn parse_one(
    parser: &ParserHost,
    root: &Path,
    path: &Path,
) -> Result<ParsedFile, (PathBuf, String)> {
    let abs = root.join(path);
    let content = std::fs::read_to_string(&abs)
        .map_err(|e| (path.to_path_buf(), format!("read failed: {e}")))?;
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let Some(language) = Language::from_extension(ext) else {
        return Err((path.to_path_buf(), format!("unsupported extension '{ext}'")));
    };
    let hash = hash_bytes(content.as_bytes());

    let units = units::extract(parser, &content, path, language, &hash);
    let symbols = refs::extract_symbols(&units);
    let references = refs::extract_references(parser, &content, path, language, &symbols);

    Ok(ParsedFile { path: path.to_path_buf(), hash, content, language, units, symbols, references })
}

fn push_error(report: &mut IndexReport, error: String) {
    if report.error_sample.len() < ERROR_SAMPLE_CAP {
        report.error_sample.push(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::HashEmbedder;

    fn engine_in(dir: &Path) -> Engine {
        let config = Config::defaults(dir);
        Engine::new(config, Some(Arc::new(HashEmbedder::new(64))), None).expect("engine")
    }

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    #[tokio::test]
    async fn index_empty_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let engine = engine_in(dir.path());
        let report = engine.run_index(&CancellationToken::new()).await.expect("index");
        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.files_failed, 0);
    }

    #[tokio::test]
    async fn index_and_search_single_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "auth.ts", "export function validateToken(token: string) { return token.length > 0; }\n");

        let engine = engine_in(dir.path());
        let report = engine.run_index(&CancellationToken::new()).await.expect("index");
        assert_eq!(report.files_indexed, 1);
        assert!(report.units_extracted >= 2, "file unit plus function");
        assert!(report.symbols_extracted >= 1);
        assert!(report.documents_written >= 1);

        let response = engine.search("validateToken", UseCase::Search, None);
        assert!(!response.hits.is_empty());
        assert_eq!(
            response.hits[0].document.file_path,
            PathBuf::from("auth.ts")
        );

        let status = engine.status().expect("status");
        assert_eq!(status.files_indexed, 1);
        assert_eq!(status.search_mode, "hybrid");
    }

    #[tokio::test]
    async fn second_run_is_noop() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.ts", "export function foo(){return 1;}");

        let engine = engine_in(dir.path());
        engine.run_index(&CancellationToken::new()).await.expect("first");
        let docs_before = engine.index.len().expect("len");
        let symbols_before = engine.symbols.symbol_count().expect("count");

        let report = engine.run_index(&CancellationToken::new()).await.expect("second");
        assert_eq!(report.files_indexed, 0);
        assert_eq!(report.files_unchanged, 1);
        assert_eq!(report.documents_written, 0);
        assert_eq!(engine.index.len().expect("len"), docs_before);
        assert_eq!(engine.symbols.symbol_count().expect("count"), symbols_before);
    }

    #[tokio::test]
    async fn deleting_a_file_cascades() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "gone.py", "def gone(): pass\n");

        let engine = engine_in(dir.path());
        engine.run_index(&CancellationToken::new()).await.expect("first");
        assert!(engine.index.len().expect("len") > 0);

        std::fs::remove_file(dir.path().join("gone.py")).expect("rm");
        let report = engine.run_index(&CancellationToken::new()).await.expect("second");
        assert_eq!(report.files_deleted, 1);
        assert_eq!(engine.index.len().expect("len"), 0);
        assert_eq!(engine.symbols.symbol_count().expect("count"), 0);
        assert_eq!(engine.tracker.file_count().expect("count"), 0);
    }

    #[tokio::test]
    async fn graph_reflects_cross_file_calls() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "lib.ts", "export function shared_helper() { return 1; }\n");
        write(
            dir.path(),
            "main.ts",
            "import { shared_helper } from './lib';\nexport function main_entry() { return shared_helper(); }\n",
        );

        let engine = engine_in(dir.path());
        engine.run_index(&CancellationToken::new()).await.expect("index");

        let graph = engine.graph();
        assert!(graph.node_count() >= 2);
        assert!(graph.edge_count() >= 1);

        let helper = graph
            .symbols
            .values()
            .find(|s| s.name == "shared_helper")
            .expect("helper symbol");
        let callers = graph.callers(&helper.id);
        assert!(callers.iter().any(|c| c.name == "main_entry"));

        let total: f64 = graph.symbols.values().map(|s| s.pagerank_score).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn repo_map_lists_indexed_symbols() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "svc.ts", "export class OrderService { place() {} cancel() {} }\n");

        let engine = engine_in(dir.path());
        engine.run_index(&CancellationToken::new()).await.expect("index");

        let map = engine.repo_map(2000);
        assert!(map.contains("svc.ts"));
        assert!(map.contains("OrderService"));
    }

    #[tokio::test]
    async fn excluded_directories_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src.ts", "export function real() {}\n");
        write(dir.path(), "node_modules/dep/index.js", "function dep() {}\n");
        write(dir.path(), "dist/out.js", "function built() {}\n");

        let engine = engine_in(dir.path());
        let report = engine.run_index(&CancellationToken::new()).await.expect("index");
        assert_eq!(report.files_indexed, 1);
    }

    #[tokio::test]
    async fn broken_file_still_indexes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "bad.py", "def broken(:\n  ???\n");

        let engine = engine_in(dir.path());
        let report = engine.run_index(&CancellationToken::new()).await.expect("index");
        // Parse errors never abort: the file unit is indexed as a chunk.
        assert_eq!(report.files_indexed, 1);
        assert!(report.documents_written >= 1);
    }

    #[tokio::test]
    async fn reindex_file_handles_modify_and_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "w.ts", "export function one() {}\n");

        let engine = engine_in(dir.path());
        engine.run_index(&CancellationToken::new()).await.expect("index");

        write(dir.path(), "w.ts", "export function one() {}\nexport function two() {}\n");
        engine
            .reindex_file(Path::new("w.ts"), &CancellationToken::new())
            .await
            .expect("reindex");
        let response = engine.search("two", UseCase::Search, None);
        assert!(!response.hits.is_empty());

        std::fs::remove_file(dir.path().join("w.ts")).expect("rm");
        engine
            .reindex_file(Path::new("w.ts"), &CancellationToken::new())
            .await
            .expect("reindex deleted");
        assert_eq!(engine.index.len().expect("len"), 0);
    }

    #[tokio::test]
    async fn model_change_forces_reindex() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.ts", "export function foo(){return 1;}");

        {
            let engine = engine_in(dir.path());
            engine.run_index(&CancellationToken::new()).await.expect("index");
            assert_eq!(engine.tracker.file_count().expect("count"), 1);
        }

        let mut config = Config::defaults(dir.path());
        config.model = "different-model".into();
        let engine =
            Engine::new(config, Some(Arc::new(HashEmbedder::new(64))), None).expect("engine");
        // The tracker was wiped, so the next run re-ingests from scratch.
        assert_eq!(engine.tracker.file_count().expect("count"), 0);
        let report = engine.run_index(&CancellationToken::new()).await.expect("index");
        assert_eq!(report.files_indexed, 1);
    }
}
