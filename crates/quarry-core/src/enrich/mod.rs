//! Enrichment orchestration.
//!
//! Each document type has an extractor registered under its type tag.
//! For a set of files the orchestrator walks the type dependency DAG in
//! topological order; a type runs for a file only once all its
//! dependency types are complete there. `file_summary` and
//! `symbol_summary` extractors support batched extraction; the batched
//! path is chosen when at least `batch_threshold` items of one type are
//! ready together, and falls back to per-item calls when a batch fails.
//!
//! Per-item failures are recorded on the tracker as `Failed` with error
//! text and never stop the remaining items.

pub mod extractors;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use tokio_util::sync::CancellationToken;

use crate::config::EnrichmentConfig;
use crate::error::{QuarryError, QuarryResult};
use crate::index::DocumentIndex;
use crate::llm::{with_backoff, Embedder, Llm, DEFAULT_MAX_RETRIES};
use crate::tracker::FileTracker;
use crate::types::{CodeUnit, Document, DocumentType, EnrichmentStatus, Language};

/// Everything an extractor sees for one file.
pub struct ExtractionInput<'a> {
    /// Repo-relative path.
    pub file_path: &'a Path,
    /// Content hash of the file.
    pub file_hash: &'a str,
    /// Full file text.
    pub file_content: &'a str,
    /// Source language.
    pub language: Language,
    /// Extracted unit hierarchy.
    pub code_units: &'a [CodeUnit],
    /// Documents already produced for this file (dependency types).
    pub prior_docs: Vec<Document>,
}

/// One per-type extractor.
pub trait DocExtractor: Send + Sync {
    /// The type this extractor produces.
    fn document_type(&self) -> DocumentType;

    /// Types that must be complete before this one runs.
    fn dependencies(&self) -> &'static [DocumentType] {
        self.document_type().dependencies()
    }

    /// Produce zero or more documents for one file.
    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>>;

    /// Whether [`DocExtractor::extract_batch`] packs several files into
    /// one LLM call.
    fn supports_batching(&self) -> bool {
        false
    }

    /// Batched extraction: one result vector per input, same order.
    fn extract_batch(
        &self,
        llm: &dyn Llm,
        inputs: &[&ExtractionInput<'_>],
    ) -> QuarryResult<Vec<Vec<Document>>> {
        inputs.iter().map(|input| self.extract(llm, input)).collect()
    }
}

/// Extractor registry keyed by document type.
pub struct ExtractorRegistry {
    extractors: BTreeMap<DocumentType, Box<dyn DocExtractor>>,
}

impl ExtractorRegistry {
    /// Registry with the standard internally sourced extractors.
    pub fn standard() -> Self {
        let mut extractors: BTreeMap<DocumentType, Box<dyn DocExtractor>> = BTreeMap::new();
        for e in extractors::standard_set() {
            extractors.insert(e.document_type(), e);
        }
        Self { extractors }
    }

    /// Look up the extractor for a type.
    pub fn get(&self, ty: DocumentType) -> Option<&dyn DocExtractor> {
        self.extractors.get(&ty).map(Box::as_ref)
    }

    /// Registered types.
    pub fn types(&self) -> Vec<DocumentType> {
        self.extractors.keys().copied().collect()
    }
}

/// Topologically sort `types` by their dependency edges.
///
/// Dependencies outside `types` are ignored for ordering but still gate
/// readiness at run time. The declared graph is acyclic; a cycle would
/// be a programming error and surfaces as `Input`.
pub fn topo_order(types: &[DocumentType]) -> QuarryResult<Vec<DocumentType>> {
    let mut graph: DiGraph<DocumentType, ()> = DiGraph::new();
    let mut nodes = BTreeMap::new();
    for ty in types {
        nodes.insert(*ty, graph.add_node(*ty));
    }
    for ty in types {
        for dep in ty.dependencies() {
            if let (Some(&from), Some(&to)) = (nodes.get(dep), nodes.get(ty)) {
                graph.add_edge(from, to, ());
            }
        }
    }
    let order = toposort(&graph, None)
        .map_err(|_| QuarryError::input("document type dependency cycle"))?;
    Ok(order.into_iter().map(|n| graph[n]).collect())
}

/// One file queued for enrichment.
pub struct FileJob {
    /// Repo-relative path.
    pub path: PathBuf,
    /// Content hash at ingestion time.
    pub hash: String,
    /// Full file text.
    pub content: String,
    /// Source language.
    pub language: Language,
    /// Unit hierarchy from the AST pass.
    pub units: Vec<CodeUnit>,
}

/// Outcome of one enrichment run.
#[derive(Debug, Default)]
pub struct EnrichReport {
    /// Documents written to the index.
    pub documents_produced: usize,
    /// `(file, type)` items that failed.
    pub items_failed: usize,
    /// Bounded sample of error strings.
    pub error_sample: Vec<String>,
    /// Whether the run stopped on cancellation.
    pub aborted: bool,
}

const ERROR_SAMPLE_CAP: usize = 10;

/// Drives per-file extraction across the type DAG.
pub struct EnrichmentOrchestrator {
    registry: ExtractorRegistry,
    llm: Arc<dyn Llm>,
    embedder: Option<Arc<dyn Embedder>>,
    config: EnrichmentConfig,
}

impl EnrichmentOrchestrator {
    /// Create an orchestrator with the standard registry.
    pub fn new(
        llm: Arc<dyn Llm>,
        embedder: Option<Arc<dyn Embedder>>,
        config: EnrichmentConfig,
    ) -> Self {
        Self { registry: ExtractorRegistry::standard(), llm, embedder, config }
    }

    /// Enrich the given files into the document index, updating tracker
    /// state per `(file, type)`.
    pub async fn enrich_files(
        &self,
        jobs: &[FileJob],
        tracker: &FileTracker,
        index: &DocumentIndex,
        cancel: &CancellationToken,
    ) -> QuarryResult<EnrichReport> {
        let mut report = EnrichReport::default();
        if !self.config.enabled || jobs.is_empty() {
            return Ok(report);
        }

        let targets: Vec<DocumentType> = self
            .config
            .target_types()
            .into_iter()
            .filter(|t| self.registry.get(*t).is_some())
            .collect();
        let order = topo_order(&targets)?;

        for ty in order {
            if cancel.is_cancelled() {
                report.aborted = true;
                return Ok(report);
            }
            let extractor = match self.registry.get(ty) {
                Some(e) => e,
                None => continue,
            };

            // A file is ready when the type is not yet complete and all
            // dependency types are complete for it.
            let mut ready: Vec<&FileJob> = Vec::new();
            for job in jobs {
                if !tracker.needs_enrichment(&job.path, ty)? {
                    continue;
                }
                let state = tracker.enrichment_state(&job.path)?;
                let deps_done = extractor
                    .dependencies()
                    .iter()
                    .all(|dep| state.get(dep) == Some(&EnrichmentStatus::Complete));
                if deps_done {
                    ready.push(job);
                }
            }
            if ready.is_empty() {
                continue;
            }

            tracing::debug!(doc_type = %ty, files = ready.len(), "enriching");

            if extractor.supports_batching() && ready.len() >= self.config.batch_threshold {
                for batch in ready.chunks(self.config.max_batch_size) {
                    if cancel.is_cancelled() {
                        report.aborted = true;
                        return Ok(report);
                    }
                    self.run_batch(extractor, batch, tracker, index, &mut report)
                        .await?;
                }
            } else {
                for job in ready {
                    if cancel.is_cancelled() {
                        report.aborted = true;
                        return Ok(report);
                    }
                    self.run_item(extractor, job, tracker, index, &mut report)
                        .await?;
                }
            }
        }

        Ok(report)
    }

    async fn run_batch(
        &self,
        extractor: &dyn DocExtractor,
        batch: &[&FileJob],
        tracker: &FileTracker,
        index: &DocumentIndex,
        report: &mut EnrichReport,
    ) -> QuarryResult<()> {
        let inputs: Vec<ExtractionInput<'_>> = batch
            .iter()
            .map(|&job| self.input_for(job, extractor, index))
            .collect::<QuarryResult<_>>()?;
        let input_refs: Vec<&ExtractionInput<'_>> = inputs.iter().collect();

        for job in batch {
            tracker.set_enrichment(
                &job.path,
                extractor.document_type(),
                EnrichmentStatus::InProgress,
            )?;
        }

        let llm = Arc::clone(&self.llm);
        let outcome =
            with_backoff(DEFAULT_MAX_RETRIES, || extractor.extract_batch(&*llm, &input_refs))
                .await;

        match outcome {
            Ok(per_file) if per_file.len() == batch.len() => {
                for (job, docs) in batch.iter().copied().zip(per_file) {
                    self.commit_docs(extractor.document_type(), job, docs, tracker, index, report)?;
                }
                Ok(())
            }
            Ok(_) | Err(_) => {
                if let Err(e) = &outcome {
                    tracing::warn!(doc_type = %extractor.document_type(), error = %e,
                        "batched extraction failed, falling back to per-item calls");
                }
                for &job in batch {
                    self.run_item(extractor, job, tracker, index, report).await?;
                }
                Ok(())
            }
        }
    }

    async fn run_item(
        &self,
        extractor: &dyn DocExtractor,
        job: &FileJob,
        tracker: &FileTracker,
        index: &DocumentIndex,
        report: &mut EnrichReport,
    ) -> QuarryResult<()> {
        let ty = extractor.document_type();
        tracker.set_enrichment(&job.path, ty, EnrichmentStatus::InProgress)?;

        let input = self.input_for(job, extractor, index)?;
        let llm = Arc::clone(&self.llm);
        let outcome = with_backoff(DEFAULT_MAX_RETRIES, || extractor.extract(&*llm, &input)).await;

        match outcome {
            Ok(docs) => {
                self.commit_docs(ty, job, docs, tracker, index, report)?;
            }
            Err(e) => {
                report.items_failed += 1;
                if report.error_sample.len() < ERROR_SAMPLE_CAP {
                    report
                        .error_sample
                        .push(format!("{}/{ty}: {e}", job.path.display()));
                }
                tracker.set_enrichment(&job.path, ty, EnrichmentStatus::Failed(e.to_string()))?;
                tracing::warn!(path = %job.path.display(), doc_type = %ty, error = %e,
                    "enrichment item failed");
            }
        }
        Ok(())
    }

    fn input_for<'a>(
        &self,
        job: &'a FileJob,
        extractor: &dyn DocExtractor,
        index: &DocumentIndex,
    ) -> QuarryResult<ExtractionInput<'a>> {
        // Prior docs restricted to the extractor's declared dependencies.
        let prior = index.get_by_file(&job.path, Some(extractor.dependencies()))?;
        Ok(ExtractionInput {
            file_path: &job.path,
            file_hash: &job.hash,
            file_content: &job.content,
            language: job.language,
            code_units: &job.units,
            prior_docs: prior,
        })
    }

    fn commit_docs(
        &self,
        ty: DocumentType,
        job: &FileJob,
        mut docs: Vec<Document>,
        tracker: &FileTracker,
        index: &DocumentIndex,
        report: &mut EnrichReport,
    ) -> QuarryResult<()> {
        if let Some(embedder) = &self.embedder {
            let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
            match embedder.embed_many(&texts) {
                Ok(vectors) => {
                    for (doc, v) in docs.iter_mut().zip(vectors) {
                        doc.vector = Some(v);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding failed, documents stay keyword-only");
                }
            }
        }

        index.insert(&docs)?;
        report.documents_produced += docs.len();
        tracker.set_enrichment(&job.path, ty, EnrichmentStatus::Complete)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmErrorKind;
    use crate::llm::ScriptedLlm;
    use crate::parser::{units, ParserHost};
    use crate::store::Store;
    use crate::tracker::hash_bytes;

    fn job_for(dir: &Path, name: &str, content: &str) -> FileJob {
        std::fs::write(dir.join(name), content).expect("write");
        let host = ParserHost::new();
        let path = PathBuf::from(name);
        let units = units::extract(&host, content, &path, Language::TypeScript, "h");
        FileJob {
            path,
            hash: hash_bytes(content.as_bytes()),
            content: content.to_string(),
            language: Language::TypeScript,
            units,
        }
    }

    fn harness(dir: &Path) -> (FileTracker, DocumentIndex) {
        let store = Arc::new(Store::open(&dir.join("index.db")).expect("open"));
        let tracker = FileTracker::new(Arc::clone(&store), dir);
        let index = DocumentIndex::in_memory(store, 8);
        (tracker, index)
    }

    fn config_with(types: Vec<DocumentType>) -> EnrichmentConfig {
        EnrichmentConfig { types, ..EnrichmentConfig::default() }
    }

    #[test]
    fn topo_order_respects_dependencies() {
        let order = topo_order(&[
            DocumentType::ProjectDoc,
            DocumentType::Idiom,
            DocumentType::FileSummary,
            DocumentType::CodeChunk,
        ])
        .expect("topo");

        let pos = |t: DocumentType| order.iter().position(|x| *x == t).expect("present");
        assert!(pos(DocumentType::CodeChunk) < pos(DocumentType::FileSummary));
        assert!(pos(DocumentType::FileSummary) < pos(DocumentType::Idiom));
        assert!(pos(DocumentType::Idiom) < pos(DocumentType::ProjectDoc));
    }

    #[tokio::test]
    async fn chunk_then_summary_in_dependency_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, index) = harness(dir.path());
        let job = job_for(dir.path(), "a.ts", "export function a() {}");
        tracker.mark_indexed(&job.path, &job.hash, &[]).expect("mark");

        let llm = ScriptedLlm::new("");
        llm.push_response(r#"{"summary": "File a.", "responsibilities": []}"#);

        let orch = EnrichmentOrchestrator::new(
            llm.into_arc(),
            None,
            config_with(vec![DocumentType::FileSummary, DocumentType::CodeChunk]),
        );
        let report = orch
            .enrich_files(&[job], &tracker, &index, &CancellationToken::new())
            .await
            .expect("enrich");

        assert_eq!(report.items_failed, 0);
        assert!(report.documents_produced >= 2);

        // Topological order put the chunk before the summary within the file.
        let docs = index.get_by_file(Path::new("a.ts"), None).expect("docs");
        let chunk_pos = docs
            .iter()
            .position(|d| d.document_type == DocumentType::CodeChunk)
            .expect("chunk");
        let summary_pos = docs
            .iter()
            .position(|d| d.document_type == DocumentType::FileSummary)
            .expect("summary");
        assert!(chunk_pos < summary_pos);
    }

    #[tokio::test]
    async fn failed_item_recorded_and_others_continue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, index) = harness(dir.path());
        let job_a = job_for(dir.path(), "a.ts", "export function a() {}");
        let job_b = job_for(dir.path(), "b.ts", "export function b() {}");
        tracker.mark_indexed(&job_a.path, &job_a.hash, &[]).expect("mark");
        tracker.mark_indexed(&job_b.path, &job_b.hash, &[]).expect("mark");

        // Batch threshold is 2, so the batched path runs first and fails;
        // the per-item fallback then fails for a and succeeds for b.
        let llm = ScriptedLlm::new("");
        llm.push_error(LlmErrorKind::NonRecoverable, "batch refused");
        llm.push_error(LlmErrorKind::NonRecoverable, "item a refused");
        llm.push_response(r#"{"summary": "File b.", "responsibilities": []}"#);

        let orch = EnrichmentOrchestrator::new(
            llm.into_arc(),
            None,
            config_with(vec![DocumentType::CodeChunk, DocumentType::FileSummary]),
        );
        let report = orch
            .enrich_files(&[job_a, job_b], &tracker, &index, &CancellationToken::new())
            .await
            .expect("enrich");

        assert_eq!(report.items_failed, 1);
        assert!(!report.error_sample.is_empty());

        let state_a = tracker.enrichment_state(Path::new("a.ts")).expect("state");
        assert!(matches!(
            state_a.get(&DocumentType::FileSummary),
            Some(EnrichmentStatus::Failed(_))
        ));
        let state_b = tracker.enrichment_state(Path::new("b.ts")).expect("state");
        assert_eq!(
            state_b.get(&DocumentType::FileSummary),
            Some(&EnrichmentStatus::Complete)
        );
    }

    #[tokio::test]
    async fn complete_types_are_skipped_on_rerun() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, index) = harness(dir.path());
        let job = job_for(dir.path(), "a.ts", "export function a() {}");
        tracker.mark_indexed(&job.path, &job.hash, &[]).expect("mark");

        let llm = ScriptedLlm::new("");
        llm.push_response(r#"{"summary": "File a.", "responsibilities": []}"#);
        let llm = llm.into_arc();

        let orch = EnrichmentOrchestrator::new(
            Arc::clone(&llm),
            None,
            config_with(vec![DocumentType::CodeChunk, DocumentType::FileSummary]),
        );
        orch.enrich_files(
            &[FileJob {
                path: job.path.clone(),
                hash: job.hash.clone(),
                content: job.content.clone(),
                language: job.language,
                units: job.units.clone(),
            }],
            &tracker,
            &index,
            &CancellationToken::new(),
        )
        .await
        .expect("first run");

        let report = orch
            .enrich_files(&[job], &tracker, &index, &CancellationToken::new())
            .await
            .expect("second run");
        assert_eq!(report.documents_produced, 0, "nothing left to produce");
    }

    #[tokio::test]
    async fn cancellation_stops_cleanly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tracker, index) = harness(dir.path());
        let job = job_for(dir.path(), "a.ts", "export function a() {}");
        tracker.mark_indexed(&job.path, &job.hash, &[]).expect("mark");

        let cancel = CancellationToken::new();
        cancel.cancel();

        let orch = EnrichmentOrchestrator::new(
            ScriptedLlm::new("").into_arc(),
            None,
            config_with(vec![DocumentType::CodeChunk]),
        );
        let report = orch
            .enrich_files(&[job], &tracker, &index, &cancel)
            .await
            .expect("enrich");
        assert!(report.aborted);
        assert_eq!(report.documents_produced, 0);
    }
}
