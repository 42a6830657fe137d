//! Hybrid retrieval engine.
//!
//! Per query: route, embed once, run the vector and BM25 channels at the
//! candidate limit, fuse with RRF, apply learned boosts, optionally ask
//! an LLM to rerank, truncate, and format a token-budgeted context.
//! Search never raises: every failure degrades (empty results, skipped
//! reranker, keyword-only channel) and is flagged on the response.

pub mod context;
pub mod router;
pub mod weights;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::SearchConfig;
use crate::index::{DocumentIndex, SearchHit, SearchOptions};
use crate::llm::{complete_json, ChatMessage, CompletionOptions, Embedder, Llm};
use crate::types::{DocumentType, UseCase};
use context::{ContextFormatter, FormattedContext};
use router::{QueryIntent, RetrievalStrategy};
use weights::LearnedWeightsStore;

/// A completed search.
#[derive(Debug)]
pub struct SearchResponse {
    /// Fused (and possibly reranked) hits, best first.
    pub hits: Vec<SearchHit>,
    /// Routed intent.
    pub intent: QueryIntent,
    /// Formatted context block for the hits.
    pub context: FormattedContext,
    /// Whether any stage degraded (no embedder, store error, reranker
    /// failure).
    pub degraded: bool,
    /// Whether LLM reranking was applied.
    pub reranked: bool,
}

impl SearchResponse {
    fn empty(intent: QueryIntent) -> Self {
        Self {
            hits: Vec::new(),
            intent,
            context: FormattedContext {
                text: String::new(),
                used_tokens: 0,
                truncated: false,
            },
            degraded: false,
            reranked: false,
        }
    }
}

/// The retrieval engine.
pub struct SearchEngine {
    index: Arc<DocumentIndex>,
    weights: Arc<LearnedWeightsStore>,
    embedder: Option<Arc<dyn Embedder>>,
    llm: Option<Arc<dyn Llm>>,
    config: SearchConfig,
}

impl SearchEngine {
    /// Build the engine over its collaborators.
    pub fn new(
        index: Arc<DocumentIndex>,
        weights: Arc<LearnedWeightsStore>,
        embedder: Option<Arc<dyn Embedder>>,
        llm: Option<Arc<dyn Llm>>,
        config: SearchConfig,
    ) -> Self {
        Self { index, weights, embedder, llm, config }
    }

    /// Execute one query end to end. Never errors; degradation is
    /// reported on the response.
    pub fn search(
        &self,
        query: &str,
        use_case: UseCase,
        cancel: Option<&CancellationToken>,
    ) -> SearchResponse {
        let (classification, strategy) =
            router::route(query, self.llm.as_deref(), self.config.min_confidence);

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return SearchResponse::empty(classification.intent);
        }

        let mut degraded = false;

        let learned = match self
            .weights
            .get_active_weights(use_case, self.config.static_weights(use_case))
        {
            Ok(w) => w,
            Err(e) => {
                tracing::warn!(error = %e, "weights store unavailable, using defaults");
                degraded = true;
                crate::types::LearnedWeights::defaults()
            }
        };

        // Embed the query exactly once.
        let query_vector = match &self.embedder {
            Some(embedder) => match embedder.embed_one(query) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, keyword-only search");
                    degraded = true;
                    None
                }
            },
            None => None,
        };

        let rerank_active = self.config.rerank && self.llm.is_some();
        let channel_limit = if rerank_active {
            self.config.initial_limit
        } else {
            self.config.final_limit
        };

        let opts = self.build_options(&strategy, &learned, channel_limit);
        let mut hits = self
            .index
            .search(query, query_vector.as_deref(), &opts);

        if cancel.is_some_and(|c| c.is_cancelled()) {
            return SearchResponse::empty(classification.intent);
        }

        let mut reranked = false;
        if rerank_active && !hits.is_empty() {
            match self.rerank(query, &hits) {
                Ok(scored) => {
                    hits = scored;
                    reranked = true;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "reranker failed, keeping fused order");
                    degraded = true;
                }
            }
        }
        hits.truncate(self.config.final_limit);

        let context = self.build_context(&hits);

        SearchResponse { hits, intent: classification.intent, context, degraded, reranked }
    }

    /// Record click-through feedback against the learned weights.
    pub fn record_feedback(
        &self,
        use_case: UseCase,
        query: &str,
        selected_doc_ids: &[String],
        negative_doc_ids: &[String],
    ) -> crate::error::QuarryResult<()> {
        let resolve = |ids: &[String]| -> Vec<PathBuf> {
            ids.iter()
                .filter_map(|id| self.index.get(id).ok().flatten())
                .map(|d| d.file_path)
                .collect()
        };
        let selected = resolve(selected_doc_ids);
        let negatives = resolve(negative_doc_ids);
        self.weights
            .record_feedback(use_case, query, &selected, &negatives)
    }

    fn build_options(
        &self,
        strategy: &RetrievalStrategy,
        learned: &crate::types::LearnedWeights,
        limit: usize,
    ) -> SearchOptions {
        // Intent-specific weight shifts win over the learned blend except
        // for the default semantic route, which is what feedback tunes.
        let vector_weight = if strategy.intent == QueryIntent::Semantic {
            learned.vector_weight
        } else {
            strategy.vector_weight
        };

        let mut type_weights: BTreeMap<DocumentType, f64> = learned.document_type_weights.clone();
        if type_weights.is_empty() {
            type_weights = DocumentType::all()
                .iter()
                .map(|t| (*t, t.default_weight()))
                .collect();
        }

        SearchOptions {
            limit,
            candidate_limit: limit,
            document_types: None,
            path_pattern: strategy.path_pattern.clone(),
            language: None,
            include_code_chunks: true,
            vector_weight,
            type_weights: Some(type_weights),
            file_boosts: learned.file_boosts.clone(),
        }
    }

    fn rerank(&self, query: &str, hits: &[SearchHit]) -> crate::error::QuarryResult<Vec<SearchHit>> {
        #[derive(Debug, Deserialize)]
        struct RerankEntry {
            id: String,
            score: f64,
        }

        let llm = self
            .llm
            .as_deref()
            .ok_or_else(|| crate::error::QuarryError::Internal("no llm".into()))?;

        let mut prompt = format!(
            "Score each candidate 0-10 for relevance to the query. Respond with a \
             JSON array of {{\"id\", \"score\"}}.\n\nQuery: {query}\n\nCandidates:\n"
        );
        for hit in hits {
            let snippet: String = hit.document.content.chars().take(400).collect();
            prompt.push_str(&format!(
                "\nid: {}\npath: {}\n{}\n",
                hit.document.id,
                hit.document.file_path.display(),
                snippet,
            ));
        }

        let entries: Vec<RerankEntry> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        let scores: BTreeMap<&str, f64> =
            entries.iter().map(|e| (e.id.as_str(), e.score)).collect();

        let mut kept: Vec<(f64, SearchHit)> = hits
            .iter()
            .filter_map(|hit| {
                let score = scores.get(hit.document.id.as_str()).copied().unwrap_or(0.0);
                (score >= self.config.min_rerank_score).then(|| (score, hit.clone()))
            })
            .collect();
        kept.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(kept.into_iter().map(|(_, hit)| hit).collect())
    }

    fn build_context(&self, hits: &[SearchHit]) -> FormattedContext {
        let mut seen = std::collections::HashSet::new();
        let mut summaries = Vec::new();
        for hit in hits {
            if !seen.insert(hit.document.file_path.clone()) {
                continue;
            }
            if let Ok(docs) = self
                .index
                .get_by_file(&hit.document.file_path, Some(&[DocumentType::FileSummary]))
            {
                summaries.extend(docs);
            }
            if seen.len() >= 5 {
                break;
            }
        }
        ContextFormatter::new(self.config.max_tokens).format(hits, &summaries)
    }
}
