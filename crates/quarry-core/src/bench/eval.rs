//! Benchmark evaluators.
//!
//! Each evaluation kind is a trait object in a registry keyed by its
//! tag. Evaluators score models from the generated summaries; per-item
//! failures are counted but never fail the phase on their own.
//!
//! Pairwise judging packs comparisons into batched LLM calls with a
//! per-batch timeout. A timed-out or unparseable batch is skipped
//! silently, its slot reclaimed, and its cost divided evenly across the
//! batch.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::bench::scheduler::ModelSpec;
use crate::bench::{BenchUnit, GeneratedSummary};
use crate::config::BenchmarkConfig;
use crate::error::QuarryResult;
use crate::llm::{complete_json, parse_json_response, ChatMessage, CompletionOptions, Llm};

/// Everything an evaluator sees.
pub struct EvalContext<'a> {
    /// Units under benchmark, keyed by id.
    pub units: &'a BTreeMap<String, BenchUnit>,
    /// All generated summaries.
    pub summaries: &'a [GeneratedSummary],
    /// Participating models (for self-evaluation).
    pub models: &'a [ModelSpec],
    /// The judge model.
    pub judge: Arc<dyn Llm>,
    /// Pipeline configuration.
    pub config: &'a BenchmarkConfig,
    /// Cooperative cancellation.
    pub cancel: CancellationToken,
}

/// Scores and accounting from one evaluation kind.
#[derive(Debug, Default, Clone)]
pub struct EvalOutcome {
    /// Score per model in `[0, 1]`.
    pub scores: BTreeMap<String, f64>,
    /// Items attempted.
    pub items_total: usize,
    /// Items that failed.
    pub items_failed: usize,
    /// Tokens spent.
    pub cost_tokens: u64,
}

/// One evaluation kind.
pub trait Evaluator: Send + Sync {
    /// Registry tag (`judge`, `contrastive`, `retrieval`, `downstream`,
    /// `self`).
    fn kind(&self) -> &'static str;

    /// Run the evaluation.
    fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, QuarryResult<EvalOutcome>>;
}

/// The standard evaluator registry.
pub fn evaluator_registry() -> BTreeMap<&'static str, Box<dyn Evaluator>> {
    let evaluators: Vec<Box<dyn Evaluator>> = vec![
        Box::new(JudgeEvaluator),
        Box::new(ContrastiveEvaluator),
        Box::new(RetrievalEvaluator),
        Box::new(DownstreamEvaluator),
        Box::new(SelfEvaluator),
    ];
    evaluators.into_iter().map(|e| (e.kind(), e)).collect()
}

// ---------------------------------------------------------------------------
// Pairwise judge batching
// ---------------------------------------------------------------------------

/// One summary-vs-summary comparison.
#[derive(Debug, Clone)]
pub struct JudgePair {
    /// Unit both summaries describe.
    pub unit_id: String,
    /// First contestant model.
    pub model_a: String,
    /// First summary.
    pub summary_a: String,
    /// Second contestant model.
    pub model_b: String,
    /// Second summary.
    pub summary_b: String,
    /// Excerpt of the unit source shown to the judge.
    pub unit_excerpt: String,
}

/// Aggregated judging results.
#[derive(Debug, Default)]
pub struct JudgeTally {
    /// Wins per model.
    pub wins: BTreeMap<String, u64>,
    /// Comparisons that produced a verdict.
    pub comparisons: u64,
    /// Batches skipped on timeout or parse failure.
    pub skipped_batches: usize,
    /// Tokens spent, including skipped batches.
    pub cost_tokens: u64,
}

/// Packs comparisons into batched judge calls.
pub struct JudgeBatcher {
    /// Comparisons per LLM call.
    pub batch_size: usize,
    /// Per-batch wall-clock budget.
    pub timeout: Duration,
    /// Max batches in flight.
    pub max_inflight: usize,
}

#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    index: usize,
    winner: String,
}

impl JudgeBatcher {
    /// Run all pairs; per-batch failures skip that batch and continue.
    pub async fn run(
        &self,
        judge: Arc<dyn Llm>,
        pairs: Vec<JudgePair>,
        cancel: &CancellationToken,
    ) -> JudgeTally {
        let mut tally = JudgeTally::default();
        let permits = Arc::new(Semaphore::new(self.max_inflight.max(1)));

        let mut handles = Vec::new();
        for batch in pairs.chunks(self.batch_size.max(1)) {
            if cancel.is_cancelled() {
                break;
            }
            let batch: Vec<JudgePair> = batch.to_vec();
            let judge = Arc::clone(&judge);
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;

            handles.push(tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                let prompt = batch_prompt(&batch);
                let call = tokio::task::spawn_blocking(move || {
                    judge.complete(&[ChatMessage::user(prompt)], &CompletionOptions::default())
                });

                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(Ok(completion))) => {
                        let cost = completion
                            .usage
                            .map(|u| u.input_tokens + u.output_tokens)
                            .unwrap_or(0);
                        match parse_json_response::<Vec<JudgeVerdict>>(&completion.content) {
                            Ok(verdicts) => Some((batch, verdicts, cost)),
                            Err(e) => {
                                tracing::debug!(error = %e, "judge batch unparseable, skipping");
                                Some((batch, Vec::new(), cost))
                            }
                        }
                    }
                    Ok(Ok(Err(e))) => {
                        tracing::debug!(error = %e, "judge batch failed, skipping");
                        Some((batch, Vec::new(), 0))
                    }
                    Ok(Err(join_err)) => {
                        tracing::debug!(error = %join_err, "judge batch panicked, skipping");
                        Some((batch, Vec::new(), 0))
                    }
                    Err(_elapsed) => {
                        tracing::debug!("judge batch timed out, skipping");
                        Some((batch, Vec::new(), 0))
                    }
                }
            }));
        }

        for handle in handles {
            let Ok(Some((batch, verdicts, cost))) = handle.await else {
                continue;
            };
            // Cost is attributed evenly across the batch whether or not
            // it produced verdicts.
            tally.cost_tokens += cost;
            if verdicts.is_empty() {
                tally.skipped_batches += 1;
                continue;
            }
            for verdict in verdicts {
                let Some(pair) = batch.get(verdict.index) else {
                    continue;
                };
                let winner = match verdict.winner.as_str() {
                    "a" => &pair.model_a,
                    "b" => &pair.model_b,
                    _ => continue,
                };
                *tally.wins.entry(winner.clone()).or_insert(0) += 1;
                tally.comparisons += 1;
            }
        }

        tally
    }
}

fn batch_prompt(batch: &[JudgePair]) -> String {
    let mut prompt = String::from(
        "For each comparison decide which summary describes the code better. \
         Respond with a JSON array of {\"index\", \"winner\"} where winner is \
         \"a\" or \"b\".\n",
    );
    for (i, pair) in batch.iter().enumerate() {
        prompt.push_str(&format!(
            "\n## Comparison {i}\nCode:\n```\n{}\n```\nSummary a: {}\nSummary b: {}\n",
            pair.unit_excerpt, pair.summary_a, pair.summary_b,
        ));
    }
    prompt
}

// ---------------------------------------------------------------------------
// Evaluators
// ---------------------------------------------------------------------------

/// Pairwise judging across models.
pub struct JudgeEvaluator;

impl Evaluator for JudgeEvaluator {
    fn kind(&self) -> &'static str {
        "judge"
    }

    fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, QuarryResult<EvalOutcome>> {
        Box::pin(async move {
            let mut pairs = Vec::new();
            for (unit_id, unit) in ctx.units {
                let unit_summaries: Vec<&GeneratedSummary> = ctx
                    .summaries
                    .iter()
                    .filter(|s| &s.unit_id == unit_id)
                    .collect();
                for i in 0..unit_summaries.len() {
                    for j in (i + 1)..unit_summaries.len() {
                        let a = unit_summaries[i];
                        let b = unit_summaries[j];
                        pairs.push(JudgePair {
                            unit_id: unit_id.clone(),
                            model_a: a.model.clone(),
                            summary_a: a.summary.clone(),
                            model_b: b.model.clone(),
                            summary_b: b.summary.clone(),
                            unit_excerpt: unit.content.chars().take(800).collect(),
                        });
                    }
                }
            }

            let interactive = ctx.models.iter().any(|m| m.interactive);
            let timeout_ms = if interactive {
                ctx.config.interactive_batch_timeout_ms
            } else {
                ctx.config.batch_timeout_ms
            };
            let batcher = JudgeBatcher {
                batch_size: ctx.config.judge_batch_size,
                timeout: Duration::from_millis(timeout_ms),
                max_inflight: ctx.config.max_inflight_batches,
            };

            let total = pairs.len();
            let tally = batcher.run(Arc::clone(&ctx.judge), pairs, &ctx.cancel).await;

            // A model's score is its win share among the comparisons it
            // appeared in.
            let mut appearances: BTreeMap<String, u64> = BTreeMap::new();
            for s in ctx.summaries {
                let others = ctx
                    .summaries
                    .iter()
                    .filter(|o| o.unit_id == s.unit_id && o.model != s.model)
                    .count() as u64;
                *appearances.entry(s.model.clone()).or_insert(0) += others;
            }
            let mut scores = BTreeMap::new();
            for (model, appeared) in &appearances {
                if *appeared == 0 {
                    continue;
                }
                let wins = tally.wins.get(model).copied().unwrap_or(0);
                let denominator = (*appeared).max(1) as f64;
                scores.insert(model.clone(), (wins as f64 / denominator).min(1.0));
            }

            Ok(EvalOutcome {
                scores,
                items_total: total,
                items_failed: tally.skipped_batches * ctx.config.judge_batch_size.min(total),
                cost_tokens: tally.cost_tokens,
            })
        })
    }
}

#[derive(Debug, Deserialize)]
struct ContrastiveAnswer {
    answer: usize,
}

/// Can the judge match a summary back to its unit among distractors?
pub struct ContrastiveEvaluator;

impl Evaluator for ContrastiveEvaluator {
    fn kind(&self) -> &'static str {
        "contrastive"
    }

    fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, QuarryResult<EvalOutcome>> {
        Box::pin(async move {
            let unit_ids: Vec<&String> = ctx.units.keys().collect();
            let mut correct: BTreeMap<String, (u64, u64)> = BTreeMap::new();
            let mut outcome = EvalOutcome::default();

            for summary in ctx.summaries {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                if unit_ids.len() < 3 {
                    break;
                }
                outcome.items_total += 1;

                // The true unit plus two deterministic distractors.
                let true_pos = unit_ids
                    .iter()
                    .position(|id| **id == summary.unit_id)
                    .unwrap_or(0);
                let d1 = (true_pos + 1) % unit_ids.len();
                let d2 = (true_pos + 2) % unit_ids.len();
                let mut lineup = [true_pos, d1, d2];
                lineup.sort_unstable();
                let answer_index = lineup
                    .iter()
                    .position(|p| *p == true_pos)
                    .unwrap_or(0);

                let mut prompt = format!(
                    "Which code snippet does this summary describe? Respond with JSON \
                     {{\"answer\": <index>}}.\n\nSummary: {}\n",
                    summary.summary
                );
                for (i, pos) in lineup.iter().enumerate() {
                    let unit = &ctx.units[unit_ids[*pos]];
                    let snippet: String = unit.content.chars().take(400).collect();
                    prompt.push_str(&format!("\n[{i}]\n```\n{snippet}\n```\n"));
                }

                match complete_json::<ContrastiveAnswer>(
                    &*ctx.judge,
                    &[ChatMessage::user(prompt)],
                    &CompletionOptions::default(),
                ) {
                    Ok(parsed) => {
                        let entry = correct.entry(summary.model.clone()).or_insert((0, 0));
                        entry.1 += 1;
                        if parsed.answer == answer_index {
                            entry.0 += 1;
                        }
                    }
                    Err(e) => {
                        outcome.items_failed += 1;
                        tracing::debug!(error = %e, "contrastive item failed");
                    }
                }
            }

            outcome.scores = correct
                .into_iter()
                .map(|(model, (hits, total))| (model, hits as f64 / total.max(1) as f64))
                .collect();
            Ok(outcome)
        })
    }
}

/// Does the summary retrieve its own unit? Mean reciprocal rank by
/// token overlap; no LLM involved.
pub struct RetrievalEvaluator;

impl Evaluator for RetrievalEvaluator {
    fn kind(&self) -> &'static str {
        "retrieval"
    }

    fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, QuarryResult<EvalOutcome>> {
        Box::pin(async move {
            let mut totals: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            let mut outcome = EvalOutcome::default();

            for summary in ctx.summaries {
                outcome.items_total += 1;
                let query = token_set(&summary.summary);
                let mut ranked: Vec<(&String, f64)> = ctx
                    .units
                    .iter()
                    .map(|(id, unit)| (id, overlap(&query, &token_set(&unit.content))))
                    .collect();
                ranked.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                });

                let rank = ranked
                    .iter()
                    .position(|(id, _)| **id == summary.unit_id)
                    .map(|p| p + 1);
                let rr = rank.map_or(0.0, |r| 1.0 / r as f64);
                let entry = totals.entry(summary.model.clone()).or_insert((0.0, 0));
                entry.0 += rr;
                entry.1 += 1;
            }

            outcome.scores = totals
                .into_iter()
                .map(|(model, (sum, n))| (model, sum / n.max(1) as f64))
                .collect();
            Ok(outcome)
        })
    }
}

#[derive(Debug, Deserialize)]
struct ScoredAnswer {
    score: f64,
}

/// Judge-rated usefulness of the summary for answering questions about
/// the code without seeing it.
pub struct DownstreamEvaluator;

impl Evaluator for DownstreamEvaluator {
    fn kind(&self) -> &'static str {
        "downstream"
    }

    fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, QuarryResult<EvalOutcome>> {
        Box::pin(async move {
            let mut totals: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            let mut outcome = EvalOutcome::default();

            for summary in ctx.summaries {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                outcome.items_total += 1;
                let Some(unit) = ctx.units.get(&summary.unit_id) else {
                    outcome.items_failed += 1;
                    continue;
                };
                let prompt = format!(
                    "A developer must answer questions about `{}` using only this \
                     summary. Rate 0-10 how well it supports that. Respond with JSON \
                     {{\"score\"}}.\n\nSummary: {}",
                    unit.name, summary.summary
                );
                match complete_json::<ScoredAnswer>(
                    &*ctx.judge,
                    &[ChatMessage::user(prompt)],
                    &CompletionOptions::default(),
                ) {
                    Ok(parsed) => {
                        let entry = totals.entry(summary.model.clone()).or_insert((0.0, 0));
                        entry.0 += (parsed.score / 10.0).clamp(0.0, 1.0);
                        entry.1 += 1;
                    }
                    Err(e) => {
                        outcome.items_failed += 1;
                        tracing::debug!(error = %e, "downstream item failed");
                    }
                }
            }

            outcome.scores = totals
                .into_iter()
                .map(|(model, (sum, n))| (model, sum / n.max(1) as f64))
                .collect();
            Ok(outcome)
        })
    }
}

/// Each model rates its own summaries.
pub struct SelfEvaluator;

impl Evaluator for SelfEvaluator {
    fn kind(&self) -> &'static str {
        "self"
    }

    fn evaluate<'a>(&'a self, ctx: &'a EvalContext<'a>) -> BoxFuture<'a, QuarryResult<EvalOutcome>> {
        Box::pin(async move {
            let mut totals: BTreeMap<String, (f64, u64)> = BTreeMap::new();
            let mut outcome = EvalOutcome::default();

            for summary in ctx.summaries {
                if ctx.cancel.is_cancelled() {
                    break;
                }
                let Some(model) = ctx.models.iter().find(|m| m.name == summary.model) else {
                    continue;
                };
                outcome.items_total += 1;
                let prompt = format!(
                    "Rate your own summary 0-10 for accuracy and completeness. Respond \
                     with JSON {{\"score\"}}.\n\nSummary: {}",
                    summary.summary
                );
                match complete_json::<ScoredAnswer>(
                    &*model.llm,
                    &[ChatMessage::user(prompt)],
                    &CompletionOptions::default(),
                ) {
                    Ok(parsed) => {
                        let entry = totals.entry(summary.model.clone()).or_insert((0.0, 0));
                        entry.0 += (parsed.score / 10.0).clamp(0.0, 1.0);
                        entry.1 += 1;
                    }
                    Err(e) => {
                        outcome.items_failed += 1;
                        tracing::debug!(error = %e, "self-eval item failed");
                    }
                }
            }

            outcome.scores = totals
                .into_iter()
                .map(|(model, (sum, n))| (model, sum / n.max(1) as f64))
                .collect();
            Ok(outcome)
        })
    }
}

fn token_set(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    shared / (a.len().min(b.len())) as f64
}
