//! Resumable benchmark pipeline.
//!
//! A dependency-ordered phase state machine:
//!
//! ```text
//! extraction -> generation -> evaluation:iterative
//!            -> {evaluation:judge, evaluation:contrastive,
//!                evaluation:retrieval, evaluation:downstream,
//!                evaluation:self}          (parallel when enabled)
//!            -> aggregation -> reporting
//! ```
//!
//! Per-phase progress persists after every tick, so an interrupted run
//! resumes at the first non-complete phase and never re-processes an
//! item (dedupe key: phase, model, unit). Per-item failures are counted
//! and reported; a phase fails only when nothing in it succeeded. An
//! executor error marks the run failed and blocks downstream phases.

pub mod eval;
pub mod scheduler;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::BenchmarkConfig;
use crate::error::{QuarryError, QuarryResult};
use crate::llm::{with_backoff, ChatMessage, CompletionOptions, Llm, DEFAULT_MAX_RETRIES};
use eval::{evaluator_registry, EvalContext};
use scheduler::{ModelScheduler, ModelSpec};

const STATE_FILE: &str = "benchmark-state.json";
const REPORT_FILE: &str = "benchmark-report.json";
const MIN_SUMMARY_CHARS: usize = 10;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// The pipeline phases, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseId {
    /// Select and normalise the code units under benchmark.
    Extraction,
    /// Generate one summary per `(model, unit)`.
    Generation,
    /// Refine each summary once; refinements are recorded as additional
    /// variants, never replacements.
    EvalIterative,
    /// Pairwise judging.
    EvalJudge,
    /// Summary-to-code matching among distractors.
    EvalContrastive,
    /// Retrieval quality of the summary as a query.
    EvalRetrieval,
    /// Usefulness for downstream question answering.
    EvalDownstream,
    /// Self-assessment by the generating model.
    EvalSelf,
    /// Fold all scores into per-model aggregates.
    Aggregation,
    /// Emit the final report.
    Reporting,
}

impl PhaseId {
    /// All phases in execution order.
    pub fn all() -> &'static [PhaseId] {
        &[
            Self::Extraction,
            Self::Generation,
            Self::EvalIterative,
            Self::EvalJudge,
            Self::EvalContrastive,
            Self::EvalRetrieval,
            Self::EvalDownstream,
            Self::EvalSelf,
            Self::Aggregation,
            Self::Reporting,
        ]
    }

    /// Stable phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Generation => "generation",
            Self::EvalIterative => "evaluation:iterative",
            Self::EvalJudge => "evaluation:judge",
            Self::EvalContrastive => "evaluation:contrastive",
            Self::EvalRetrieval => "evaluation:retrieval",
            Self::EvalDownstream => "evaluation:downstream",
            Self::EvalSelf => "evaluation:self",
            Self::Aggregation => "aggregation",
            Self::Reporting => "reporting",
        }
    }

    /// Declared dependencies.
    pub fn dependencies(&self) -> &'static [PhaseId] {
        match self {
            Self::Extraction => &[],
            Self::Generation => &[Self::Extraction],
            Self::EvalIterative => &[Self::Generation],
            Self::EvalJudge
            | Self::EvalContrastive
            | Self::EvalRetrieval
            | Self::EvalDownstream
            | Self::EvalSelf => &[Self::EvalIterative],
            Self::Aggregation => &[
                Self::EvalJudge,
                Self::EvalContrastive,
                Self::EvalRetrieval,
                Self::EvalDownstream,
                Self::EvalSelf,
            ],
            Self::Reporting => &[Self::Aggregation],
        }
    }

    /// The evaluation-toggle tag for branch phases.
    pub fn eval_kind(&self) -> Option<&'static str> {
        match self {
            Self::EvalJudge => Some("judge"),
            Self::EvalContrastive => Some("contrastive"),
            Self::EvalRetrieval => Some("retrieval"),
            Self::EvalDownstream => Some("downstream"),
            Self::EvalSelf => Some("self"),
            _ => None,
        }
    }

    fn is_eval_branch(&self) -> bool {
        self.eval_kind().is_some()
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Not yet started.
    #[default]
    Pending,
    /// Currently executing.
    Running,
    /// Paused; no new phases start.
    Paused,
    /// All phases complete.
    Completed,
    /// A phase executor failed.
    Failed,
}

/// Progress of one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseState {
    /// Items in the phase.
    pub total: usize,
    /// Items finished (succeeded or failed).
    pub completed: usize,
    /// Whether the phase is done.
    pub is_complete: bool,
    /// Executor error, when the phase blew up.
    pub error: Option<String>,
}

/// One code unit under benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchUnit {
    /// Stable unit id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Source text.
    pub content: String,
}

/// One generated summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedSummary {
    /// Producing model.
    pub model: String,
    /// Unit summarised.
    pub unit_id: String,
    /// The summary text.
    pub summary: String,
    /// Refined variant from the iterative phase, if produced.
    pub refined: Option<String>,
    /// Tokens spent producing it.
    pub cost_tokens: u64,
}

/// A recorded per-item failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Phase the item belonged to.
    pub phase: String,
    /// Model involved.
    pub model: String,
    /// Item key (unit id).
    pub item: String,
    /// Error text.
    pub error: String,
}

/// Per-model aggregate over all evaluations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelAggregate {
    /// Summaries produced.
    pub summaries: usize,
    /// Item failures across phases.
    pub failures: usize,
    /// Mean score across evaluation kinds in `[0, 1]`.
    pub mean_score: f64,
    /// Per-kind scores.
    pub scores: BTreeMap<String, f64>,
    /// Tokens spent by this model's generation.
    pub cost_tokens: u64,
}

/// The whole persisted run state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchState {
    /// Overall run status.
    pub status: RunStatus,
    /// Per-phase progress, keyed by phase name.
    pub phases: BTreeMap<String, PhaseState>,
    /// Dedupe keys of finished items (`phase|model|unit`).
    pub completed_items: BTreeSet<String>,
    /// Units under benchmark.
    pub units: BTreeMap<String, BenchUnit>,
    /// All generated summaries.
    pub summaries: Vec<GeneratedSummary>,
    /// kind -> model -> score.
    pub eval_scores: BTreeMap<String, BTreeMap<String, f64>>,
    /// Per-item failures.
    pub failures: Vec<ItemFailure>,
    /// Final aggregates.
    pub aggregate: BTreeMap<String, ModelAggregate>,
    /// Total token spend.
    pub cost_tokens: u64,
}

/// Final report handed back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// Terminal status.
    pub status: RunStatus,
    /// Per-phase progress.
    pub phases: BTreeMap<String, PhaseState>,
    /// Per-model aggregates.
    pub aggregate: BTreeMap<String, ModelAggregate>,
    /// Failures grouped by model.
    pub failures_by_model: BTreeMap<String, Vec<ItemFailure>>,
    /// Total token spend.
    pub cost_tokens: u64,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The benchmark pipeline driver.
pub struct BenchmarkPipeline {
    config: BenchmarkConfig,
    models: Vec<ModelSpec>,
    judge: Arc<dyn Llm>,
    state_dir: PathBuf,
    state: Mutex<BenchState>,
    cancel: CancellationToken,
    paused: AtomicBool,
}

impl BenchmarkPipeline {
    /// Create a pipeline, loading prior state from `state_dir` when a
    /// run was interrupted there.
    pub fn new(
        config: BenchmarkConfig,
        models: Vec<ModelSpec>,
        judge: Arc<dyn Llm>,
        state_dir: &Path,
    ) -> QuarryResult<Self> {
        std::fs::create_dir_all(state_dir)?;
        let state_path = state_dir.join(STATE_FILE);
        let state = if state_path.exists() {
            let raw = std::fs::read_to_string(&state_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            BenchState::default()
        };

        Ok(Self {
            config,
            models,
            judge,
            state_dir: state_dir.to_path_buf(),
            state: Mutex::new(state),
            cancel: CancellationToken::new(),
            paused: AtomicBool::new(false),
        })
    }

    /// Cancellation token aborting the run.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Pause: no new phase starts; in-flight items complete.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Snapshot the current state.
    pub fn state(&self) -> BenchState {
        self.state.lock().clone()
    }

    /// The first non-complete phase whose dependencies are all complete.
    /// Disabled evaluation phases are marked complete with `total = 0`
    /// as they are encountered.
    pub fn next_phase(&self) -> Option<PhaseId> {
        let mut state = self.state.lock();
        for phase in PhaseId::all() {
            let complete = state
                .phases
                .get(phase.as_str())
                .map(|p| p.is_complete)
                .unwrap_or(false);
            if complete {
                continue;
            }

            if let Some(kind) = phase.eval_kind() {
                if !self.config.evaluation_enabled(kind) {
                    state.phases.insert(
                        phase.as_str().to_string(),
                        PhaseState { total: 0, completed: 0, is_complete: true, error: None },
                    );
                    continue;
                }
            }

            let deps_done = phase.dependencies().iter().all(|dep| {
                state
                    .phases
                    .get(dep.as_str())
                    .map(|p| p.is_complete)
                    .unwrap_or(false)
            });
            if deps_done {
                return Some(*phase);
            }
            // Phases are declared in dependency order; the first phase
            // with open dependencies means nothing later is runnable
            // except parallel siblings, which share the same dependency.
            return None;
        }
        None
    }

    /// Drive the pipeline to completion (or pause/failure/abort).
    pub async fn run(&self, units: Vec<BenchUnit>) -> QuarryResult<BenchReport> {
        {
            let mut state = self.state.lock();
            if state.status == RunStatus::Failed {
                return Err(QuarryError::Phase {
                    phase: "run".into(),
                    message: "previous run failed; clear state to restart".into(),
                });
            }
            state.status = RunStatus::Running;
        }
        self.save_state()?;

        loop {
            if self.paused.load(Ordering::SeqCst) {
                self.state.lock().status = RunStatus::Paused;
                self.save_state()?;
                break;
            }
            if self.cancel.is_cancelled() {
                self.save_state()?;
                return Err(QuarryError::Aborted);
            }

            let Some(phase) = self.next_phase() else {
                let mut state = self.state.lock();
                let all_done = PhaseId::all().iter().all(|p| {
                    state
                        .phases
                        .get(p.as_str())
                        .map(|s| s.is_complete)
                        .unwrap_or(false)
                });
                if all_done {
                    state.status = RunStatus::Completed;
                }
                drop(state);
                self.save_state()?;
                break;
            };

            // The evaluation branch may run in parallel: gather every
            // enabled, still-open sibling alongside the chosen phase.
            let batch: Vec<PhaseId> = if phase.is_eval_branch() && self.config.parallel_evaluation
            {
                PhaseId::all()
                    .iter()
                    .copied()
                    .filter(|p| p.is_eval_branch())
                    .filter(|p| {
                        let state = self.state.lock();
                        !state
                            .phases
                            .get(p.as_str())
                            .map(|s| s.is_complete)
                            .unwrap_or(false)
                            && p.eval_kind()
                                .is_some_and(|k| self.config.evaluation_enabled(k))
                    })
                    .collect()
            } else {
                vec![phase]
            };

            let results = join_all(batch.iter().map(|p| self.run_phase(*p, &units))).await;
            for (phase, result) in batch.iter().zip(results) {
                match result {
                    Ok(()) => {}
                    Err(QuarryError::Aborted) => {
                        self.save_state()?;
                        return Err(QuarryError::Aborted);
                    }
                    Err(e) => {
                        let mut state = self.state.lock();
                        let entry = state.phases.entry(phase.as_str().to_string()).or_default();
                        entry.error = Some(e.to_string());
                        state.status = RunStatus::Failed;
                        drop(state);
                        self.save_state()?;
                        return Err(QuarryError::Phase {
                            phase: phase.as_str().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            self.save_state()?;
        }

        Ok(self.report())
    }

    /// Build the report from the current state.
    pub fn report(&self) -> BenchReport {
        let state = self.state.lock();
        let mut failures_by_model: BTreeMap<String, Vec<ItemFailure>> = BTreeMap::new();
        for f in &state.failures {
            failures_by_model.entry(f.model.clone()).or_default().push(f.clone());
        }
        BenchReport {
            status: state.status,
            phases: state.phases.clone(),
            aggregate: state.aggregate.clone(),
            failures_by_model,
            cost_tokens: state.cost_tokens,
        }
    }

    async fn run_phase(&self, phase: PhaseId, units: &[BenchUnit]) -> QuarryResult<()> {
        tracing::info!(phase = phase.as_str(), "phase starting");
        match phase {
            PhaseId::Extraction => self.run_extraction(units),
            PhaseId::Generation => self.run_generation().await,
            PhaseId::EvalIterative => self.run_iterative().await,
            p if p.is_eval_branch() => self.run_eval_branch(p).await,
            PhaseId::Aggregation => self.run_aggregation(),
            PhaseId::Reporting => self.run_reporting(),
            _ => Ok(()),
        }
    }

    fn run_extraction(&self, units: &[BenchUnit]) -> QuarryResult<()> {
        let mut state = self.state.lock();
        if state.units.is_empty() {
            state.units = units.iter().map(|u| (u.id.clone(), u.clone())).collect();
        }
        let total = state.units.len();
        state.phases.insert(
            PhaseId::Extraction.as_str().to_string(),
            PhaseState { total, completed: total, is_complete: true, error: None },
        );
        Ok(())
    }

    async fn run_generation(&self) -> QuarryResult<()> {
        let units: Vec<BenchUnit> = self.state.lock().units.values().cloned().collect();
        let total = units.len() * self.models.len();
        {
            let mut state = self.state.lock();
            let entry = state
                .phases
                .entry(PhaseId::Generation.as_str().to_string())
                .or_default();
            entry.total = total;
        }

        let scheduler = ModelScheduler {
            large_model_threshold: self.config.large_model_threshold,
            local_model_parallelism: self.config.local_model_parallelism,
        };

        scheduler
            .run_models(&self.models, |model| {
                let units = units.clone();
                async move {
                    for unit in &units {
                        if self.cancel.is_cancelled() {
                            return;
                        }
                        let key = item_key(PhaseId::Generation, &model.name, &unit.id);
                        if self.state.lock().completed_items.contains(&key) {
                            continue;
                        }
                        self.generate_one(model, unit).await;
                        let mut state = self.state.lock();
                        state.completed_items.insert(key);
                        if let Some(p) =
                            state.phases.get_mut(PhaseId::Generation.as_str())
                        {
                            p.completed += 1;
                        }
                        drop(state);
                        if let Err(e) = self.save_state() {
                            tracing::warn!(error = %e, "state persist failed");
                        }
                    }
                }
            })
            .await;

        if self.cancel.is_cancelled() {
            return Err(QuarryError::Aborted);
        }

        let mut state = self.state.lock();
        let succeeded = state.summaries.len();
        if total > 0 && succeeded == 0 {
            return Err(QuarryError::Phase {
                phase: PhaseId::Generation.as_str().to_string(),
                message: "no summary succeeded".into(),
            });
        }
        let entry = state
            .phases
            .entry(PhaseId::Generation.as_str().to_string())
            .or_default();
        entry.is_complete = true;
        Ok(())
    }

    async fn generate_one(&self, model: &ModelSpec, unit: &BenchUnit) {
        let excerpt: String = unit.content.chars().take(2000).collect();
        let prompt = format!(
            "Summarise in two or three sentences what `{}` does.\n```\n{excerpt}\n```",
            unit.name
        );
        let llm = Arc::clone(&model.llm);
        let outcome = with_backoff(DEFAULT_MAX_RETRIES, || {
            llm.complete(&[ChatMessage::user(prompt.clone())], &CompletionOptions::default())
        })
        .await;

        let mut state = self.state.lock();
        match outcome {
            Ok(completion) if completion.content.trim().len() >= MIN_SUMMARY_CHARS => {
                let cost = completion
                    .usage
                    .map(|u| u.input_tokens + u.output_tokens)
                    .unwrap_or(0);
                state.cost_tokens += cost;
                state.summaries.push(GeneratedSummary {
                    model: model.name.clone(),
                    unit_id: unit.id.clone(),
                    summary: completion.content.trim().to_string(),
                    refined: None,
                    cost_tokens: cost,
                });
            }
            Ok(completion) => {
                state.failures.push(ItemFailure {
                    phase: PhaseId::Generation.as_str().to_string(),
                    model: model.name.clone(),
                    item: unit.id.clone(),
                    error: format!(
                        "summary too short ({} chars)",
                        completion.content.trim().len()
                    ),
                });
            }
            Err(e) => {
                state.failures.push(ItemFailure {
                    phase: PhaseId::Generation.as_str().to_string(),
                    model: model.name.clone(),
                    item: unit.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn run_iterative(&self) -> QuarryResult<()> {
        let summaries: Vec<GeneratedSummary> = self.state.lock().summaries.clone();
        {
            let mut state = self.state.lock();
            let entry = state
                .phases
                .entry(PhaseId::EvalIterative.as_str().to_string())
                .or_default();
            entry.total = summaries.len();
        }

        for summary in &summaries {
            if self.cancel.is_cancelled() {
                return Err(QuarryError::Aborted);
            }
            let key = item_key(PhaseId::EvalIterative, &summary.model, &summary.unit_id);
            if self.state.lock().completed_items.contains(&key) {
                continue;
            }

            let Some(model) = self.models.iter().find(|m| m.name == summary.model) else {
                continue;
            };
            let prompt = format!(
                "Improve this code summary: make it more precise without adding \
                 speculation.\n\nSummary: {}",
                summary.summary
            );
            let llm = Arc::clone(&model.llm);
            let outcome = with_backoff(DEFAULT_MAX_RETRIES, || {
                llm.complete(&[ChatMessage::user(prompt.clone())], &CompletionOptions::default())
            })
            .await;

            let mut state = self.state.lock();
            match outcome {
                Ok(completion) if completion.content.trim().len() >= MIN_SUMMARY_CHARS => {
                    let cost = completion
                        .usage
                        .map(|u| u.input_tokens + u.output_tokens)
                        .unwrap_or(0);
                    state.cost_tokens += cost;
                    // Refinements are additional variants tied to the
                    // same unit; the original stays.
                    if let Some(entry) = state
                        .summaries
                        .iter_mut()
                        .find(|s| s.model == summary.model && s.unit_id == summary.unit_id)
                    {
                        entry.refined = Some(completion.content.trim().to_string());
                    }
                }
                Ok(_) | Err(_) => {
                    let error = match outcome {
                        Err(e) => e.to_string(),
                        _ => "refinement too short".into(),
                    };
                    state.failures.push(ItemFailure {
                        phase: PhaseId::EvalIterative.as_str().to_string(),
                        model: summary.model.clone(),
                        item: summary.unit_id.clone(),
                        error,
                    });
                }
            }
            state.completed_items.insert(key);
            if let Some(p) = state.phases.get_mut(PhaseId::EvalIterative.as_str()) {
                p.completed += 1;
            }
            drop(state);
            self.save_state()?;
        }

        let mut state = self.state.lock();
        if let Some(p) = state.phases.get_mut(PhaseId::EvalIterative.as_str()) {
            p.is_complete = true;
        }
        Ok(())
    }

    async fn run_eval_branch(&self, phase: PhaseId) -> QuarryResult<()> {
        let kind = phase
            .eval_kind()
            .ok_or_else(|| QuarryError::Internal("not an eval phase".into()))?;
        let registry = evaluator_registry();
        let evaluator = registry
            .get(kind)
            .ok_or_else(|| QuarryError::Internal(format!("no evaluator for {kind}")))?;

        let (units, summaries) = {
            let state = self.state.lock();
            (state.units.clone(), state.summaries.clone())
        };
        let ctx = EvalContext {
            units: &units,
            summaries: &summaries,
            models: &self.models,
            judge: Arc::clone(&self.judge),
            config: &self.config,
            cancel: self.cancel.clone(),
        };

        let outcome = evaluator.evaluate(&ctx).await?;

        let mut state = self.state.lock();
        state.cost_tokens += outcome.cost_tokens;
        state.eval_scores.insert(kind.to_string(), outcome.scores);
        state.phases.insert(
            phase.as_str().to_string(),
            PhaseState {
                total: outcome.items_total,
                completed: outcome.items_total.saturating_sub(outcome.items_failed),
                is_complete: true,
                error: None,
            },
        );
        Ok(())
    }

    fn run_aggregation(&self) -> QuarryResult<()> {
        let mut state = self.state.lock();

        let mut aggregate: BTreeMap<String, ModelAggregate> = BTreeMap::new();
        for model in &self.models {
            let summaries = state
                .summaries
                .iter()
                .filter(|s| s.model == model.name)
                .collect::<Vec<_>>();
            let failures = state
                .failures
                .iter()
                .filter(|f| f.model == model.name)
                .count();
            let cost_tokens = summaries.iter().map(|s| s.cost_tokens).sum();

            let mut scores = BTreeMap::new();
            for (kind, per_model) in &state.eval_scores {
                if let Some(score) = per_model.get(&model.name) {
                    scores.insert(kind.clone(), *score);
                }
            }
            let mean_score = if scores.is_empty() {
                0.0
            } else {
                scores.values().sum::<f64>() / scores.len() as f64
            };

            aggregate.insert(
                model.name.clone(),
                ModelAggregate {
                    summaries: summaries.len(),
                    failures,
                    mean_score,
                    scores,
                    cost_tokens,
                },
            );
        }

        let total = self.models.len();
        state.aggregate = aggregate;
        state.phases.insert(
            PhaseId::Aggregation.as_str().to_string(),
            PhaseState { total, completed: total, is_complete: true, error: None },
        );
        Ok(())
    }

    fn run_reporting(&self) -> QuarryResult<()> {
        let report = self.report();
        let path = self.state_dir.join(REPORT_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;

        for (model, agg) in &report.aggregate {
            tracing::info!(
                model,
                summaries = agg.summaries,
                failures = agg.failures,
                mean_score = agg.mean_score,
                "benchmark result"
            );
        }

        let mut state = self.state.lock();
        state.phases.insert(
            PhaseId::Reporting.as_str().to_string(),
            PhaseState { total: 1, completed: 1, is_complete: true, error: None },
        );
        Ok(())
    }

    fn save_state(&self) -> QuarryResult<()> {
        let snapshot = self.state.lock().clone();
        let path = self.state_dir.join(STATE_FILE);
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(())
    }
}

fn item_key(phase: PhaseId, model: &str, unit: &str) -> String {
    format!("{}|{model}|{unit}", phase.as_str())
}
