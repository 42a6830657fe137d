//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`QUARRY_*`)
//! 2. Project config (`<repo>/.quarry/config.toml`)
//! 3. User config (`~/.config/quarry/config.toml`)
//! 4. Compiled-in defaults

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, QuarryResult};
use crate::types::{DocumentType, UseCase};

/// Top-level configuration for a quarry project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Project root path to index.
    pub repo_path: PathBuf,

    /// Embedding model identifier. A change of model invalidates the
    /// vector index and forces a re-embed.
    #[serde(default = "Config::default_model")]
    pub model: String,

    /// Indexing configuration.
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Enrichment configuration.
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Search configuration.
    #[serde(default)]
    pub search: SearchConfig,

    /// Watcher configuration.
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Benchmark pipeline configuration.
    #[serde(default)]
    pub benchmark: BenchmarkConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Indexing-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Glob patterns excluded from ingestion.
    #[serde(default = "IndexingConfig::default_excludes")]
    pub exclude_patterns: Vec<String>,

    /// Extra file extensions to treat as indexable, beyond the built-in
    /// language table.
    #[serde(default)]
    pub include_extensions: Vec<String>,

    /// Maximum file size to index (bytes). Larger files are skipped.
    #[serde(default = "IndexingConfig::default_max_file_size")]
    pub max_file_size: u64,

    /// PageRank damping factor.
    #[serde(default = "IndexingConfig::default_pagerank_damping")]
    pub pagerank_damping: f64,

    /// PageRank iteration count.
    #[serde(default = "IndexingConfig::default_pagerank_iterations")]
    pub pagerank_iterations: u32,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            exclude_patterns: Self::default_excludes(),
            include_extensions: Vec::new(),
            max_file_size: Self::default_max_file_size(),
            pagerank_damping: Self::default_pagerank_damping(),
            pagerank_iterations: Self::default_pagerank_iterations(),
        }
    }
}

impl IndexingConfig {
    fn default_excludes() -> Vec<String> {
        vec![
            "node_modules".into(),
            ".git".into(),
            "dist".into(),
            "build".into(),
            "__pycache__".into(),
            ".next".into(),
            ".nuxt".into(),
            "coverage".into(),
            ".cache".into(),
        ]
    }

    fn default_max_file_size() -> u64 {
        5 * 1024 * 1024 // 5MB
    }

    fn default_pagerank_damping() -> f64 { 0.85 }

    fn default_pagerank_iterations() -> u32 { 20 }
}

/// Enrichment orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Whether to run enrichment at all.
    #[serde(default = "EnrichmentConfig::default_enabled")]
    pub enabled: bool,

    /// Subset of document types to extract. Empty means the full
    /// internally sourced set.
    #[serde(default)]
    pub types: Vec<DocumentType>,

    /// Minimum number of ready items before the batched extraction path
    /// is chosen over per-item calls.
    #[serde(default = "EnrichmentConfig::default_batch_threshold")]
    pub batch_threshold: usize,

    /// Maximum items packed into one batched LLM call.
    #[serde(default = "EnrichmentConfig::default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            types: Vec::new(),
            batch_threshold: Self::default_batch_threshold(),
            max_batch_size: Self::default_max_batch_size(),
        }
    }
}

impl EnrichmentConfig {
    fn default_enabled() -> bool { true }
    fn default_batch_threshold() -> usize { 2 }
    fn default_max_batch_size() -> usize { 8 }

    /// The document types enrichment should produce.
    pub fn target_types(&self) -> Vec<DocumentType> {
        if self.types.is_empty() {
            vec![
                DocumentType::CodeChunk,
                DocumentType::FileSummary,
                DocumentType::SymbolSummary,
                DocumentType::Idiom,
                DocumentType::UsageExample,
                DocumentType::AntiPattern,
                DocumentType::ProjectDoc,
            ]
        } else {
            self.types.clone()
        }
    }
}

/// Search-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Final number of results returned after fusion and reranking.
    #[serde(default = "SearchConfig::default_final_limit")]
    pub final_limit: usize,

    /// Per-channel candidate list size when reranking is enabled.
    #[serde(default = "SearchConfig::default_initial_limit")]
    pub initial_limit: usize,

    /// RRF constant (k parameter).
    #[serde(default = "SearchConfig::default_rrf_k")]
    pub rrf_k: u32,

    /// Token budget for context formatting.
    #[serde(default = "SearchConfig::default_max_tokens")]
    pub max_tokens: u32,

    /// Whether to ask an LLM to rerank fused candidates.
    #[serde(default)]
    pub rerank: bool,

    /// Candidates scoring below this 0-10 rerank score are dropped.
    #[serde(default = "SearchConfig::default_min_rerank_score")]
    pub min_rerank_score: f64,

    /// Minimum confidence an LLM intent classification must reach to
    /// override the rule-based router.
    #[serde(default = "SearchConfig::default_min_confidence")]
    pub min_confidence: f64,

    /// Static per-use-case document type weights, overriding the built-in
    /// defaults where present.
    #[serde(default)]
    pub weights: BTreeMap<String, BTreeMap<DocumentType, f64>>,

    /// Feedback sample count required before learned weights activate.
    #[serde(default = "SearchConfig::default_min_samples")]
    pub min_samples: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            final_limit: Self::default_final_limit(),
            initial_limit: Self::default_initial_limit(),
            rrf_k: Self::default_rrf_k(),
            max_tokens: Self::default_max_tokens(),
            rerank: false,
            min_rerank_score: Self::default_min_rerank_score(),
            min_confidence: Self::default_min_confidence(),
            weights: BTreeMap::new(),
            min_samples: Self::default_min_samples(),
        }
    }
}

impl SearchConfig {
    fn default_final_limit() -> usize { 10 }
    fn default_initial_limit() -> usize { 30 }
    fn default_rrf_k() -> u32 { 60 }
    fn default_max_tokens() -> u32 { 8000 }
    fn default_min_rerank_score() -> f64 { 3.0 }
    fn default_min_confidence() -> f64 { 0.6 }
    fn default_min_samples() -> u64 { 5 }

    /// Static type-weight overrides for a use case, if configured.
    pub fn static_weights(&self, use_case: UseCase) -> Option<&BTreeMap<DocumentType, f64>> {
        self.weights.get(use_case.as_str())
    }
}

/// File watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Per-path debounce for code-file events (milliseconds).
    #[serde(default = "WatcherConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    /// Debounce for dependency-manifest events (milliseconds).
    #[serde(default = "WatcherConfig::default_dep_debounce_ms")]
    pub dep_debounce_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            dep_debounce_ms: Self::default_dep_debounce_ms(),
        }
    }
}

impl WatcherConfig {
    fn default_debounce_ms() -> u64 { 1000 }
    fn default_dep_debounce_ms() -> u64 { 5000 }
}

/// Benchmark pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Parameter-count threshold (billions) above which local models run
    /// strictly sequentially. Zero disables the isolation.
    #[serde(default = "BenchmarkConfig::default_large_model_threshold")]
    pub large_model_threshold: f64,

    /// Max concurrent small local models.
    #[serde(default = "BenchmarkConfig::default_local_model_parallelism")]
    pub local_model_parallelism: usize,

    /// Whether the evaluation branch phases may run in parallel.
    #[serde(default = "BenchmarkConfig::default_parallel_evaluation")]
    pub parallel_evaluation: bool,

    /// Comparisons packed into one pairwise-judging LLM call.
    #[serde(default = "BenchmarkConfig::default_judge_batch_size")]
    pub judge_batch_size: usize,

    /// Per-batch timeout (milliseconds).
    #[serde(default = "BenchmarkConfig::default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Per-batch timeout for interactive-subprocess models (milliseconds).
    #[serde(default = "BenchmarkConfig::default_interactive_batch_timeout_ms")]
    pub interactive_batch_timeout_ms: u64,

    /// Maximum judge batches in flight at once.
    #[serde(default = "BenchmarkConfig::default_max_inflight_batches")]
    pub max_inflight_batches: usize,

    /// Per-kind evaluation toggles, keyed by evaluation name
    /// (`judge`, `contrastive`, `retrieval`, `downstream`, `self`).
    #[serde(default)]
    pub evaluation: BTreeMap<String, EvaluationToggle>,
}

/// On/off switch for one evaluation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationToggle {
    /// Whether this evaluation phase runs.
    pub enabled: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            large_model_threshold: Self::default_large_model_threshold(),
            local_model_parallelism: Self::default_local_model_parallelism(),
            parallel_evaluation: Self::default_parallel_evaluation(),
            judge_batch_size: Self::default_judge_batch_size(),
            batch_timeout_ms: Self::default_batch_timeout_ms(),
            interactive_batch_timeout_ms: Self::default_interactive_batch_timeout_ms(),
            max_inflight_batches: Self::default_max_inflight_batches(),
            evaluation: BTreeMap::new(),
        }
    }
}

impl BenchmarkConfig {
    fn default_large_model_threshold() -> f64 { 20.0 }
    fn default_local_model_parallelism() -> usize { 1 }
    fn default_parallel_evaluation() -> bool { true }
    fn default_judge_batch_size() -> usize { 10 }
    fn default_batch_timeout_ms() -> u64 { 120_000 }
    fn default_interactive_batch_timeout_ms() -> u64 { 300_000 }
    fn default_max_inflight_batches() -> usize { 50 }

    /// Whether the named evaluation kind is enabled (default: yes).
    pub fn evaluation_enabled(&self, kind: &str) -> bool {
        self.evaluation.get(kind).map_or(true, |t| t.enabled)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to output logs as JSON.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

impl Config {
    fn default_model() -> String {
        "code-embed-v2".into()
    }

    /// Load configuration for a project, overlaying user config, project
    /// config, and environment variables on the defaults.
    pub fn load(repo_path: &Path) -> QuarryResult<Self> {
        let mut config = Self::defaults(repo_path);

        if let Some(user_config_dir) = dirs::config_dir() {
            let user_config_path = user_config_dir.join("quarry").join("config.toml");
            if user_config_path.exists() {
                config.merge_from_file(&user_config_path)?;
            }
        }

        let project_config_path = repo_path.join(".quarry").join("config.toml");
        if project_config_path.exists() {
            config.merge_from_file(&project_config_path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Create a default configuration for the given repo path.
    pub fn defaults(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            model: Self::default_model(),
            indexing: IndexingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            search: SearchConfig::default(),
            watcher: WatcherConfig::default(),
            benchmark: BenchmarkConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// The per-project index directory (`<repo>/.quarry`).
    pub fn data_dir(&self) -> PathBuf {
        self.repo_path.join(".quarry")
    }

    /// Merge values from a TOML config file (non-destructive overlay).
    fn merge_from_file(&mut self, path: &Path) -> QuarryResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| QuarryError::Config {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        if let Some(model) = overlay.get("model").and_then(|v| v.as_str()) {
            self.model = model.to_string();
        }
        if let Some(section) = overlay.get("indexing") {
            if let Ok(parsed) = section.clone().try_into::<IndexingConfig>() {
                self.indexing = parsed;
            }
        }
        if let Some(section) = overlay.get("enrichment") {
            if let Ok(parsed) = section.clone().try_into::<EnrichmentConfig>() {
                self.enrichment = parsed;
            }
        }
        if let Some(section) = overlay.get("search") {
            if let Ok(parsed) = section.clone().try_into::<SearchConfig>() {
                self.search = parsed;
            }
        }
        if let Some(section) = overlay.get("watcher") {
            if let Ok(parsed) = section.clone().try_into::<WatcherConfig>() {
                self.watcher = parsed;
            }
        }
        if let Some(section) = overlay.get("benchmark") {
            if let Ok(parsed) = section.clone().try_into::<BenchmarkConfig>() {
                self.benchmark = parsed;
            }
        }
        if let Some(section) = overlay.get("logging") {
            if let Ok(parsed) = section.clone().try_into::<LoggingConfig>() {
                self.logging = parsed;
            }
        }

        Ok(())
    }

    /// Apply environment variable overrides (QUARRY_* prefix).
    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("QUARRY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(model) = std::env::var("QUARRY_MODEL") {
            self.model = model;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.indexing.max_file_size, 5 * 1024 * 1024);
        assert_eq!(config.search.final_limit, 10);
        assert_eq!(config.search.rrf_k, 60);
        assert_eq!(config.watcher.debounce_ms, 1000);
        assert_eq!(config.watcher.dep_debounce_ms, 5000);
        assert!((config.indexing.pagerank_damping - 0.85).abs() < 1e-12);
        assert_eq!(config.benchmark.judge_batch_size, 10);
    }

    #[test]
    fn data_dir_is_inside_repo() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.data_dir(), PathBuf::from("/tmp/test-repo/.quarry"));
    }

    #[test]
    fn project_config_overlay() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let quarry_dir = dir.path().join(".quarry");
        std::fs::create_dir_all(&quarry_dir).expect("mkdir");
        std::fs::write(
            quarry_dir.join("config.toml"),
            "model = \"alt-model\"\n[search]\nfinal_limit = 5\n",
        )
        .expect("write config");

        let config = Config::load(dir.path()).expect("load");
        assert_eq!(config.model, "alt-model");
        assert_eq!(config.search.final_limit, 5);
        // Untouched sections keep defaults
        assert_eq!(config.watcher.debounce_ms, 1000);
    }

    #[test]
    fn evaluation_toggles_default_on() {
        let config = BenchmarkConfig::default();
        assert!(config.evaluation_enabled("judge"));

        let mut config = BenchmarkConfig::default();
        config
            .evaluation
            .insert("judge".into(), EvaluationToggle { enabled: false });
        assert!(!config.evaluation_enabled("judge"));
        assert!(config.evaluation_enabled("retrieval"));
    }
}
