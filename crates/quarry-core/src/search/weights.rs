//! Learned ranking weights per use case.
//!
//! Feedback moves per-file boosts multiplicatively within hard bounds
//! and raises a logistic confidence with the sample count. Active
//! weights blend learned values with static defaults by that
//! confidence; below the sample floor the defaults win outright.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::QuarryResult;
use crate::store::Store;
use crate::types::{now_ms, DocumentType, LearnedWeights, UseCase};

/// Positive feedback multiplier per event.
const BOOST_STEP_UP: f64 = 1.1;
/// Negative feedback multiplier per event.
const BOOST_STEP_DOWN: f64 = 0.9;
/// Upper bound on a learned file boost.
const BOOST_CAP: f64 = 2.0;
/// Lower bound on a learned file boost.
const BOOST_FLOOR: f64 = 0.5;

/// Persistent store of per-use-case learned weights.
pub struct LearnedWeightsStore {
    store: Arc<Store>,
    min_samples: u64,
}

impl LearnedWeightsStore {
    /// Create the store; learned weights activate at `min_samples`
    /// feedback events.
    pub fn new(store: Arc<Store>, min_samples: u64) -> Self {
        Self { store, min_samples }
    }

    /// Load the raw learned record for a use case (defaults when none).
    pub fn get(&self, use_case: UseCase) -> QuarryResult<LearnedWeights> {
        let conn = self.store.connection();
        let mut stmt =
            conn.prepare("SELECT data FROM learned_weights WHERE use_case = ?1")?;
        let mut rows = stmt.query([use_case.as_str()])?;
        match rows.next()? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(serde_json::from_str(&raw).unwrap_or_else(|_| LearnedWeights::defaults()))
            }
            None => Ok(LearnedWeights::defaults()),
        }
    }

    fn put(&self, use_case: UseCase, weights: &LearnedWeights) -> QuarryResult<()> {
        self.store.connection().execute(
            "INSERT INTO learned_weights (use_case, data, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(use_case) DO UPDATE SET data = excluded.data,
                 updated_at = excluded.updated_at",
            rusqlite::params![use_case.as_str(), serde_json::to_string(weights)?, now_ms()],
        )?;
        Ok(())
    }

    /// Active weights: the learned record blended with the static
    /// defaults by confidence once enough feedback has accumulated,
    /// otherwise the defaults (with any configured static overrides).
    pub fn get_active_weights(
        &self,
        use_case: UseCase,
        static_overrides: Option<&BTreeMap<DocumentType, f64>>,
    ) -> QuarryResult<LearnedWeights> {
        let mut defaults = LearnedWeights::defaults();
        if let Some(overrides) = static_overrides {
            for (ty, w) in overrides {
                defaults.document_type_weights.insert(*ty, *w);
            }
        }

        let learned = self.get(use_case)?;
        if learned.feedback_count < self.min_samples {
            return Ok(defaults);
        }

        let c = learned.confidence.clamp(0.0, 1.0);
        let mut blended = defaults.clone();
        blended.vector_weight = c * learned.vector_weight + (1.0 - c) * defaults.vector_weight;
        blended.bm25_weight = 1.0 - blended.vector_weight;

        for (ty, default_w) in &defaults.document_type_weights {
            let learned_w = learned
                .document_type_weights
                .get(ty)
                .copied()
                .unwrap_or(*default_w);
            blended
                .document_type_weights
                .insert(*ty, c * learned_w + (1.0 - c) * default_w);
        }

        // File boosts blend toward the neutral 1.0.
        for (path, boost) in &learned.file_boosts {
            blended
                .file_boosts
                .insert(path.clone(), c * boost + (1.0 - c));
        }

        blended.query_patterns = learned.query_patterns.clone();
        blended.feedback_count = learned.feedback_count;
        blended.confidence = c;
        blended.last_updated = learned.last_updated;
        Ok(blended)
    }

    /// Record one feedback event: selected documents push their files
    /// up, negatives push theirs down, both within hard bounds.
    pub fn record_feedback(
        &self,
        use_case: UseCase,
        query: &str,
        selected_paths: &[PathBuf],
        negative_paths: &[PathBuf],
    ) -> QuarryResult<()> {
        let mut weights = self.get(use_case)?;

        for path in selected_paths {
            let boost = weights.file_boosts.entry(normalise(path)).or_insert(1.0);
            *boost = (*boost * BOOST_STEP_UP).min(BOOST_CAP);
        }
        for path in negative_paths {
            let boost = weights.file_boosts.entry(normalise(path)).or_insert(1.0);
            *boost = (*boost * BOOST_STEP_DOWN).max(BOOST_FLOOR);
        }

        // Remember which query shapes produce accepted results.
        if !selected_paths.is_empty() {
            let pattern = query_pattern(query);
            if !pattern.is_empty() {
                let adj = weights.query_patterns.entry(pattern).or_insert(0.0);
                *adj += 0.05;
            }
        }

        weights.feedback_count += 1;
        weights.confidence = logistic_confidence(weights.feedback_count);
        weights.last_updated = now_ms();
        self.put(use_case, &weights)
    }

    /// Sample floor below which defaults are served unblended.
    pub fn min_samples(&self) -> u64 {
        self.min_samples
    }
}

fn normalise(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().replace('\\', "/"))
}

/// Logistic in the sample count, centred at 10 events.
fn logistic_confidence(n: u64) -> f64 {
    1.0 / (1.0 + (-((n as f64 - 10.0) / 5.0)).exp())
}

/// First tokens of the query, lowered; a coarse shape key.
fn query_pattern(query: &str) -> String {
    query
        .split_whitespace()
        .take(3)
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> LearnedWeightsStore {
        LearnedWeightsStore::new(Arc::new(Store::open_in_memory().expect("open")), 5)
    }

    #[test]
    fn defaults_served_below_sample_floor() {
        let s = store();
        s.record_feedback(
            UseCase::Search,
            "auth flow",
            &[PathBuf::from("src/auth.rs")],
            &[],
        )
        .expect("feedback");

        let active = s.get_active_weights(UseCase::Search, None).expect("active");
        // One sample is under the floor of five: defaults, no boosts.
        assert!((active.vector_weight - 0.6).abs() < 1e-12);
        assert!(active.file_boosts.is_empty());
    }

    #[test]
    fn boosts_apply_after_enough_samples() {
        let s = store();
        for _ in 0..8 {
            s.record_feedback(
                UseCase::Search,
                "auth flow",
                &[PathBuf::from("src/auth.rs")],
                &[PathBuf::from("src/noise.rs")],
            )
            .expect("feedback");
        }

        let active = s.get_active_weights(UseCase::Search, None).expect("active");
        let up = active.file_boosts.get(Path::new("src/auth.rs")).copied().expect("up");
        let down = active.file_boosts.get(Path::new("src/noise.rs")).copied().expect("down");
        assert!(up > 1.0);
        assert!(down < 1.0);
        assert!(active.confidence > 0.0 && active.confidence < 1.0);
    }

    #[test]
    fn boosts_are_bounded() {
        let s = store();
        for _ in 0..100 {
            s.record_feedback(
                UseCase::Fim,
                "q",
                &[PathBuf::from("hot.rs")],
                &[PathBuf::from("cold.rs")],
            )
            .expect("feedback");
        }
        let raw = s.get(UseCase::Fim).expect("raw");
        assert!(*raw.file_boosts.get(Path::new("hot.rs")).expect("hot") <= BOOST_CAP);
        assert!(*raw.file_boosts.get(Path::new("cold.rs")).expect("cold") >= BOOST_FLOOR);
    }

    #[test]
    fn confidence_is_monotonic_logistic() {
        assert!(logistic_confidence(1) < logistic_confidence(5));
        assert!(logistic_confidence(5) < logistic_confidence(20));
        assert!(logistic_confidence(200) <= 1.0);
        assert!((logistic_confidence(10) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn static_overrides_flow_into_defaults() {
        let s = store();
        let mut overrides = BTreeMap::new();
        overrides.insert(DocumentType::FileSummary, 0.5);

        let active = s
            .get_active_weights(UseCase::Navigation, Some(&overrides))
            .expect("active");
        assert_eq!(
            active.document_type_weights.get(&DocumentType::FileSummary),
            Some(&0.5)
        );
        // Untouched types keep built-in defaults.
        assert_eq!(
            active.document_type_weights.get(&DocumentType::CodeChunk),
            Some(&0.25)
        );
    }

    #[test]
    fn use_cases_are_isolated() {
        let s = store();
        for _ in 0..8 {
            s.record_feedback(UseCase::Fim, "q", &[PathBuf::from("a.rs")], &[])
                .expect("feedback");
        }
        let fim = s.get(UseCase::Fim).expect("fim");
        let nav = s.get(UseCase::Navigation).expect("nav");
        assert_eq!(fim.feedback_count, 8);
        assert_eq!(nav.feedback_count, 0);
    }

    #[test]
    fn query_patterns_accumulate() {
        let s = store();
        for _ in 0..3 {
            s.record_feedback(
                UseCase::Search,
                "how does auth work",
                &[PathBuf::from("a.rs")],
                &[],
            )
            .expect("feedback");
        }
        let raw = s.get(UseCase::Search).expect("raw");
        let adj = raw.query_patterns.get("how does auth").copied().expect("pattern");
        assert!((adj - 0.15).abs() < 1e-9);
    }
}
