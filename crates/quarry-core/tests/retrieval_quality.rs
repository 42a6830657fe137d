//! End-to-end retrieval quality over a small fixture project.
//!
//! Indexes a synthetic multi-language tree, runs a set of golden queries
//! through the full engine (router, hybrid channels, fusion), and checks
//! MRR and Recall@K floors. The deterministic hash embedder stands in
//! for a real model, so vector scores are crude; the floors are set for
//! the keyword-dominant regime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use quarry_core::llm::HashEmbedder;
use quarry_core::types::UseCase;
use quarry_core::{Config, Engine};

struct GoldenQuery {
    query: &'static str,
    /// Files considered relevant, best first.
    expected_files: &'static [&'static str],
}

const GOLDEN_QUERIES: &[GoldenQuery] = &[
    GoldenQuery {
        query: "validateSession",
        expected_files: &["src/auth.ts"],
    },
    GoldenQuery {
        query: "parse configuration file",
        expected_files: &["src/config.py"],
    },
    GoldenQuery {
        query: "retry_with_backoff",
        expected_files: &["src/net.rs"],
    },
    GoldenQuery {
        query: "function renderInvoice",
        expected_files: &["src/billing.ts"],
    },
    GoldenQuery {
        query: "open database connection pool",
        expected_files: &["src/db.go"],
    },
];

fn write_fixture(root: &Path) {
    let files: &[(&str, &str)] = &[
        (
            "src/auth.ts",
            "export function validateSession(token: string): boolean {\n    return token.length > 16;\n}\n\nexport function revokeSession(token: string): void {\n}\n",
        ),
        (
            "src/billing.ts",
            "export function renderInvoice(order: Order): string {\n    return `invoice for ${order.id}`;\n}\n",
        ),
        (
            "src/config.py",
            "def parse_config(path):\n    \"\"\"Parse the configuration file into a dict.\"\"\"\n    with open(path) as f:\n        return load(f)\n",
        ),
        (
            "src/net.rs",
            "pub fn retry_with_backoff(attempts: u32) -> bool {\n    attempts < 3\n}\n",
        ),
        (
            "src/db.go",
            "package db\n\n// OpenPool opens the database connection pool.\nfunc OpenPool(url string) *Pool {\n    return &Pool{url: url}\n}\n",
        ),
    ];
    for (name, content) in files {
        let path = root.join(name);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write fixture");
    }
}

fn reciprocal_rank(results: &[String], expected: &[&str]) -> f64 {
    for (i, file) in results.iter().enumerate() {
        if expected.iter().any(|e| e == file) {
            return 1.0 / (i as f64 + 1.0);
        }
    }
    0.0
}

fn recall_at(results: &[String], expected: &[&str], k: usize) -> f64 {
    if expected.is_empty() {
        return 0.0;
    }
    let found = expected
        .iter()
        .filter(|e| results.iter().take(k).any(|r| r == *e))
        .count();
    found as f64 / expected.len() as f64
}

#[tokio::test]
async fn golden_queries_meet_quality_floors() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path());

    let config = Config::defaults(dir.path());
    let engine = Engine::new(config, Some(Arc::new(HashEmbedder::new(128))), None)
        .expect("engine");
    let report = engine
        .run_index(&CancellationToken::new())
        .await
        .expect("index");
    assert_eq!(report.files_indexed, 5);
    assert_eq!(report.files_failed, 0);

    let mut total_rr = 0.0;
    let mut total_recall = 0.0;
    let mut per_query: HashMap<&str, f64> = HashMap::new();

    for golden in GOLDEN_QUERIES {
        let response = engine.search(golden.query, UseCase::Search, None);
        let files: Vec<String> = response
            .hits
            .iter()
            .map(|h| h.document.file_path.to_string_lossy().replace('\\', "/"))
            .collect();

        let rr = reciprocal_rank(&files, golden.expected_files);
        let recall = recall_at(&files, golden.expected_files, 10);
        per_query.insert(golden.query, rr);
        total_rr += rr;
        total_recall += recall;
    }

    let n = GOLDEN_QUERIES.len() as f64;
    let mrr = total_rr / n;
    let recall = total_recall / n;

    assert!(mrr >= 0.6, "MRR too low: {mrr:.3} ({per_query:?})");
    assert!(recall >= 0.8, "Recall@10 too low: {recall:.3}");
}

#[tokio::test]
async fn reindex_keeps_quality_stable() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_fixture(dir.path());

    let config = Config::defaults(dir.path());
    let engine = Engine::new(config, Some(Arc::new(HashEmbedder::new(128))), None)
        .expect("engine");
    engine
        .run_index(&CancellationToken::new())
        .await
        .expect("first index");

    let before = engine.search("validateSession", UseCase::Search, None);
    assert!(!before.hits.is_empty());

    // A second pass over an unchanged tree must not disturb results.
    let report = engine
        .run_index(&CancellationToken::new())
        .await
        .expect("second index");
    assert_eq!(report.files_indexed, 0);
    assert_eq!(report.files_unchanged, 5);

    let after = engine.search("validateSession", UseCase::Search, None);
    assert_eq!(
        before.hits.first().map(|h| h.document.id.clone()),
        after.hits.first().map(|h| h.document.id.clone()),
    );
}

mod metrics {
    use super::*;

    #[test]
    fn reciprocal_rank_positions() {
        let results = vec!["a.rs".to_string(), "b.rs".to_string()];
        assert!((reciprocal_rank(&results, &["a.rs"]) - 1.0).abs() < 1e-9);
        assert!((reciprocal_rank(&results, &["b.rs"]) - 0.5).abs() < 1e-9);
        assert_eq!(reciprocal_rank(&results, &["c.rs"]), 0.0);
    }

    #[test]
    fn recall_counts_found_fraction() {
        let results = vec!["a.rs".to_string(), "x.rs".to_string()];
        assert!((recall_at(&results, &["a.rs", "b.rs"], 10) - 0.5).abs() < 1e-9);
        assert!((recall_at(&results, &["a.rs"], 10) - 1.0).abs() < 1e-9);
        assert_eq!(recall_at(&results, &[], 10), 0.0);
    }
}
