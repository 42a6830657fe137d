//! Token-budgeted context formatting.
//!
//! The budget splits 50/25/25 across primary results, supporting
//! results, and file summaries. Primary material is emitted first and
//! summaries last, keeping the middle of the context - where attention
//! sags - for the least critical entries.
//!
//! Token counting is a pluggable estimator; the default is the
//! 4-chars-per-token heuristic.

use crate::index::SearchHit;
use crate::types::{Document, DocumentPayload};

/// Pluggable token estimator.
pub trait TokenEstimator: Send + Sync {
    /// Estimated token count for a text.
    fn estimate(&self, text: &str) -> u32;
}

/// Default heuristic: 4 characters per token.
pub struct CharsPerToken(pub usize);

impl Default for CharsPerToken {
    fn default() -> Self {
        Self(4)
    }
}

impl TokenEstimator for CharsPerToken {
    fn estimate(&self, text: &str) -> u32 {
        (text.chars().count() / self.0.max(1)).max(1) as u32
    }
}

/// Fraction of the budget given to primary results.
const PRIMARY_BUDGET: f64 = 0.50;
/// Fraction given to supporting results.
const SUPPORTING_BUDGET: f64 = 0.25;
/// Fraction given to file summaries.
const SUMMARY_BUDGET: f64 = 0.25;
/// Share of the result list treated as primary.
const PRIMARY_SHARE: f64 = 0.60;
/// Max distinct files summarised.
const MAX_SUMMARY_FILES: usize = 5;

const TRUNCATION_MARKER: &str = "\n… [truncated]";

/// A formatted context block.
#[derive(Debug, Clone)]
pub struct FormattedContext {
    /// The rendered text.
    pub text: String,
    /// Estimated tokens used.
    pub used_tokens: u32,
    /// Whether any entry was cut short.
    pub truncated: bool,
}

/// Formats fused results into a budgeted context string.
pub struct ContextFormatter {
    max_tokens: u32,
    estimator: Box<dyn TokenEstimator>,
}

impl ContextFormatter {
    /// Formatter with the default chars-per-token estimator.
    pub fn new(max_tokens: u32) -> Self {
        Self { max_tokens, estimator: Box::new(CharsPerToken::default()) }
    }

    /// Formatter with a custom estimator.
    pub fn with_estimator(max_tokens: u32, estimator: Box<dyn TokenEstimator>) -> Self {
        Self { max_tokens, estimator }
    }

    /// Render results and file summaries into one context block.
    ///
    /// `summaries` should hold `file_summary` documents for files
    /// referenced by the results; at most five distinct files are used.
    pub fn format(&self, results: &[SearchHit], summaries: &[Document]) -> FormattedContext {
        let primary_count = ((results.len() as f64) * PRIMARY_SHARE).ceil() as usize;
        let (primary, supporting) = results.split_at(primary_count.min(results.len()));

        let primary_budget = (f64::from(self.max_tokens) * PRIMARY_BUDGET) as u32;
        let supporting_budget = (f64::from(self.max_tokens) * SUPPORTING_BUDGET) as u32;
        let summary_budget = (f64::from(self.max_tokens) * SUMMARY_BUDGET) as u32;

        let mut out = String::new();
        let mut used = 0u32;
        let mut truncated = false;

        used += self.emit_hits(&mut out, primary, primary_budget, &mut truncated);
        used += self.emit_hits(&mut out, supporting, supporting_budget, &mut truncated);

        let mut seen_files = std::collections::HashSet::new();
        let mut summary_docs = Vec::new();
        for doc in summaries {
            if seen_files.insert(doc.file_path.clone()) {
                summary_docs.push(doc);
            }
            if summary_docs.len() >= MAX_SUMMARY_FILES {
                break;
            }
        }
        if !summary_docs.is_empty() {
            let mut remaining = summary_budget;
            out.push_str("\n## File summaries\n");
            used += self.estimator.estimate("## File summaries\n");
            for doc in summary_docs {
                let header = format!("\n### {}\n", doc.file_path.display());
                let (body, cut) = self.clip(&doc.content, remaining.saturating_sub(
                    self.estimator.estimate(&header),
                ));
                if body.is_empty() {
                    truncated = true;
                    break;
                }
                out.push_str(&header);
                out.push_str(&body);
                out.push('\n');
                let spent = self.estimator.estimate(&header) + self.estimator.estimate(&body);
                used += spent;
                remaining = remaining.saturating_sub(spent);
                truncated |= cut;
            }
        }

        FormattedContext { text: out, used_tokens: used, truncated }
    }

    fn emit_hits(
        &self,
        out: &mut String,
        hits: &[SearchHit],
        budget: u32,
        truncated: &mut bool,
    ) -> u32 {
        let mut remaining = budget;
        let mut used = 0u32;
        for hit in hits {
            let header = entry_header(&hit.document);
            let header_cost = self.estimator.estimate(&header);
            if header_cost >= remaining {
                *truncated = true;
                break;
            }
            let (body, cut) = self.clip(&hit.document.content, remaining - header_cost);
            if body.is_empty() {
                *truncated = true;
                break;
            }
            out.push_str(&header);
            out.push_str("```\n");
            out.push_str(&body);
            out.push_str("\n```\n");
            let spent = header_cost + self.estimator.estimate(&body) + 2;
            used += spent;
            remaining = remaining.saturating_sub(spent);
            *truncated |= cut;
        }
        used
    }

    /// Clip text to a token allocation; returns the kept text and
    /// whether anything was cut.
    fn clip(&self, text: &str, token_allocation: u32) -> (String, bool) {
        if token_allocation == 0 {
            return (String::new(), true);
        }
        if self.estimator.estimate(text) <= token_allocation {
            return (text.to_string(), false);
        }
        let char_cap = token_allocation as usize * 4;
        let kept: String = text.chars().take(char_cap).collect();
        if kept.is_empty() {
            (String::new(), true)
        } else {
            (format!("{kept}{TRUNCATION_MARKER}"), true)
        }
    }
}

/// Header line for one result: path, line range, and name when known.
fn entry_header(doc: &Document) -> String {
    match &doc.payload {
        DocumentPayload::CodeChunk { start_line, end_line, name, .. } => format!(
            "\n### {}:{}-{} {}\n",
            doc.file_path.display(),
            start_line,
            end_line,
            name.as_deref().unwrap_or(""),
        ),
        _ => format!(
            "\n### {} [{}]\n",
            doc.file_path.display(),
            doc.document_type.as_str(),
        ),
    }
}
