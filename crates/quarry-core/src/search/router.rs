//! Query routing: intent classification and retrieval strategy.
//!
//! A cheap rule pass classifies every query; only when its confidence
//! falls below the acceptance bar is an optional LLM classifier
//! consulted, and its answer is taken only above `min_confidence`. The
//! router never fails: any string, including garbage, maps to one of
//! the five intents.

use serde::Deserialize;

use crate::llm::{complete_json, ChatMessage, CompletionOptions, Llm};
use crate::types::UnitKind;

/// The five query intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// Find a named symbol.
    SymbolLookup,
    /// Relationship questions (callers, dependencies, implements).
    Structural,
    /// Meaning-driven search (the default).
    Semantic,
    /// Find code similar to a description or snippet.
    Similarity,
    /// Find by place: folder, test suite, file extension.
    Location,
}

impl QueryIntent {
    /// Stable identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SymbolLookup => "symbol_lookup",
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::Similarity => "similarity",
            Self::Location => "location",
        }
    }

    fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "symbol_lookup" => Some(Self::SymbolLookup),
            "structural" => Some(Self::Structural),
            "semantic" => Some(Self::Semantic),
            "similarity" => Some(Self::Similarity),
            "location" => Some(Self::Location),
            _ => None,
        }
    }
}

/// Primary retrieval channel for a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimaryChannel {
    /// Exact symbol/keyword lookup backed by hybrid search.
    Symbol,
    /// Keyword-led hybrid search.
    Keyword,
    /// Vector-led hybrid search.
    Vector,
    /// Path-filtered search.
    Path,
}

/// Classification result.
#[derive(Debug, Clone)]
pub struct Classification {
    /// Chosen intent.
    pub intent: QueryIntent,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Identifier-like entities pulled from the query.
    pub entities: Vec<String>,
    /// Path glob derived from location cues.
    pub path_hint: Option<String>,
}

/// Executable retrieval strategy derived from a classification.
#[derive(Debug, Clone)]
pub struct RetrievalStrategy {
    /// The classification this strategy came from.
    pub intent: QueryIntent,
    /// Which channel leads.
    pub primary: PrimaryChannel,
    /// Unit-kind hint for chunk filtering (empty = all).
    pub unit_types: Vec<UnitKind>,
    /// Vector channel weight.
    pub vector_weight: f64,
    /// BM25 channel weight.
    pub bm25_weight: f64,
    /// Path glob filter, when the intent is location-driven.
    pub path_pattern: Option<String>,
    /// Name hint for symbol lookups.
    pub name_hint: Option<String>,
}

/// Rule confidence at or above which the LLM is not consulted.
pub const RULE_ACCEPT_CONFIDENCE: f64 = 0.85;

const STRUCTURAL_KEYWORDS: &[&str] = &[
    "calls",
    "invokes",
    "uses",
    "imports",
    "extends",
    "implements",
    "inherits",
    "depends",
    "callers",
    "callees",
    "dependencies",
    "dependents",
];

const SIMILARITY_MARKERS: &[&str] = &["similar", "like", "same as", "pattern", "example of"];

const KNOWN_EXTENSIONS: &[&str] = &[
    ".ts", ".tsx", ".js", ".jsx", ".mjs", ".cjs", ".py", ".go", ".rs", ".java", ".c", ".h",
    ".cpp", ".cc", ".cxx", ".hpp",
];

/// Rule-based classification. Never fails.
pub fn classify(query: &str) -> Classification {
    let trimmed = query.trim();
    let lower = trimmed.to_lowercase();

    // Control characters poison token heuristics; bail to a low-confidence
    // semantic answer.
    if trimmed.chars().any(|c| c.is_control()) || trimmed.is_empty() {
        return Classification {
            intent: QueryIntent::Semantic,
            confidence: 0.3,
            entities: Vec::new(),
            path_hint: None,
        };
    }

    let entities = extract_entities(trimmed);

    // Bare PascalCase/camelCase token: a symbol lookup.
    if !trimmed.contains(char::is_whitespace) && is_identifier_case(trimmed) {
        return Classification {
            intent: QueryIntent::SymbolLookup,
            confidence: 0.95,
            entities: vec![trimmed.to_string()],
            path_hint: None,
        };
    }

    // `function <name>` and friends.
    let mut words = lower.split_whitespace();
    if let (Some(kw), Some(_name)) = (words.next(), words.next()) {
        if matches!(kw, "function" | "class" | "type" | "interface" | "enum" | "def" | "func")
            && lower.split_whitespace().count() == 2
        {
            return Classification {
                intent: QueryIntent::SymbolLookup,
                confidence: 0.9,
                entities,
                path_hint: None,
            };
        }
    }

    // Structural relationship queries.
    let structural_hit = STRUCTURAL_KEYWORDS
        .iter()
        .any(|kw| lower.split_whitespace().any(|w| w == *kw))
        || lower.contains("methods in")
        || lower.contains("methods of")
        || lower.contains("methods on")
        || lower.starts_with("what calls")
        || lower.starts_with("who calls")
        || lower.starts_with("what uses")
        || lower.starts_with("who uses")
        || lower.starts_with("what imports")
        || lower.starts_with("who imports");
    if structural_hit {
        return Classification {
            intent: QueryIntent::Structural,
            confidence: 0.9,
            entities,
            path_hint: None,
        };
    }

    // Location cues: folders, test suites, extension terminators.
    if let Some(hint) = location_hint(&lower) {
        return Classification {
            intent: QueryIntent::Location,
            confidence: 0.88,
            entities,
            path_hint: Some(hint),
        };
    }

    // Similarity phrasing.
    if SIMILARITY_MARKERS.iter().any(|m| lower.contains(m)) {
        return Classification {
            intent: QueryIntent::Similarity,
            confidence: 0.85,
            entities,
            path_hint: None,
        };
    }

    Classification {
        intent: QueryIntent::Semantic,
        confidence: 0.5,
        entities,
        path_hint: None,
    }
}

#[derive(Debug, Deserialize)]
struct LlmClassification {
    intent: String,
    confidence: f64,
}

/// Full routing: rules first, then the optional LLM classifier when the
/// rule confidence is below the acceptance bar.
pub fn route(
    query: &str,
    llm: Option<&dyn Llm>,
    min_confidence: f64,
) -> (Classification, RetrievalStrategy) {
    let mut classification = classify(query);

    if classification.confidence < RULE_ACCEPT_CONFIDENCE {
        if let Some(llm) = llm {
            match classify_with_llm(llm, query) {
                Ok(c) if c.confidence >= min_confidence => {
                    tracing::debug!(intent = c.intent.as_str(), confidence = c.confidence,
                        "LLM classification accepted");
                    classification.intent = c.intent;
                    classification.confidence = c.confidence;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "LLM classification failed, keeping rule output");
                }
            }
        }
    }

    let strategy = strategy_for(&classification);
    (classification, strategy)
}

fn classify_with_llm(
    llm: &dyn Llm,
    query: &str,
) -> crate::error::QuarryResult<Classification> {
    let prompt = format!(
        "Classify this code-search query into one intent: symbol_lookup, structural, \
         semantic, similarity, or location. Respond with JSON \
         {{\"intent\", \"confidence\"}}.\n\nQuery: {query}"
    );
    let parsed: LlmClassification = complete_json(
        llm,
        &[ChatMessage::user(prompt)],
        &CompletionOptions::default(),
    )?;
    let intent = QueryIntent::from_str_opt(&parsed.intent)
        .ok_or_else(|| crate::error::QuarryError::InvalidResponse {
            message: format!("unknown intent '{}'", parsed.intent),
        })?;
    Ok(Classification {
        intent,
        confidence: parsed.confidence.clamp(0.0, 1.0),
        entities: Vec::new(),
        path_hint: None,
    })
}

/// The strategy table of the routing design.
pub fn strategy_for(classification: &Classification) -> RetrievalStrategy {
    let name_hint = classification.entities.first().cloned();
    match classification.intent {
        QueryIntent::SymbolLookup => RetrievalStrategy {
            intent: classification.intent,
            primary: PrimaryChannel::Symbol,
            unit_types: vec![
                UnitKind::Function,
                UnitKind::Method,
                UnitKind::Class,
                UnitKind::Interface,
                UnitKind::Type,
            ],
            vector_weight: 0.30,
            bm25_weight: 0.70,
            path_pattern: None,
            name_hint,
        },
        QueryIntent::Structural => RetrievalStrategy {
            intent: classification.intent,
            primary: PrimaryChannel::Keyword,
            unit_types: vec![UnitKind::Class, UnitKind::Interface, UnitKind::Function],
            vector_weight: 0.40,
            bm25_weight: 0.60,
            path_pattern: None,
            name_hint,
        },
        QueryIntent::Location => RetrievalStrategy {
            intent: classification.intent,
            primary: PrimaryChannel::Path,
            unit_types: Vec::new(),
            vector_weight: 0.60,
            bm25_weight: 0.40,
            path_pattern: classification.path_hint.clone(),
            name_hint,
        },
        QueryIntent::Similarity => RetrievalStrategy {
            intent: classification.intent,
            primary: PrimaryChannel::Vector,
            unit_types: Vec::new(),
            vector_weight: 0.80,
            bm25_weight: 0.20,
            path_pattern: None,
            name_hint,
        },
        QueryIntent::Semantic => RetrievalStrategy {
            intent: classification.intent,
            primary: PrimaryChannel::Vector,
            unit_types: Vec::new(),
            vector_weight: 0.60,
            bm25_weight: 0.40,
            path_pattern: None,
            name_hint,
        },
    }
}

fn is_identifier_case(token: &str) -> bool {
    if token.len() < 2 || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
        return false;
    }
    let has_upper = token.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = token.chars().any(|c| c.is_ascii_lowercase());
    // PascalCase or camelCase needs both cases; ALLCAPS and plain words
    // are ambiguous and fall through to other rules.
    has_upper && has_lower
}

fn extract_entities(query: &str) -> Vec<String> {
    query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.len() >= 3)
        .filter(|t| is_identifier_case(t) || t.contains('_'))
        .map(str::to_string)
        .collect()
}

fn location_hint(lower: &str) -> Option<String> {
    // `... in the X folder` / `... in the X directory`
    if let Some(rest) = lower.split("in the ").nth(1) {
        let mut parts = rest.split_whitespace();
        if let Some(name) = parts.next() {
            if matches!(parts.next(), Some("folder") | Some("directory") | Some("dir")) {
                return Some(format!("**/{name}/**"));
            }
        }
    }

    // `tests for ...` / `specs for ...`
    if lower.starts_with("tests for")
        || lower.starts_with("specs for")
        || lower.contains(" tests for ")
        || lower.contains(" specs for ")
    {
        return Some("**/*test*".into());
    }

    // Extension terminator: `... .ts`
    for ext in KNOWN_EXTENSIONS {
        if lower.ends_with(ext) || lower.contains(&format!("{ext} ")) {
            return Some(format!("**/*{ext}"));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn pascal_case_token_is_symbol_lookup() {
        let c = classify("UserService");
        assert_eq!(c.intent, QueryIntent::SymbolLookup);
        assert!(c.confidence >= 0.85);
        assert_eq!(c.entities, vec!["UserService".to_string()]);
    }

    #[test]
    fn keyword_name_pair_is_symbol_lookup() {
        let c = classify("function parseConfig");
        assert_eq!(c.intent, QueryIntent::SymbolLookup);
        assert!(c.confidence >= 0.85);
    }

    #[test]
    fn calls_query_is_structural() {
        let c = classify("what calls processPayment");
        assert_eq!(c.intent, QueryIntent::Structural);
        assert!(c.confidence >= 0.85);
        assert!(c.entities.iter().any(|e| e == "processPayment"));
    }

    #[test]
    fn tests_for_query_is_location() {
        let c = classify("tests for payment module");
        assert_eq!(c.intent, QueryIntent::Location);
        assert!(c.path_hint.is_some());
    }

    #[test]
    fn folder_query_is_location() {
        let c = classify("handlers in the routes folder");
        assert_eq!(c.intent, QueryIntent::Location);
        assert_eq!(c.path_hint.as_deref(), Some("**/routes/**"));
    }

    #[test]
    fn similar_query_is_similarity() {
        let c = classify("code similar to the retry loop");
        assert_eq!(c.intent, QueryIntent::Similarity);
    }

    #[test]
    fn free_text_defaults_to_semantic() {
        let c = classify("how does authentication work");
        assert_eq!(c.intent, QueryIntent::Semantic);
        assert!(c.confidence < RULE_ACCEPT_CONFIDENCE);
    }

    #[test]
    fn control_chars_fall_back_to_semantic() {
        let c = classify("weird\u{0007}query\u{0000}");
        assert_eq!(c.intent, QueryIntent::Semantic);
        assert!(c.confidence <= 0.5);
    }

    #[test]
    fn any_string_yields_an_intent() {
        for q in ["", "   ", "!!!", "日本語のクエリ", "a", &"x".repeat(10_000)] {
            let c = classify(q);
            assert!(c.confidence >= 0.0 && c.confidence <= 1.0, "query {q:?}");
        }
    }

    #[test]
    fn strategy_weights_match_table() {
        let symbol = strategy_for(&classify("UserService"));
        assert_eq!(symbol.primary, PrimaryChannel::Symbol);
        assert!((symbol.vector_weight - 0.30).abs() < 1e-12);
        assert!((symbol.bm25_weight - 0.70).abs() < 1e-12);

        let structural = strategy_for(&classify("what calls processPayment"));
        assert!((structural.vector_weight - 0.40).abs() < 1e-12);

        let similarity = strategy_for(&classify("similar to this pattern"));
        assert!((similarity.vector_weight - 0.80).abs() < 1e-12);

        let semantic = strategy_for(&classify("how does auth work"));
        assert!((semantic.vector_weight - 0.60).abs() < 1e-12);
    }

    #[test]
    fn high_confidence_rules_skip_llm() {
        let llm = ScriptedLlm::new(r#"{"intent": "semantic", "confidence": 0.99}"#);
        let (c, _s) = route("UserService", Some(&llm), 0.6);
        assert_eq!(c.intent, QueryIntent::SymbolLookup);
        assert_eq!(llm.call_count(), 0);
    }

    #[test]
    fn low_confidence_consults_llm() {
        let llm = ScriptedLlm::new("");
        llm.push_response(r#"{"intent": "similarity", "confidence": 0.8}"#);
        let (c, s) = route("find me something nice", Some(&llm), 0.6);
        assert_eq!(c.intent, QueryIntent::Similarity);
        assert_eq!(s.primary, PrimaryChannel::Vector);
        assert_eq!(llm.call_count(), 1);
    }

    #[test]
    fn weak_llm_answer_keeps_rule_output() {
        let llm = ScriptedLlm::new("");
        llm.push_response(r#"{"intent": "similarity", "confidence": 0.4}"#);
        let (c, _s) = route("find me something nice", Some(&llm), 0.6);
        assert_eq!(c.intent, QueryIntent::Semantic);
    }

    #[test]
    fn llm_error_keeps_rule_output() {
        let llm = ScriptedLlm::new("");
        llm.push_error(crate::error::LlmErrorKind::NonRecoverable, "nope");
        let (c, _s) = route("find me something nice", Some(&llm), 0.6);
        assert_eq!(c.intent, QueryIntent::Semantic);
    }
}
