//! Token-budgeted structural repo maps.
//!
//! Files are ordered by the summed PageRank of their symbols; symbols
//! within a file by line. Emission shows one nested level (methods under
//! their class) and stops once the character budget - `max_tokens` at 4
//! chars per token - runs out.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::graph::ReferenceGraph;
use crate::types::SymbolDefinition;

const MAX_SYMBOLS_PER_FILE: usize = 20;
const MAX_METHODS_PER_CLASS: usize = 10;
const QUERY_TOP_SYMBOLS: usize = 50;
const CHARS_PER_TOKEN: usize = 4;

/// Generate the full-project map within `max_tokens`.
pub fn generate(graph: &ReferenceGraph, max_tokens: u32) -> String {
    let files = files_by_rank(graph);
    render(graph, &files, None, max_tokens)
}

/// Generate a query-focused map: symbols scored against the query, the
/// top 50 kept, then grouped and emitted like the full map.
pub fn generate_for_query(graph: &ReferenceGraph, query: &str, max_tokens: u32) -> String {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 2)
        .collect();
    if tokens.is_empty() {
        return generate(graph, max_tokens);
    }

    let mut scored: Vec<(f64, &SymbolDefinition)> = graph
        .symbols
        .values()
        .filter_map(|s| {
            let score = relevance(s, &tokens);
            (score > 0.0).then_some((score, s))
        })
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(QUERY_TOP_SYMBOLS);

    let keep: std::collections::HashSet<&str> =
        scored.iter().map(|(_, s)| s.id.as_str()).collect();

    // Order files by their best symbol relevance.
    let mut file_scores: HashMap<&PathBuf, f64> = HashMap::new();
    for (score, s) in &scored {
        let entry = file_scores.entry(&s.file_path).or_insert(0.0);
        *entry += score;
    }
    let mut files: Vec<(PathBuf, f64)> = file_scores
        .into_iter()
        .map(|(p, s)| (p.clone(), s))
        .collect();
    files.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    render(graph, &files, Some(&keep), max_tokens)
}

/// `(10·name + 5·signature + 3·path) × (1 + rank·100)`.
fn relevance(symbol: &SymbolDefinition, tokens: &[String]) -> f64 {
    let name = symbol.name.to_lowercase();
    let signature = symbol.signature.to_lowercase();
    let path = symbol.file_path.to_string_lossy().to_lowercase();

    let mut base = 0.0;
    for token in tokens {
        if name.contains(token) {
            base += 10.0;
        }
        if signature.contains(token) {
            base += 5.0;
        }
        if path.contains(token) {
            base += 3.0;
        }
    }
    base * (1.0 + symbol.pagerank_score * 100.0)
}

fn files_by_rank(graph: &ReferenceGraph) -> Vec<(PathBuf, f64)> {
    let mut scores: HashMap<&PathBuf, f64> = HashMap::new();
    for s in graph.symbols.values() {
        *scores.entry(&s.file_path).or_insert(0.0) += s.pagerank_score;
    }
    let mut files: Vec<(PathBuf, f64)> =
        scores.into_iter().map(|(p, s)| (p.clone(), s)).collect();
    files.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    files
}

fn render(
    graph: &ReferenceGraph,
    files: &[(PathBuf, f64)],
    keep: Option<&std::collections::HashSet<&str>>,
    max_tokens: u32,
) -> String {
    let char_budget = max_tokens as usize * CHARS_PER_TOKEN;
    let mut out = String::new();

    'files: for (path, _) in files {
        let mut symbols: Vec<&SymbolDefinition> = graph
            .symbols
            .values()
            .filter(|s| &s.file_path == path)
            .filter(|s| keep.map_or(true, |k| k.contains(s.id.as_str())))
            .collect();
        symbols.sort_by_key(|s| s.start_line);

        // Top level first; methods render nested under their parent.
        let top: Vec<&SymbolDefinition> = symbols
            .iter()
            .filter(|s| s.parent_id.is_none())
            .copied()
            .take(MAX_SYMBOLS_PER_FILE)
            .collect();
        if top.is_empty() && symbols.is_empty() {
            continue;
        }

        let header = format!("{}:\n", path.display());
        if out.len() + header.len() > char_budget {
            break;
        }
        out.push_str(&header);

        // Orphan methods (parent filtered out) still appear at top level
        // in query mode.
        let listed: Vec<&SymbolDefinition> = if top.is_empty() {
            symbols.iter().copied().take(MAX_SYMBOLS_PER_FILE).collect()
        } else {
            top
        };

        for symbol in listed {
            let line = format!("  {}\n", describe(symbol));
            if out.len() + line.len() > char_budget {
                break 'files;
            }
            out.push_str(&line);

            let mut methods: Vec<&SymbolDefinition> = symbols
                .iter()
                .filter(|m| m.parent_id.as_deref() == Some(symbol.id.as_str()))
                .copied()
                .collect();
            methods.sort_by_key(|m| m.start_line);
            for method in methods.into_iter().take(MAX_METHODS_PER_CLASS) {
                let line = format!("    {}\n", describe(method));
                if out.len() + line.len() > char_budget {
                    break 'files;
                }
                out.push_str(&line);
            }
        }
    }

    out
}

fn describe(symbol: &SymbolDefinition) -> String {
    if symbol.signature.is_empty() {
        format!("{} {}", symbol.kind.as_str(), symbol.name)
    } else {
        symbol.signature.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PageRankParams;
    use crate::types::{Language, RefKind, SymbolKind, SymbolReference};

    fn symbol(id: &str, name: &str, file: &str, line: u32, parent: Option<&str>) -> SymbolDefinition {
        SymbolDefinition {
            id: id.into(),
            kind: if parent.is_some() { SymbolKind::Method } else { SymbolKind::Class },
            name: name.into(),
            file_path: PathBuf::from(file),
            start_line: line,
            end_line: line + 5,
            signature: format!("fn {name}()"),
            docstring: None,
            parent_id: parent.map(Into::into),
            is_exported: true,
            language: Language::Rust,
            pagerank_score: 0.0,
            updated_at: 0,
        }
    }

    fn reference(from: &str, to: &str) -> SymbolReference {
        SymbolReference {
            from_symbol_id: from.into(),
            to_symbol_name: to.into(),
            to_symbol_id: None,
            kind: RefKind::Call,
            file_path: PathBuf::from("caller.rs"),
            line: 1,
            is_resolved: false,
        }
    }

    fn sample_graph() -> ReferenceGraph {
        let symbols = vec![
            symbol("core", "CoreEngine", "src/core.rs", 1, None),
            symbol("core_run", "run", "src/core.rs", 3, Some("core")),
            symbol("util", "format_bytes", "src/util.rs", 1, None),
            symbol("caller1", "main_entry", "caller.rs", 1, None),
            symbol("caller2", "second_entry", "caller.rs", 10, None),
        ];
        // Both callers reference CoreEngine, making core.rs top-ranked.
        let refs = vec![
            reference("caller1", "CoreEngine"),
            reference("caller2", "CoreEngine"),
        ];
        ReferenceGraph::build(symbols, refs, PageRankParams::default())
    }

    #[test]
    fn highest_ranked_file_comes_first() {
        let graph = sample_graph();
        let map = generate(&graph, 2000);
        let core_pos = map.find("src/core.rs").expect("core listed");
        let util_pos = map.find("src/util.rs").expect("util listed");
        assert!(core_pos < util_pos);
    }

    #[test]
    fn methods_nest_under_their_class() {
        let graph = sample_graph();
        let map = generate(&graph, 2000);
        let class_line = map.find("fn CoreEngine()").expect("class");
        let method_line = map.find("    fn run()").expect("nested method");
        assert!(class_line < method_line);
    }

    #[test]
    fn budget_caps_output() {
        let graph = sample_graph();
        let map = generate(&graph, 10);
        assert!(map.len() <= 10 * CHARS_PER_TOKEN + 64);
    }

    #[test]
    fn query_map_filters_symbols() {
        let graph = sample_graph();
        let map = generate_for_query(&graph, "format bytes", 2000);
        assert!(map.contains("format_bytes"));
        assert!(!map.contains("CoreEngine"));
    }

    #[test]
    fn empty_query_falls_back_to_full_map() {
        let graph = sample_graph();
        let map = generate_for_query(&graph, "  ", 2000);
        assert!(map.contains("src/core.rs"));
    }

    #[test]
    fn empty_graph_renders_empty() {
        let graph = ReferenceGraph::default();
        assert!(generate(&graph, 1000).is_empty());
    }
}
