//! Symbol definitions and raw reference extraction.
//!
//! Symbols are the subset of code units that participate in the
//! reference graph. References come from per-language tree-sitter
//! capture queries; each capture is attributed to the smallest enclosing
//! symbol by line containment and dropped when there is none.

use std::collections::HashSet;
use std::path::Path;

use tree_sitter::StreamingIterator;

use crate::parser::languages::spec_for;
use crate::parser::{node_text, ParserHost};
use crate::types::{
    now_ms, CodeUnit, Language, RefKind, SymbolDefinition, SymbolKind, SymbolReference,
};

/// Derive symbol definitions from an extracted unit hierarchy.
///
/// Only named units of graph-participating kinds become symbols; the
/// `parent_id` survives only when the parent is itself a symbol (the
/// enclosing class of a method), never the file unit.
pub fn extract_symbols(units: &[CodeUnit]) -> Vec<SymbolDefinition> {
    let symbol_ids: HashSet<&str> = units
        .iter()
        .filter(|u| SymbolKind::from_unit_kind(u.unit_type).is_some() && u.name.is_some())
        .map(|u| u.id.as_str())
        .collect();

    units
        .iter()
        .filter_map(|unit| {
            let kind = SymbolKind::from_unit_kind(unit.unit_type)?;
            let name = unit.name.clone()?;
            Some(SymbolDefinition {
                id: unit.id.clone(),
                kind,
                name,
                file_path: unit.file_path.clone(),
                start_line: unit.start_line,
                end_line: unit.end_line,
                signature: unit.signature.clone(),
                docstring: unit.docstring.clone(),
                parent_id: unit
                    .parent_id
                    .as_ref()
                    .filter(|p| symbol_ids.contains(p.as_str()))
                    .cloned(),
                is_exported: unit.metadata.is_exported,
                language: unit.language,
                pagerank_score: 0.0,
                updated_at: now_ms(),
            })
        })
        .collect()
}

/// Extract raw references from one file.
///
/// Runs the language's capture query over a fresh parse. Captures
/// shorter than two characters are skipped; captures outside any symbol
/// are dropped; duplicates per `(from, name, kind)` are merged.
pub fn extract_references(
    host: &ParserHost,
    source: &str,
    path: &Path,
    language: Language,
    symbols: &[SymbolDefinition],
) -> Vec<SymbolReference> {
    let Ok(tree) = host.parse(source.as_bytes(), language) else {
        return Vec::new();
    };

    let spec = spec_for(language);
    let query = match tree_sitter::Query::new(&host.grammar(language), spec.reference_query) {
        Ok(q) => q,
        Err(e) => {
            tracing::warn!(language = %language, error = %e, "reference query failed to compile");
            return Vec::new();
        }
    };

    // Pre-sort local symbols by span size so the containment scan finds
    // the tightest enclosing symbol first.
    let mut local: Vec<&SymbolDefinition> =
        symbols.iter().filter(|s| s.file_path == path).collect();
    local.sort_by_key(|s| s.end_line.saturating_sub(s.start_line));

    let mut seen: HashSet<(String, String, RefKind)> = HashSet::new();
    let mut refs = Vec::new();

    let capture_names = query.capture_names();
    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), source.as_bytes());
    while let Some(m) = matches.next() {
        for capture in m.captures {
            let kind = match capture_names[capture.index as usize] {
                "call" => RefKind::Call,
                "type" => RefKind::TypeUsage,
                "import" => RefKind::Import,
                "extends" => RefKind::Extends,
                "implements" => RefKind::Implements,
                "field" => RefKind::FieldAccess,
                _ => continue,
            };

            let raw = node_text(capture.node, source.as_bytes());
            let name = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == '`');
            if name.len() < 2 {
                continue;
            }

            let line = capture.node.start_position().row as u32 + 1;
            let Some(enclosing) = enclosing_symbol(&local, line) else {
                continue;
            };

            let key = (enclosing.id.clone(), name.to_string(), kind);
            if !seen.insert(key) {
                continue;
            }

            refs.push(SymbolReference {
                from_symbol_id: enclosing.id.clone(),
                to_symbol_name: name.to_string(),
                to_symbol_id: None,
                kind,
                file_path: path.to_path_buf(),
                line,
                is_resolved: false,
            });
        }
    }

    refs
}

/// The smallest-span symbol whose line range covers `line`.
fn enclosing_symbol<'a>(
    sorted_by_span: &[&'a SymbolDefinition],
    line: u32,
) -> Option<&'a SymbolDefinition> {
    sorted_by_span
        .iter()
        .find(|s| s.start_line <= line && line <= s.end_line)
        .copied()
}
