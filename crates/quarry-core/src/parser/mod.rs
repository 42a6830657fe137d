//! AST parsing subsystem using tree-sitter.
//!
//! The [`ParserHost`] owns the grammar cache and is created once at
//! startup, then passed explicitly to the components that parse. Parsing
//! is CPU-bound and synchronous; callers on async paths offload it to a
//! worker pool.
//!
//! ```text
//! Source -> Language Detection -> tree-sitter Grammar
//!        -> Parse -> CST
//!        -> Unit Extraction   (units)   -> Vec<CodeUnit>
//!        -> Symbol/Ref Pass   (refs)    -> Vec<SymbolDefinition>, Vec<SymbolReference>
//! ```
//!
//! A file that fails to parse still produces its file unit; syntax errors
//! never abort ingestion.

pub mod languages;
pub mod refs;
pub mod units;

use dashmap::DashMap;

use crate::error::{QuarryError, QuarryResult};
use crate::types::Language;

/// Process-scoped parser handle with a per-language grammar cache.
pub struct ParserHost {
    grammars: DashMap<Language, tree_sitter::Language>,
}

impl ParserHost {
    /// Create an empty host; grammars load lazily on first use.
    pub fn new() -> Self {
        Self { grammars: DashMap::new() }
    }

    /// The tree-sitter grammar for a language (cached).
    pub fn grammar(&self, language: Language) -> tree_sitter::Language {
        self.grammars
            .entry(language)
            .or_insert_with(|| languages::grammar(language))
            .clone()
    }

    /// Parse source text. Returns an error only when tree-sitter itself
    /// gives up (timeout/cancellation); a tree containing ERROR nodes is
    /// still returned and usable.
    pub fn parse(&self, source: &[u8], language: Language) -> QuarryResult<tree_sitter::Tree> {
        let mut parser = tree_sitter::Parser::new();
        parser
            .set_language(&self.grammar(language))
            .map_err(|e| QuarryError::Internal(format!("grammar load failed: {e}")))?;
        parser.parse(source, None).ok_or_else(|| QuarryError::Internal(
            "tree-sitter returned no tree".into(),
        ))
    }
}

impl Default for ParserHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the text of a tree-sitter node.
pub(crate) fn node_text<'a>(node: tree_sitter::Node<'_>, source: &'a [u8]) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_languages() {
        let host = ParserHost::new();
        let samples: &[(Language, &str)] = &[
            (Language::TypeScript, "export function f(): number { return 1; }"),
            (Language::JavaScript, "function f() { return 1; }"),
            (Language::Python, "def f():\n    return 1\n"),
            (Language::Go, "package main\nfunc F() int { return 1 }"),
            (Language::Rust, "pub fn f() -> u32 { 1 }"),
            (Language::Java, "class A { int f() { return 1; } }"),
            (Language::C, "int f(void) { return 1; }"),
            (Language::Cpp, "class A { public: int f() { return 1; } };"),
        ];
        for (lang, src) in samples {
            let tree = host.parse(src.as_bytes(), *lang).expect("parse");
            assert!(!tree.root_node().has_error(), "unexpected error for {lang}");
        }
    }

    #[test]
    fn broken_source_still_yields_tree() {
        let host = ParserHost::new();
        let tree = host
            .parse(b"def broken(:\n  ???", Language::Python)
            .expect("parse");
        assert!(tree.root_node().has_error());
    }
}
