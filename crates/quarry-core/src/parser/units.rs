//! Hierarchical code-unit extraction.
//!
//! Walks the CST and promotes mapped node kinds to [`CodeUnit`]s. Depth
//! and parent are computed from the enclosing *emitted* unit, never the
//! raw AST parent, so wrapper nodes (`class_body`, `export_statement`,
//! `decorated_definition`) do not add hierarchy levels: file -> class ->
//! method always yields depths 0/1/2.

use std::path::Path;

use crate::parser::languages::{spec_for, LanguageSpec};
use crate::parser::{node_text, ParserHost};
use crate::types::{CodeUnit, Language, UnitKind, UnitMetadata, Visibility};

/// Extract the unit hierarchy for one file.
///
/// Always returns at least the file unit, even for empty sources and
/// files tree-sitter cannot parse.
pub fn extract(
    host: &ParserHost,
    source: &str,
    path: &Path,
    language: Language,
    file_hash: &str,
) -> Vec<CodeUnit> {
    let path_str = path.to_string_lossy().replace('\\', "/");
    let line_count = source.lines().count().max(1) as u32;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.clone());

    let file_unit = CodeUnit {
        id: CodeUnit::make_id(&path_str, Some(&file_name), UnitKind::File, 1),
        unit_type: UnitKind::File,
        name: Some(file_name),
        file_path: path.to_path_buf(),
        file_hash: file_hash.to_string(),
        start_line: 1,
        end_line: line_count,
        parent_id: None,
        depth: 0,
        language,
        content: source.to_string(),
        signature: String::new(),
        docstring: None,
        metadata: UnitMetadata {
            is_exported: true,
            visibility: Visibility::Public,
            ..UnitMetadata::default()
        },
    };

    let Ok(tree) = host.parse(source.as_bytes(), language) else {
        return vec![file_unit];
    };

    let spec = spec_for(language);
    let imports = collect_import_names(tree.root_node(), spec, source.as_bytes());

    let mut units = vec![file_unit.clone()];
    let enclosing = Enclosing {
        id: file_unit.id.clone(),
        depth: 0,
        kind: UnitKind::File,
    };
    let mut walker = Walker {
        spec,
        source: source.as_bytes(),
        path_str: &path_str,
        file_path: path,
        file_hash,
        language,
        imports: &imports,
        units: &mut units,
    };
    walker.walk(tree.root_node(), &enclosing, &WalkCtx::default());

    units
}

/// The nearest emitted ancestor unit during the walk.
#[derive(Clone)]
struct Enclosing {
    id: String,
    depth: u32,
    kind: UnitKind,
}

/// Flags inherited from transparent wrapper nodes.
#[derive(Clone, Default)]
struct WalkCtx {
    exported: bool,
    decorators: Vec<String>,
}

struct Walker<'a> {
    spec: &'static LanguageSpec,
    source: &'a [u8],
    path_str: &'a str,
    file_path: &'a Path,
    file_hash: &'a str,
    language: Language,
    imports: &'a [String],
    units: &'a mut Vec<CodeUnit>,
}

impl Walker<'_> {
    fn walk(&mut self, node: tree_sitter::Node<'_>, enclosing: &Enclosing, ctx: &WalkCtx) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let kind_str = child.kind();

            if self.spec.is_transparent(kind_str) {
                let mut inner_ctx = ctx.clone();
                match kind_str {
                    "export_statement" => inner_ctx.exported = true,
                    "decorated_definition" => {
                        inner_ctx.decorators = collect_decorators(child, self.source);
                    }
                    _ => {}
                }
                self.walk(child, enclosing, &inner_ctx);
                continue;
            }

            if let Some(base_kind) = self.spec.unit_kind(kind_str) {
                if let Some(next) = self.emit_unit(child, base_kind, enclosing, ctx) {
                    self.walk(child, &next, &WalkCtx::default());
                    continue;
                }
                // Anonymous non-block node: descend without emitting.
                self.walk(child, enclosing, &WalkCtx::default());
                continue;
            }

            // Arrow functions bound to a variable get the variable's name.
            if matches!(kind_str, "lexical_declaration" | "variable_declaration")
                && matches!(self.language, Language::TypeScript | Language::JavaScript)
            {
                self.emit_arrow_functions(child, enclosing, ctx);
                // Still descend for nested declarations inside initializers.
            }

            if child.child_count() > 0 {
                self.walk(child, enclosing, ctx);
            }
        }
    }

    fn emit_unit(
        &mut self,
        node: tree_sitter::Node<'_>,
        base_kind: UnitKind,
        enclosing: &Enclosing,
        ctx: &WalkCtx,
    ) -> Option<Enclosing> {
        // Go folds structs and interfaces into type_spec; split them back.
        let base_kind = if self.language == Language::Go && node.kind() == "type_spec" {
            match node.child_by_field_name("type").map(|t| t.kind()) {
                Some("struct_type") => UnitKind::Struct,
                Some("interface_type") => UnitKind::Interface,
                _ => base_kind,
            }
        } else {
            base_kind
        };

        let name = extract_name(node, base_kind, self.language, self.source);
        if name.is_none() && base_kind != UnitKind::Block {
            return None;
        }

        // A function nested directly in a type-shaped unit is a method.
        let kind = if base_kind == UnitKind::Function && is_type_shaped(enclosing.kind) {
            UnitKind::Method
        } else {
            base_kind
        };

        let start_line = node.start_position().row as u32 + 1;
        let end_line = node.end_position().row as u32 + 1;
        let content = node_text(node, self.source).to_string();
        let signature = build_signature(&content);
        let docstring = extract_docstring(node, self.spec, self.language, self.source);

        let (visibility, is_exported) = classify_visibility(
            node,
            self.language,
            name.as_deref().unwrap_or(""),
            enclosing.depth,
            ctx.exported,
            self.source,
        );

        let imports_used = self
            .imports
            .iter()
            .filter(|imp| contains_word(&content, imp))
            .cloned()
            .collect();

        let id = CodeUnit::make_id(self.path_str, name.as_deref(), kind, start_line);
        let unit = CodeUnit {
            id: id.clone(),
            unit_type: kind,
            name,
            file_path: self.file_path.to_path_buf(),
            file_hash: self.file_hash.to_string(),
            start_line,
            end_line,
            parent_id: Some(enclosing.id.clone()),
            depth: enclosing.depth + 1,
            language: self.language,
            content,
            signature,
            docstring,
            metadata: UnitMetadata {
                is_async: node_is_async(node, self.source),
                is_exported,
                visibility,
                decorators: ctx.decorators.clone(),
                imports_used,
            },
        };
        self.units.push(unit);

        Some(Enclosing { id, depth: enclosing.depth + 1, kind })
    }

    fn emit_arrow_functions(
        &mut self,
        decl: tree_sitter::Node<'_>,
        enclosing: &Enclosing,
        ctx: &WalkCtx,
    ) {
        let mut cursor = decl.walk();
        for child in decl.children(&mut cursor) {
            if child.kind() != "variable_declarator" {
                continue;
            }
            let Some(value) = child.child_by_field_name("value") else {
                continue;
            };
            if !matches!(value.kind(), "arrow_function" | "function_expression" | "function") {
                continue;
            }
            let Some(name_node) = child.child_by_field_name("name") else {
                continue;
            };
            let name = node_text(name_node, self.source).to_string();
            let start_line = decl.start_position().row as u32 + 1;
            let end_line = decl.end_position().row as u32 + 1;
            let content = node_text(decl, self.source).to_string();
            let id =
                CodeUnit::make_id(self.path_str, Some(&name), UnitKind::Function, start_line);

            self.units.push(CodeUnit {
                id,
                unit_type: UnitKind::Function,
                name: Some(name),
                file_path: self.file_path.to_path_buf(),
                file_hash: self.file_hash.to_string(),
                start_line,
                end_line,
                parent_id: Some(enclosing.id.clone()),
                depth: enclosing.depth + 1,
                language: self.language,
                signature: build_signature(&content),
                docstring: extract_docstring(decl, self.spec, self.language, self.source),
                metadata: UnitMetadata {
                    is_async: content.starts_with("const") && content.contains("async "),
                    is_exported: ctx.exported,
                    visibility: if ctx.exported {
                        Visibility::Public
                    } else {
                        Visibility::Private
                    },
                    decorators: Vec::new(),
                    imports_used: Vec::new(),
                },
                content,
            });
        }
    }
}

fn collect_decorators(node: tree_sitter::Node<'_>, source: &[u8]) -> Vec<String> {
    let mut decorators = Vec::new();
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "decorator" {
            let text = node_text(child, source)
                .lines()
                .next()
                .unwrap_or("")
                .trim_start_matches('@')
                .trim()
                .to_string();
            if !text.is_empty() {
                decorators.push(text);
            }
        }
    }
    decorators
}

fn is_type_shaped(kind: UnitKind) -> bool {
    matches!(
        kind,
        UnitKind::Class
            | UnitKind::Struct
            | UnitKind::Interface
            | UnitKind::Trait
            | UnitKind::Impl
            | UnitKind::Enum
    )
}

/// Name extraction ladder: `name` field, declarator unwrapping, Go
/// `type_spec` name, `impl_<TypeName>` for impl blocks.
fn extract_name(
    node: tree_sitter::Node<'_>,
    kind: UnitKind,
    language: Language,
    source: &[u8],
) -> Option<String> {
    if kind == UnitKind::Impl && language == Language::Rust {
        let type_node = node.child_by_field_name("type")?;
        return Some(format!("impl_{}", node_text(type_node, source)));
    }

    if let Some(name_node) = node.child_by_field_name("name") {
        let text = node_text(name_node, source).trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    // C/C++ declarations hide the identifier inside nested declarators.
    if let Some(declarator) = node.child_by_field_name("declarator") {
        let mut current = declarator;
        loop {
            match current.child_by_field_name("declarator") {
                Some(inner) => current = inner,
                None => break,
            }
        }
        if current.kind().ends_with("identifier") {
            let text = node_text(current, source).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
        // Fall back to the first identifier underneath.
        let mut cursor = current.walk();
        for child in current.children(&mut cursor) {
            if child.kind().ends_with("identifier") {
                return Some(node_text(child, source).trim().to_string());
            }
        }
    }

    None
}

/// Per-language visibility and export classification.
fn classify_visibility(
    node: tree_sitter::Node<'_>,
    language: Language,
    name: &str,
    enclosing_depth: u32,
    exported_ctx: bool,
    source: &[u8],
) -> (Visibility, bool) {
    match language {
        Language::TypeScript | Language::JavaScript => {
            if exported_ctx || has_export_ancestor(node) {
                (Visibility::Public, true)
            } else {
                (Visibility::Private, false)
            }
        }
        Language::Python => {
            if name.starts_with("__") && !name.ends_with("__") {
                (Visibility::Private, false)
            } else if name.starts_with('_') {
                (Visibility::Protected, false)
            } else {
                // Public by convention; exported only at module top level.
                (Visibility::Public, enclosing_depth == 0)
            }
        }
        Language::Go => {
            let upper = name.chars().next().is_some_and(char::is_uppercase);
            if upper {
                (Visibility::Public, true)
            } else {
                (Visibility::Private, false)
            }
        }
        Language::Java => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "modifiers" {
                    let text = node_text(child, source);
                    if text.contains("public") {
                        return (Visibility::Public, true);
                    }
                    if text.contains("protected") {
                        return (Visibility::Protected, false);
                    }
                    if text.contains("private") {
                        return (Visibility::Private, false);
                    }
                }
            }
            (Visibility::Private, false)
        }
        Language::Rust => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "visibility_modifier" {
                    return (Visibility::Public, true);
                }
            }
            (Visibility::Private, false)
        }
        Language::C | Language::Cpp => {
            // File-scope statics are internal linkage; everything else is
            // reachable from other translation units.
            let first_line = node_text(node, source).lines().next().unwrap_or("");
            if first_line.starts_with("static ") || first_line.contains(" static ") {
                (Visibility::Private, false)
            } else {
                (Visibility::Public, true)
            }
        }
    }
}

fn has_export_ancestor(node: tree_sitter::Node<'_>) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "export_statement" => return true,
            // Stop at module boundaries; an export further out does not
            // apply to this declaration.
            "program" | "module" | "statement_block" => return false,
            _ => current = n.parent(),
        }
    }
    false
}

fn node_is_async(node: tree_sitter::Node<'_>, source: &[u8]) -> bool {
    let head = node_text(node, source);
    let first_line = head.lines().next().unwrap_or("");
    first_line.split_whitespace().any(|tok| tok == "async")
}

/// One-line declaration: first line continued through balanced
/// parentheses, at most 5 continuation lines, body removed.
fn build_signature(content: &str) -> String {
    let mut sig = String::new();
    let mut depth: i32 = 0;
    let mut saw_parens = false;

    'outer: for (i, line) in content.lines().enumerate() {
        if i > 5 {
            break;
        }
        if i > 0 {
            sig.push(' ');
        }
        for ch in line.chars() {
            match ch {
                '(' | '[' | '<' => {
                    depth += 1;
                    if ch == '(' {
                        saw_parens = true;
                    }
                }
                ')' | ']' | '>' => depth -= 1,
                '{' if depth <= 0 => break 'outer,
                _ => {}
            }
            sig.push(ch);
        }
        // Continue only while inside an open group.
        if depth <= 0 && (saw_parens || i == 0 && line.trim_end().ends_with(':')) {
            break;
        }
    }

    sig.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(':')
        .trim()
        .to_string()
}

/// Concatenated immediately-preceding comment siblings, stripped of
/// comment markers. Python additionally accepts a leading body string.
fn extract_docstring(
    node: tree_sitter::Node<'_>,
    spec: &LanguageSpec,
    language: Language,
    source: &[u8],
) -> Option<String> {
    let mut comments = Vec::new();
    let mut current = node.prev_sibling();
    while let Some(sibling) = current {
        if !spec.is_comment(sibling.kind()) {
            break;
        }
        comments.push(node_text(sibling, source).to_string());
        current = sibling.prev_sibling();
    }
    comments.reverse();

    if comments.is_empty() && language == Language::Python {
        if let Some(doc) = python_body_docstring(node, source) {
            return Some(doc);
        }
    }

    if comments.is_empty() {
        return None;
    }

    let cleaned = comments
        .iter()
        .flat_map(|c| c.lines())
        .map(|line| strip_comment_markers(line, spec.comment_markers))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn python_body_docstring(node: tree_sitter::Node<'_>, source: &[u8]) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let text = node_text(string, source)
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn strip_comment_markers(line: &str, markers: &[&str]) -> String {
    let mut text = line.trim();
    text = text
        .strip_prefix("/**")
        .or_else(|| text.strip_prefix("/*"))
        .unwrap_or(text);
    text = text.strip_suffix("*/").unwrap_or(text);
    let trimmed = text.trim_start();
    for marker in markers {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest.trim().to_string();
        }
    }
    trimmed.trim().to_string()
}

/// Import names at file scope, matched against unit bodies for the
/// `imports_used` metadata.
fn collect_import_names(
    root: tree_sitter::Node<'_>,
    spec: &LanguageSpec,
    source: &[u8],
) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if !spec.import_nodes.contains(&child.kind()) {
            continue;
        }
        let text = node_text(child, source);
        for token in text
            .split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|t| t.len() >= 2)
        {
            if matches!(
                token,
                "import" | "from" | "use" | "include" | "as" | "type" | "const" | "require"
            ) {
                continue;
            }
            if !names.iter().any(|n| n == token) {
                names.push(token.to_string());
            }
        }
    }
    names
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(idx, _)| {
        let before_ok = idx == 0
            || !haystack[..idx]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        let after = idx + word.len();
        let after_ok = after >= haystack.len()
            || !haystack[after..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_');
        before_ok && after_ok
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_str(source: &str, name: &str, language: Language) -> Vec<CodeUnit> {
        let host = ParserHost::new();
        extract(&host, source, Path::new(name), language, "testhash")
    }

    #[test]
    fn empty_file_yields_single_file_unit() {
        let units = extract_str("", "empty.ts", Language::TypeScript);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].unit_type, UnitKind::File);
        assert_eq!(units[0].depth, 0);
        assert_eq!(units[0].parent_id, None);
        assert_eq!(units[0].start_line, 1);
        assert_eq!(units[0].end_line, 1);
    }

    #[test]
    fn comment_only_file_yields_single_file_unit() {
        let units = extract_str("// just a note\n// nothing else\n", "c.ts", Language::TypeScript);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].unit_type, UnitKind::File);
    }

    #[test]
    fn method_sits_at_depth_two() {
        let units = extract_str("export class S { m(){} }", "s.ts", Language::TypeScript);

        let class = units
            .iter()
            .find(|u| u.name.as_deref() == Some("S"))
            .expect("class unit");
        assert_eq!(class.unit_type, UnitKind::Class);
        assert_eq!(class.depth, 1);

        let method = units
            .iter()
            .find(|u| u.name.as_deref() == Some("m"))
            .expect("method unit");
        assert_eq!(method.unit_type, UnitKind::Method);
        assert_eq!(method.depth, 2);
        assert_eq!(method.parent_id.as_deref(), Some(class.id.as_str()));

        let file = units.iter().find(|u| u.unit_type == UnitKind::File).expect("file unit");
        assert_eq!(class.parent_id.as_deref(), Some(file.id.as_str()));
        assert_eq!(file.depth, 0);
    }

    #[test]
    fn hierarchy_invariants_hold() {
        let source = r#"
export class Outer {
    one() { return 1; }
    two() { return 2; }
}
export function standalone() {}
"#;
        let units = extract_str(source, "h.ts", Language::TypeScript);
        let by_id: std::collections::HashMap<&str, &CodeUnit> =
            units.iter().map(|u| (u.id.as_str(), u)).collect();

        assert_eq!(
            units.iter().filter(|u| u.depth == 0).count(),
            1,
            "exactly one root"
        );
        for unit in &units {
            if let Some(parent_id) = &unit.parent_id {
                let parent = by_id.get(parent_id.as_str()).expect("parent exists");
                assert_eq!(unit.depth, parent.depth + 1);
                assert_eq!(unit.file_path, parent.file_path);
                assert!(parent.start_line <= unit.start_line);
                assert!(unit.end_line <= parent.end_line);
            }
        }
    }

    #[test]
    fn go_export_follows_case() {
        let source = "package main\n\nfunc Foo() {}\n\nfunc bar() {}\n";
        let units = extract_str(source, "main.go", Language::Go);

        let foo = units.iter().find(|u| u.name.as_deref() == Some("Foo")).expect("Foo");
        assert!(foo.metadata.is_exported);
        let bar = units.iter().find(|u| u.name.as_deref() == Some("bar")).expect("bar");
        assert!(!bar.metadata.is_exported);
    }

    #[test]
    fn python_underscore_conventions() {
        let source = "def _helper(): pass\n\ndef process(): pass\n\ndef __secret(): pass\n";
        let units = extract_str(source, "m.py", Language::Python);

        let helper = units.iter().find(|u| u.name.as_deref() == Some("_helper")).expect("h");
        assert!(!helper.metadata.is_exported);
        assert_eq!(helper.metadata.visibility, Visibility::Protected);

        let process = units.iter().find(|u| u.name.as_deref() == Some("process")).expect("p");
        assert!(process.metadata.is_exported);
        assert_eq!(process.metadata.visibility, Visibility::Public);

        let secret = units.iter().find(|u| u.name.as_deref() == Some("__secret")).expect("s");
        assert_eq!(secret.metadata.visibility, Visibility::Private);
    }

    #[test]
    fn rust_pub_marks_exported() {
        let source = "pub fn api() {}\n\nfn internal() {}\n";
        let units = extract_str(source, "lib.rs", Language::Rust);
        let api = units.iter().find(|u| u.name.as_deref() == Some("api")).expect("api");
        assert!(api.metadata.is_exported);
        let internal = units
            .iter()
            .find(|u| u.name.as_deref() == Some("internal"))
            .expect("internal");
        assert!(!internal.metadata.is_exported);
    }

    #[test]
    fn rust_impl_units_are_named() {
        let source = "struct Foo;\n\nimpl Foo {\n    fn go(&self) {}\n}\n";
        let units = extract_str(source, "lib.rs", Language::Rust);
        let imp = units
            .iter()
            .find(|u| u.unit_type == UnitKind::Impl)
            .expect("impl unit");
        assert_eq!(imp.name.as_deref(), Some("impl_Foo"));

        let method = units.iter().find(|u| u.name.as_deref() == Some("go")).expect("go");
        assert_eq!(method.unit_type, UnitKind::Method);
        assert_eq!(method.parent_id.as_deref(), Some(imp.id.as_str()));
    }

    #[test]
    fn arrow_function_takes_variable_name() {
        let source = "export const add = (a: number, b: number): number => a + b;\n";
        let units = extract_str(source, "util.ts", Language::TypeScript);
        let add = units.iter().find(|u| u.name.as_deref() == Some("add")).expect("add");
        assert_eq!(add.unit_type, UnitKind::Function);
        assert!(add.metadata.is_exported);
    }

    #[test]
    fn id_stability_across_reparse() {
        let source = "export function stable() { return 42; }\n";
        let first = extract_str(source, "s.ts", Language::TypeScript);
        let second = extract_str(source, "s.ts", Language::TypeScript);
        let ids_a: Vec<&str> = first.iter().map(|u| u.id.as_str()).collect();
        let ids_b: Vec<&str> = second.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn signature_stops_at_body() {
        let sig = build_signature("fn parse(source: &str,\n    lang: Language,\n) -> Tree {\n    body\n}");
        assert_eq!(sig, "fn parse(source: &str, lang: Language, ) -> Tree");
        assert!(!sig.contains("body"));
    }

    #[test]
    fn docstring_from_leading_comments() {
        let source = "// Adds two numbers.\n// Returns the sum.\nfunction add(a, b) { return a + b; }\n";
        let units = extract_str(source, "a.js", Language::JavaScript);
        let add = units.iter().find(|u| u.name.as_deref() == Some("add")).expect("add");
        assert_eq!(
            add.docstring.as_deref(),
            Some("Adds two numbers.\nReturns the sum.")
        );
    }

    #[test]
    fn python_body_docstring_extracted() {
        let source = "def greet(name):\n    \"\"\"Say hello.\"\"\"\n    return name\n";
        let units = extract_str(source, "g.py", Language::Python);
        let greet = units.iter().find(|u| u.name.as_deref() == Some("greet")).expect("greet");
        assert_eq!(greet.docstring.as_deref(), Some("Say hello."));
    }

    #[test]
    fn syntax_errors_do_not_abort() {
        let units = extract_str("def broken(:\n  ???\n", "b.py", Language::Python);
        assert!(!units.is_empty());
        assert_eq!(units[0].unit_type, UnitKind::File);
    }

    #[test]
    fn async_detection() {
        let source = "export async function load() {}\n";
        let units = extract_str(source, "l.ts", Language::TypeScript);
        let load = units.iter().find(|u| u.name.as_deref() == Some("load")).expect("load");
        assert!(load.metadata.is_async);
    }

    #[test]
    fn python_decorators_recorded() {
        let source = "@app.route('/x')\ndef handler():\n    pass\n";
        let units = extract_str(source, "r.py", Language::Python);
        let handler = units
            .iter()
            .find(|u| u.name.as_deref() == Some("handler"))
            .expect("handler");
        assert!(!handler.metadata.decorators.is_empty());
    }

    #[test]
    fn imports_used_matches_unit_bodies() {
        let source = "import { helper } from './helper';\n\nexport function uses() { return helper(); }\nexport function skips() { return 1; }\n";
        let units = extract_str(source, "u.ts", Language::TypeScript);
        let uses = units.iter().find(|u| u.name.as_deref() == Some("uses")).expect("uses");
        assert!(uses.metadata.imports_used.iter().any(|i| i == "helper"));
        let skips = units.iter().find(|u| u.name.as_deref() == Some("skips")).expect("skips");
        assert!(!skips.metadata.imports_used.iter().any(|i| i == "helper"));
    }
}
