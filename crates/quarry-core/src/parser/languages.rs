//! Per-language grammar wiring: node-kind tables, comment markers, and
//! the reference capture queries.
//!
//! Each supported language carries a chunk table (AST node kind to unit
//! kind) and one tree-sitter query string whose capture names encode the
//! reference kind (`call`, `type`, `import`, `extends`, `implements`,
//! `field`). Query compilation failures degrade to empty reference sets
//! rather than failing ingestion.

use crate::types::{Language, UnitKind};

/// Static description of how one language maps onto the unit model.
pub struct LanguageSpec {
    /// The language this spec describes.
    pub language: Language,
    /// AST node kinds that become code units.
    pub unit_nodes: &'static [(&'static str, UnitKind)],
    /// Node kinds whose subtree should be entered transparently
    /// (decorator wrappers, export statements).
    pub transparent_nodes: &'static [&'static str],
    /// Node kinds carrying import statements, for `imports_used`.
    pub import_nodes: &'static [&'static str],
    /// Comment node kinds (docstring collection).
    pub comment_nodes: &'static [&'static str],
    /// Line-comment markers to strip from docstrings.
    pub comment_markers: &'static [&'static str],
    /// Reference capture query source.
    pub reference_query: &'static str,
}

/// The tree-sitter grammar for a language.
pub fn grammar(language: Language) -> tree_sitter::Language {
    match language {
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::C => tree_sitter_c::LANGUAGE.into(),
        Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
    }
}

/// The spec for a language.
pub fn spec_for(language: Language) -> &'static LanguageSpec {
    match language {
        Language::TypeScript => &TYPESCRIPT,
        Language::JavaScript => &JAVASCRIPT,
        Language::Python => &PYTHON,
        Language::Go => &GO,
        Language::Rust => &RUST,
        Language::Java => &JAVA,
        Language::C => &C,
        Language::Cpp => &CPP,
    }
}

static TYPESCRIPT: LanguageSpec = LanguageSpec {
    language: Language::TypeScript,
    unit_nodes: &[
        ("function_declaration", UnitKind::Function),
        ("generator_function_declaration", UnitKind::Function),
        ("class_declaration", UnitKind::Class),
        ("abstract_class_declaration", UnitKind::Class),
        ("interface_declaration", UnitKind::Interface),
        ("type_alias_declaration", UnitKind::Type),
        ("enum_declaration", UnitKind::Enum),
        ("method_definition", UnitKind::Method),
        ("module", UnitKind::Module),
        ("internal_module", UnitKind::Module),
    ],
    transparent_nodes: &["export_statement", "ambient_declaration", "decorator"],
    import_nodes: &["import_statement"],
    comment_nodes: &["comment"],
    comment_markers: &["///", "//", "*"],
    reference_query: r#"
        (call_expression function: (identifier) @call)
        (call_expression
          function: (member_expression property: (property_identifier) @call))
        (new_expression constructor: (identifier) @type)
        (extends_clause (identifier) @extends)
        (implements_clause (type_identifier) @implements)
        (import_specifier name: (identifier) @import)
        (member_expression property: (property_identifier) @field)
        (type_identifier) @type
    "#,
};

static JAVASCRIPT: LanguageSpec = LanguageSpec {
    language: Language::JavaScript,
    unit_nodes: &[
        ("function_declaration", UnitKind::Function),
        ("generator_function_declaration", UnitKind::Function),
        ("class_declaration", UnitKind::Class),
        ("method_definition", UnitKind::Method),
    ],
    transparent_nodes: &["export_statement"],
    import_nodes: &["import_statement"],
    comment_nodes: &["comment"],
    comment_markers: &["///", "//", "*"],
    reference_query: r#"
        (call_expression function: (identifier) @call)
        (call_expression
          function: (member_expression property: (property_identifier) @call))
        (new_expression constructor: (identifier) @type)
        (class_heritage (identifier) @extends)
        (import_specifier name: (identifier) @import)
        (member_expression property: (property_identifier) @field)
    "#,
};

static PYTHON: LanguageSpec = LanguageSpec {
    language: Language::Python,
    unit_nodes: &[
        ("function_definition", UnitKind::Function),
        ("class_definition", UnitKind::Class),
    ],
    transparent_nodes: &["decorated_definition"],
    import_nodes: &["import_statement", "import_from_statement"],
    comment_nodes: &["comment"],
    comment_markers: &["#"],
    reference_query: r#"
        (call function: (identifier) @call)
        (call function: (attribute attribute: (identifier) @call))
        (class_definition
          superclasses: (argument_list (identifier) @extends))
        (import_from_statement name: (dotted_name (identifier) @import))
        (import_statement name: (dotted_name (identifier) @import))
        (attribute attribute: (identifier) @field)
    "#,
};

static GO: LanguageSpec = LanguageSpec {
    language: Language::Go,
    unit_nodes: &[
        ("function_declaration", UnitKind::Function),
        ("method_declaration", UnitKind::Method),
        ("type_spec", UnitKind::Type),
    ],
    transparent_nodes: &["type_declaration"],
    import_nodes: &["import_declaration"],
    comment_nodes: &["comment"],
    comment_markers: &["//"],
    reference_query: r#"
        (call_expression function: (identifier) @call)
        (call_expression
          function: (selector_expression field: (field_identifier) @call))
        (type_identifier) @type
        (import_spec path: (interpreted_string_literal) @import)
        (selector_expression field: (field_identifier) @field)
    "#,
};

static RUST: LanguageSpec = LanguageSpec {
    language: Language::Rust,
    unit_nodes: &[
        ("function_item", UnitKind::Function),
        ("struct_item", UnitKind::Struct),
        ("enum_item", UnitKind::Enum),
        ("trait_item", UnitKind::Trait),
        ("impl_item", UnitKind::Impl),
        ("type_item", UnitKind::Type),
        ("mod_item", UnitKind::Module),
    ],
    transparent_nodes: &["attribute_item"],
    import_nodes: &["use_declaration"],
    comment_nodes: &["line_comment", "block_comment"],
    comment_markers: &["///", "//!", "//", "*"],
    reference_query: r#"
        (call_expression function: (identifier) @call)
        (call_expression
          function: (scoped_identifier name: (identifier) @call))
        (call_expression
          function: (field_expression field: (field_identifier) @call))
        (type_identifier) @type
        (use_declaration argument: (scoped_identifier name: (identifier) @import))
        (use_declaration argument: (identifier) @import)
        (impl_item trait: (type_identifier) @implements)
        (field_expression field: (field_identifier) @field)
    "#,
};

static JAVA: LanguageSpec = LanguageSpec {
    language: Language::Java,
    unit_nodes: &[
        ("class_declaration", UnitKind::Class),
        ("interface_declaration", UnitKind::Interface),
        ("enum_declaration", UnitKind::Enum),
        ("method_declaration", UnitKind::Method),
        ("constructor_declaration", UnitKind::Method),
    ],
    transparent_nodes: &[],
    import_nodes: &["import_declaration"],
    comment_nodes: &["line_comment", "block_comment"],
    comment_markers: &["//", "*"],
    reference_query: r#"
        (method_invocation name: (identifier) @call)
        (object_creation_expression type: (type_identifier) @type)
        (superclass (type_identifier) @extends)
        (super_interfaces (type_list (type_identifier) @implements))
        (import_declaration (scoped_identifier name: (identifier) @import))
        (field_access field: (identifier) @field)
        (type_identifier) @type
    "#,
};

static C: LanguageSpec = LanguageSpec {
    language: Language::C,
    unit_nodes: &[
        ("function_definition", UnitKind::Function),
        ("struct_specifier", UnitKind::Struct),
        ("enum_specifier", UnitKind::Enum),
        ("type_definition", UnitKind::Type),
    ],
    transparent_nodes: &[],
    import_nodes: &["preproc_include"],
    comment_nodes: &["comment"],
    comment_markers: &["//", "*"],
    reference_query: r#"
        (call_expression function: (identifier) @call)
        (type_identifier) @type
        (preproc_include path: (string_literal) @import)
        (field_expression field: (field_identifier) @field)
    "#,
};

static CPP: LanguageSpec = LanguageSpec {
    language: Language::Cpp,
    unit_nodes: &[
        ("function_definition", UnitKind::Function),
        ("class_specifier", UnitKind::Class),
        ("struct_specifier", UnitKind::Struct),
        ("enum_specifier", UnitKind::Enum),
        ("type_definition", UnitKind::Type),
        ("namespace_definition", UnitKind::Module),
    ],
    transparent_nodes: &["template_declaration"],
    import_nodes: &["preproc_include"],
    comment_nodes: &["comment"],
    comment_markers: &["//", "*"],
    reference_query: r#"
        (call_expression function: (identifier) @call)
        (call_expression
          function: (qualified_identifier name: (identifier) @call))
        (type_identifier) @type
        (base_class_clause (type_identifier) @extends)
        (preproc_include path: (string_literal) @import)
        (field_expression field: (field_identifier) @field)
    "#,
};

impl LanguageSpec {
    /// Map an AST node kind to its unit kind, if it produces a unit.
    pub fn unit_kind(&self, node_kind: &str) -> Option<UnitKind> {
        self.unit_nodes
            .iter()
            .find(|(kind, _)| *kind == node_kind)
            .map(|(_, unit)| *unit)
    }

    /// Whether the walker should descend through this node without
    /// emitting a unit.
    pub fn is_transparent(&self, node_kind: &str) -> bool {
        self.transparent_nodes.contains(&node_kind)
    }

    /// Whether this node is a comment.
    pub fn is_comment(&self, node_kind: &str) -> bool {
        self.comment_nodes.contains(&node_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_language_has_a_spec() {
        for lang in Language::all() {
            let spec = spec_for(*lang);
            assert_eq!(spec.language, *lang);
            assert!(!spec.unit_nodes.is_empty());
            assert!(!spec.reference_query.trim().is_empty());
        }
    }

    #[test]
    fn reference_queries_compile() {
        for lang in Language::all() {
            let spec = spec_for(*lang);
            let result = tree_sitter::Query::new(&grammar(*lang), spec.reference_query);
            assert!(result.is_ok(), "query for {lang} failed: {result:?}");
        }
    }
}
