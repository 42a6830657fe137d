//! Core domain types shared across all quarry-core subsystems.
//!
//! These types form the API contract between modules. Changing them
//! requires updating all consumers, so they should be stable and minimal.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Language
// ---------------------------------------------------------------------------

/// Supported source languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// TypeScript (.ts, .tsx)
    TypeScript,
    /// JavaScript (.js, .jsx, .mjs, .cjs)
    JavaScript,
    /// Python (.py)
    Python,
    /// Go (.go)
    Go,
    /// Rust (.rs)
    Rust,
    /// Java (.java)
    Java,
    /// C (.c, .h)
    C,
    /// C++ (.cpp, .cc, .cxx, .hpp)
    Cpp,
}

impl Language {
    /// Detect language from a file extension (without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "ts" | "tsx" => Some(Self::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "py" => Some(Self::Python),
            "go" => Some(Self::Go),
            "rs" => Some(Self::Rust),
            "java" => Some(Self::Java),
            "c" | "h" => Some(Self::C),
            "cpp" | "cc" | "cxx" | "hpp" => Some(Self::Cpp),
            _ => None,
        }
    }

    /// Returns the language identifier string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypeScript => "typescript",
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
        }
    }

    /// Parse from a stored identifier string.
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "typescript" => Some(Self::TypeScript),
            "javascript" => Some(Self::JavaScript),
            "python" => Some(Self::Python),
            "go" => Some(Self::Go),
            "rust" => Some(Self::Rust),
            "java" => Some(Self::Java),
            "c" => Some(Self::C),
            "cpp" => Some(Self::Cpp),
            _ => None,
        }
    }

    /// All file extensions mapped to this language.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::TypeScript => &["ts", "tsx"],
            Self::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Self::Python => &["py"],
            Self::Go => &["go"],
            Self::Rust => &["rs"],
            Self::Java => &["java"],
            Self::C => &["c", "h"],
            Self::Cpp => &["cpp", "cc", "cxx", "hpp"],
        }
    }

    /// All supported languages.
    pub fn all() -> &'static [Language] {
        &[
            Self::TypeScript,
            Self::JavaScript,
            Self::Python,
            Self::Go,
            Self::Rust,
            Self::Java,
            Self::C,
            Self::Cpp,
        ]
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Code units
// ---------------------------------------------------------------------------

/// The kind of syntactic region a code unit represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// The whole-file root unit, always at depth 0.
    File,
    /// Module or namespace declaration.
    Module,
    /// Class definition.
    Class,
    /// Interface or protocol definition.
    Interface,
    /// Type alias.
    Type,
    /// Enum definition.
    Enum,
    /// Trait definition.
    Trait,
    /// Implementation block.
    Impl,
    /// Free function.
    Function,
    /// Method inside a class, struct, or impl.
    Method,
    /// Struct definition.
    Struct,
    /// Anonymous block or closure.
    Block,
}

impl UnitKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Module => "module",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Enum => "enum",
            Self::Trait => "trait",
            Self::Impl => "impl",
            Self::Function => "function",
            Self::Method => "method",
            Self::Struct => "struct",
            Self::Block => "block",
        }
    }

    /// Parse from database string, defaulting to `Block` for unknowns.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "file" => Self::File,
            "module" => Self::Module,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "type" => Self::Type,
            "enum" => Self::Enum,
            "trait" => Self::Trait,
            "impl" => Self::Impl,
            "function" => Self::Function,
            "method" => Self::Method,
            "struct" => Self::Struct,
            _ => Self::Block,
        }
    }

    /// Whether units of this kind participate in the reference graph.
    pub fn is_symbol(&self) -> bool {
        !matches!(self, Self::File | Self::Module | Self::Block)
    }
}

/// Visibility of a code unit or symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Accessible from outside the defining module.
    Public,
    /// Accessible from subclasses or by convention (single underscore).
    Protected,
    /// Accessible only within the defining scope.
    Private,
}

impl Visibility {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Protected => "protected",
            Self::Private => "private",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "public" => Self::Public,
            "protected" => Self::Protected,
            _ => Self::Private,
        }
    }
}

/// Per-unit metadata extracted alongside the syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitMetadata {
    /// Whether the unit is declared async.
    pub is_async: bool,
    /// Whether the unit is exported from its module.
    pub is_exported: bool,
    /// Visibility classification.
    pub visibility: Visibility,
    /// Decorator / attribute names attached to the unit.
    pub decorators: Vec<String>,
    /// Imported names referenced inside the unit body.
    pub imports_used: Vec<String>,
}

impl Default for UnitMetadata {
    fn default() -> Self {
        Self {
            is_async: false,
            is_exported: false,
            visibility: Visibility::Private,
            decorators: Vec::new(),
            imports_used: Vec::new(),
        }
    }
}

/// A tree-sitter-identified syntactic region promoted to a first-class entity.
///
/// Units form a hierarchy per file: the `file` unit at depth 0 contains all
/// others, a class at depth 1 contains its methods at depth 2, and so on.
/// Depth is computed from the enclosing *emitted* unit, not the raw AST
/// parent, so wrapper nodes like `class_body` never add a level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Stable 16-hex digest over `(file_path, name, unit_type, start_line)`.
    pub id: String,
    /// What kind of syntactic region this is.
    pub unit_type: UnitKind,
    /// Name of the unit; `None` for anonymous closures/blocks.
    pub name: Option<String>,
    /// Path of the containing file, relative to the project root.
    pub file_path: PathBuf,
    /// Content hash of the file at extraction time.
    pub file_hash: String,
    /// Starting line (1-indexed).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// Id of the enclosing emitted unit; `None` only for the file unit.
    pub parent_id: Option<String>,
    /// Nesting depth; the file unit is 0 and children are parent + 1.
    pub depth: u32,
    /// Source language.
    pub language: Language,
    /// The exact source substring of this unit.
    pub content: String,
    /// One-line declaration with the body removed.
    pub signature: String,
    /// Leading comment block, stripped of comment markers.
    pub docstring: Option<String>,
    /// Extracted flags and annotations.
    pub metadata: UnitMetadata,
}

impl CodeUnit {
    /// Compute the stable id for a unit.
    pub fn make_id(file_path: &str, name: Option<&str>, kind: UnitKind, start_line: u32) -> String {
        short_hash(&[
            file_path,
            name.unwrap_or(""),
            kind.as_str(),
            &start_line.to_string(),
        ])
    }
}

// ---------------------------------------------------------------------------
// Symbols and references
// ---------------------------------------------------------------------------

/// The kind of a symbol participating in the reference graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    /// Free function.
    Function,
    /// Method on a class/struct/impl.
    Method,
    /// Class definition.
    Class,
    /// Interface definition.
    Interface,
    /// Type alias.
    Type,
    /// Enum definition.
    Enum,
    /// Struct definition.
    Struct,
    /// Trait definition.
    Trait,
    /// Impl block.
    Impl,
}

impl SymbolKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Enum => "enum",
            Self::Struct => "struct",
            Self::Trait => "trait",
            Self::Impl => "impl",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "method" => Self::Method,
            "class" => Self::Class,
            "interface" => Self::Interface,
            "type" => Self::Type,
            "enum" => Self::Enum,
            "struct" => Self::Struct,
            "trait" => Self::Trait,
            "impl" => Self::Impl,
            _ => Self::Function,
        }
    }

    /// Map a unit kind to its symbol kind, if it has one.
    pub fn from_unit_kind(kind: UnitKind) -> Option<Self> {
        match kind {
            UnitKind::Function => Some(Self::Function),
            UnitKind::Method => Some(Self::Method),
            UnitKind::Class => Some(Self::Class),
            UnitKind::Interface => Some(Self::Interface),
            UnitKind::Type => Some(Self::Type),
            UnitKind::Enum => Some(Self::Enum),
            UnitKind::Struct => Some(Self::Struct),
            UnitKind::Trait => Some(Self::Trait),
            UnitKind::Impl => Some(Self::Impl),
            UnitKind::File | UnitKind::Module | UnitKind::Block => None,
        }
    }
}

/// A named entity the reference graph operates on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolDefinition {
    /// Stable id, same construction as [`CodeUnit::make_id`].
    pub id: String,
    /// Kind of the symbol.
    pub kind: SymbolKind,
    /// Symbol name.
    pub name: String,
    /// Path of the defining file.
    pub file_path: PathBuf,
    /// Starting line (1-indexed).
    pub start_line: u32,
    /// Ending line (1-indexed, inclusive).
    pub end_line: u32,
    /// One-line declaration.
    pub signature: String,
    /// Leading comment block, if any.
    pub docstring: Option<String>,
    /// Enclosing class/struct id for methods.
    pub parent_id: Option<String>,
    /// Whether the symbol is exported from its module.
    pub is_exported: bool,
    /// Source language.
    pub language: Language,
    /// PageRank score; 0 until the graph has been computed.
    pub pagerank_score: f64,
    /// Last update timestamp (unix ms).
    pub updated_at: i64,
}

/// The kind of relationship a reference expresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefKind {
    /// Function or method call.
    Call,
    /// Type used in a signature, annotation, or declaration.
    TypeUsage,
    /// Import of a module or name.
    Import,
    /// Class inheritance.
    Extends,
    /// Interface/trait implementation.
    Implements,
    /// Field or property access.
    FieldAccess,
}

impl RefKind {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::TypeUsage => "type_usage",
            Self::Import => "import",
            Self::Extends => "extends",
            Self::Implements => "implements",
            Self::FieldAccess => "field_access",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "type_usage" => Self::TypeUsage,
            "import" => Self::Import,
            "extends" => Self::Extends,
            "implements" => Self::Implements,
            "field_access" => Self::FieldAccess,
            _ => Self::Call,
        }
    }
}

/// An edge candidate from one symbol toward a named target.
///
/// References start unresolved (`to_symbol_id = None`) and are resolved by
/// name lookup when the reference graph is rebuilt. At most one record
/// exists per `(from, to_name, kind)`; duplicates are merged at extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolReference {
    /// Id of the enclosing symbol at the reference site.
    pub from_symbol_id: String,
    /// Textual name of the referenced target.
    pub to_symbol_name: String,
    /// Resolved target id, once resolution has run.
    pub to_symbol_id: Option<String>,
    /// Relationship kind.
    pub kind: RefKind,
    /// File containing the reference site.
    pub file_path: PathBuf,
    /// Line of the reference site (1-indexed).
    pub line: u32,
    /// Whether `to_symbol_id` has been filled in.
    pub is_resolved: bool,
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// The closed set of indexable document types.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// Raw code chunk lifted straight from a code unit.
    CodeChunk,
    /// LLM summary of a whole file.
    FileSummary,
    /// LLM summary of a single symbol.
    SymbolSummary,
    /// Recurring project-specific idiom.
    Idiom,
    /// Worked usage example for a symbol.
    UsageExample,
    /// Anti-pattern observed in the code.
    AntiPattern,
    /// Project-level documentation synthesized from summaries.
    ProjectDoc,
    /// Externally sourced framework documentation.
    FrameworkDoc,
    /// Externally sourced best-practice note.
    BestPractice,
    /// Externally sourced API reference entry.
    ApiReference,
}

impl DocumentType {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeChunk => "code_chunk",
            Self::FileSummary => "file_summary",
            Self::SymbolSummary => "symbol_summary",
            Self::Idiom => "idiom",
            Self::UsageExample => "usage_example",
            Self::AntiPattern => "anti_pattern",
            Self::ProjectDoc => "project_doc",
            Self::FrameworkDoc => "framework_doc",
            Self::BestPractice => "best_practice",
            Self::ApiReference => "api_reference",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Option<Self> {
        match s {
            "code_chunk" => Some(Self::CodeChunk),
            "file_summary" => Some(Self::FileSummary),
            "symbol_summary" => Some(Self::SymbolSummary),
            "idiom" => Some(Self::Idiom),
            "usage_example" => Some(Self::UsageExample),
            "anti_pattern" => Some(Self::AntiPattern),
            "project_doc" => Some(Self::ProjectDoc),
            "framework_doc" => Some(Self::FrameworkDoc),
            "best_practice" => Some(Self::BestPractice),
            "api_reference" => Some(Self::ApiReference),
            _ => None,
        }
    }

    /// Document types this type depends on for extraction ordering.
    ///
    /// Externally sourced types have no internal dependencies. The graph
    /// must stay acyclic; the enrichment orchestrator topologically sorts it.
    pub fn dependencies(&self) -> &'static [DocumentType] {
        match self {
            Self::CodeChunk => &[],
            Self::FileSummary => &[Self::CodeChunk],
            Self::SymbolSummary => &[Self::CodeChunk],
            Self::Idiom => &[Self::CodeChunk, Self::FileSummary],
            Self::UsageExample => &[Self::CodeChunk, Self::SymbolSummary],
            Self::AntiPattern => &[Self::CodeChunk],
            Self::ProjectDoc => &[Self::FileSummary, Self::Idiom],
            Self::FrameworkDoc | Self::BestPractice | Self::ApiReference => &[],
        }
    }

    /// Default static ranking weight for this type.
    pub fn default_weight(&self) -> f64 {
        match self {
            Self::CodeChunk => 0.25,
            Self::SymbolSummary => 0.15,
            Self::FileSummary => 0.12,
            Self::Idiom => 0.12,
            Self::FrameworkDoc => 0.10,
            Self::UsageExample => 0.08,
            Self::ProjectDoc => 0.05,
            Self::BestPractice => 0.05,
            Self::ApiReference => 0.05,
            Self::AntiPattern => 0.03,
        }
    }

    /// All document types, in dependency-friendly declaration order.
    pub fn all() -> &'static [DocumentType] {
        &[
            Self::CodeChunk,
            Self::FileSummary,
            Self::SymbolSummary,
            Self::Idiom,
            Self::UsageExample,
            Self::AntiPattern,
            Self::ProjectDoc,
            Self::FrameworkDoc,
            Self::BestPractice,
            Self::ApiReference,
        ]
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Documentation for one parameter in a symbol summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDoc {
    /// Parameter name.
    pub name: String,
    /// One-line description.
    pub description: String,
}

/// Type-specific structured payload carried by a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentPayload {
    /// Raw code chunk fields.
    CodeChunk {
        /// Starting line of the chunk (1-indexed).
        start_line: u32,
        /// Ending line of the chunk (1-indexed, inclusive).
        end_line: u32,
        /// Kind of the source unit.
        chunk_type: UnitKind,
        /// Name of the source unit, if any.
        name: Option<String>,
        /// Name of the enclosing unit, if any.
        parent_name: Option<String>,
        /// One-line declaration of the source unit.
        signature: Option<String>,
    },
    /// Whole-file summary fields.
    FileSummary {
        /// Narrative summary of the file.
        summary: String,
        /// Key responsibilities the file carries.
        responsibilities: Vec<String>,
        /// Exported names.
        exports: Vec<String>,
        /// External dependencies used.
        dependencies: Vec<String>,
        /// Notable patterns observed.
        patterns: Vec<String>,
        /// Source language identifier.
        language: String,
    },
    /// Single-symbol summary fields.
    SymbolSummary {
        /// Name of the summarised symbol.
        symbol_name: String,
        /// Kind of the summarised symbol.
        symbol_type: String,
        /// Narrative summary.
        summary: String,
        /// Parameter documentation.
        parameters: Vec<ParameterDoc>,
        /// Return value description.
        return_description: Option<String>,
        /// Observed side effects.
        side_effects: Vec<String>,
        /// Where and when the symbol is typically used.
        usage_context: Option<String>,
    },
    /// Recurring idiom fields.
    Idiom {
        /// Short idiom title.
        title: String,
        /// When and why the idiom is applied.
        description: String,
    },
    /// Usage example fields.
    UsageExample {
        /// Symbol the example demonstrates.
        symbol_name: String,
        /// Scenario description.
        scenario: String,
    },
    /// Anti-pattern fields.
    AntiPattern {
        /// Short anti-pattern title.
        title: String,
        /// What to do instead.
        remedy: String,
    },
    /// Project documentation fields.
    ProjectDoc {
        /// Document title.
        title: String,
        /// Topics covered.
        topics: Vec<String>,
    },
    /// Externally sourced documentation fields (framework docs,
    /// best practices, API references).
    External {
        /// Origin of the material.
        source: String,
        /// Topic the entry covers.
        topic: String,
    },
}

/// A typed indexable record: a raw code chunk or an enrichment document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable 16-hex digest over `(type, path, name?, content)`.
    pub id: String,
    /// Which of the closed document types this is.
    pub document_type: DocumentType,
    /// File the document derives from.
    pub file_path: PathBuf,
    /// Content hash of that file at derivation time.
    pub file_hash: String,
    /// The text that gets embedded and BM25-indexed.
    pub content: String,
    /// Ids of the code units this document was derived from.
    pub source_ids: Vec<String>,
    /// Creation timestamp (unix ms).
    pub created_at: i64,
    /// Enrichment timestamp (unix ms), if the document came from an LLM.
    pub enriched_at: Option<i64>,
    /// Dense embedding vector, once embedded.
    pub vector: Option<Vec<f32>>,
    /// Type-specific structured fields.
    pub payload: DocumentPayload,
}

impl Document {
    /// Compute the stable document id: `sha256(type ∥ path ∥ name? ∥ content)[:16]`.
    pub fn make_id(
        doc_type: DocumentType,
        file_path: &str,
        name: Option<&str>,
        content: &str,
    ) -> String {
        short_hash(&[doc_type.as_str(), file_path, name.unwrap_or(""), content])
    }
}

// ---------------------------------------------------------------------------
// File state
// ---------------------------------------------------------------------------

/// Per-type enrichment progress for a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    /// Not yet attempted (or reset by a file change).
    Pending,
    /// An extraction is currently running.
    InProgress,
    /// Every item of this type succeeded.
    Complete,
    /// At least one item failed; carries the error text.
    Failed(String),
}

impl EnrichmentStatus {
    /// Whether this status still requires enrichment work.
    pub fn needs_enrichment(&self) -> bool {
        !matches!(self, Self::Complete)
    }
}

/// Durable per-file state owned by the file tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    /// Path relative to the project root.
    pub path: PathBuf,
    /// SHA-256 of the file content at last index.
    pub content_hash: String,
    /// Modification time at last index (unix ms).
    pub mtime_ms: i64,
    /// Ids of the documents/chunks owned by this file.
    pub chunk_ids: Vec<String>,
    /// When the file was last indexed (unix ms).
    pub indexed_at: i64,
    /// Per-document-type enrichment progress.
    pub enrichment_state: BTreeMap<DocumentType, EnrichmentStatus>,
}

// ---------------------------------------------------------------------------
// Learned weights
// ---------------------------------------------------------------------------

/// Retrieval preset a set of learned weights applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseCase {
    /// Fill-in-the-middle completion context.
    Fim,
    /// Interactive search.
    Search,
    /// Code navigation.
    Navigation,
}

impl UseCase {
    /// Convert to database string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fim => "fim",
            Self::Search => "search",
            Self::Navigation => "navigation",
        }
    }

    /// Parse from database string.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "fim" => Self::Fim,
            "navigation" => Self::Navigation,
            _ => Self::Search,
        }
    }
}

/// Per-use-case learned ranking parameters, blended with static defaults
/// once enough feedback has accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedWeights {
    /// Weight of the dense-vector channel.
    pub vector_weight: f64,
    /// Weight of the BM25 channel.
    pub bm25_weight: f64,
    /// Per-document-type multipliers.
    pub document_type_weights: BTreeMap<DocumentType, f64>,
    /// Per-file boost factors learned from feedback.
    pub file_boosts: BTreeMap<PathBuf, f64>,
    /// Query-pattern adjustments.
    pub query_patterns: BTreeMap<String, f64>,
    /// Number of feedback events recorded.
    pub feedback_count: u64,
    /// Blend confidence in `[0, 1]`.
    pub confidence: f64,
    /// Last update timestamp (unix ms).
    pub last_updated: i64,
}

impl LearnedWeights {
    /// Static defaults: RRF weights 0.6/0.4 and the glossary type weights.
    pub fn defaults() -> Self {
        let document_type_weights = DocumentType::all()
            .iter()
            .map(|t| (*t, t.default_weight()))
            .collect();
        Self {
            vector_weight: 0.6,
            bm25_weight: 0.4,
            document_type_weights,
            file_boosts: BTreeMap::new(),
            query_patterns: BTreeMap::new(),
            feedback_count: 0,
            confidence: 0.0,
            last_updated: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current wall-clock time in unix milliseconds.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// 16-hex SHA-256 digest over NUL-joined parts.
pub(crate) fn short_hash(parts: &[&str]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_is_stable_and_16_hex() {
        let a = CodeUnit::make_id("src/a.ts", Some("foo"), UnitKind::Function, 3);
        let b = CodeUnit::make_id("src/a.ts", Some("foo"), UnitKind::Function, 3);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let c = CodeUnit::make_id("src/a.ts", Some("foo"), UnitKind::Function, 4);
        assert_ne!(a, c);
    }

    #[test]
    fn unit_id_distinguishes_nameless() {
        // NUL joining keeps ("ab", "c") distinct from ("a", "bc").
        let a = CodeUnit::make_id("a", Some("bc"), UnitKind::Block, 1);
        let b = CodeUnit::make_id("ab", Some("c"), UnitKind::Block, 1);
        assert_ne!(a, b);
    }

    #[test]
    fn document_type_dependencies_are_acyclic() {
        // Walk the declared dependency edges; a cycle would loop forever,
        // so bound the walk by the type count.
        for ty in DocumentType::all() {
            let mut frontier = vec![*ty];
            for _ in 0..DocumentType::all().len() {
                frontier = frontier
                    .iter()
                    .flat_map(|t| t.dependencies().iter().copied())
                    .collect();
                assert!(
                    !frontier.contains(ty),
                    "cycle through {ty}"
                );
            }
        }
    }

    #[test]
    fn default_type_weights_match_table() {
        assert_eq!(DocumentType::CodeChunk.default_weight(), 0.25);
        assert_eq!(DocumentType::SymbolSummary.default_weight(), 0.15);
        assert_eq!(DocumentType::AntiPattern.default_weight(), 0.03);
    }

    #[test]
    fn language_extension_roundtrip() {
        for lang in Language::all() {
            for ext in lang.extensions() {
                assert_eq!(Language::from_extension(ext), Some(*lang));
            }
        }
        assert_eq!(Language::from_extension("xyz"), None);
    }

    #[test]
    fn enrichment_status_completeness() {
        assert!(EnrichmentStatus::Pending.needs_enrichment());
        assert!(EnrichmentStatus::Failed("boom".into()).needs_enrichment());
        assert!(!EnrichmentStatus::Complete.needs_enrichment());
    }
}
