//! The standard document extractors, one per internally sourced type.
//!
//! Each extractor turns `{file_content, language, code_units, prior_docs}`
//! into zero or more typed documents. LLM-backed extractors validate the
//! model output as JSON; a response that fails validation is an
//! `InvalidResponse` counted against the item.

use std::path::Path;

use serde::Deserialize;

use crate::enrich::{DocExtractor, ExtractionInput};
use crate::error::{QuarryError, QuarryResult};
use crate::llm::{complete_json, ChatMessage, CompletionOptions, Llm};
use crate::types::{
    now_ms, CodeUnit, Document, DocumentPayload, DocumentType, ParameterDoc, SymbolKind, UnitKind,
};

/// The standard extractor set for internally sourced document types.
pub fn standard_set() -> Vec<Box<dyn DocExtractor>> {
    vec![
        Box::new(ChunkExtractor),
        Box::new(FileSummaryExtractor),
        Box::new(SymbolSummaryExtractor),
        Box::new(IdiomExtractor),
        Box::new(UsageExampleExtractor),
        Box::new(AntiPatternExtractor),
        Box::new(ProjectDocExtractor),
    ]
}

const CONTENT_EXCERPT_CHARS: usize = 6000;
const MAX_SYMBOLS_PER_FILE: usize = 20;
const MAX_USAGE_EXAMPLES: usize = 3;

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn make_doc(
    ty: DocumentType,
    input: &ExtractionInput<'_>,
    name: Option<&str>,
    content: String,
    source_ids: Vec<String>,
    payload: DocumentPayload,
    enriched: bool,
) -> Document {
    let path = path_str(input.file_path);
    let now = now_ms();
    Document {
        id: Document::make_id(ty, &path, name, &content),
        document_type: ty,
        file_path: input.file_path.to_path_buf(),
        file_hash: input.file_hash.to_string(),
        content,
        source_ids,
        created_at: now,
        enriched_at: enriched.then_some(now),
        vector: None,
        payload,
    }
}

/// Clip text to a char boundary at or below `max` bytes.
fn excerpt(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn file_unit_id(input: &ExtractionInput<'_>) -> Vec<String> {
    input
        .code_units
        .iter()
        .filter(|u| u.unit_type == UnitKind::File)
        .map(|u| u.id.clone())
        .collect()
}

fn symbol_units<'a>(input: &'a ExtractionInput<'_>) -> Vec<&'a CodeUnit> {
    input
        .code_units
        .iter()
        .filter(|u| u.name.is_some() && SymbolKind::from_unit_kind(u.unit_type).is_some())
        .take(MAX_SYMBOLS_PER_FILE)
        .collect()
}

fn prior_content(input: &ExtractionInput<'_>, ty: DocumentType) -> String {
    input
        .prior_docs
        .iter()
        .filter(|d| d.document_type == ty)
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// code_chunk
// ---------------------------------------------------------------------------

/// Raw code chunks lifted straight from the unit hierarchy; no LLM.
pub struct ChunkExtractor;

/// Build code-chunk documents for a file's unit hierarchy.
///
/// Also used directly by the ingestion pipeline, which indexes chunks
/// whether or not LLM enrichment is enabled.
pub fn chunk_documents(input: &ExtractionInput<'_>) -> Vec<Document> {
    let mut units: Vec<&CodeUnit> = input
        .code_units
        .iter()
        .filter(|u| u.unit_type != UnitKind::File)
        .collect();
    // A file with no extractable structure still gets one chunk so
    // keyword and vector search can reach its content.
    if units.is_empty() {
        units = input
            .code_units
            .iter()
            .filter(|u| u.unit_type == UnitKind::File)
            .collect();
    }

    let parent_names: std::collections::HashMap<&str, &str> = input
        .code_units
        .iter()
        .filter_map(|u| u.name.as_deref().map(|n| (u.id.as_str(), n)))
        .collect();

    units
        .into_iter()
        .map(|unit| {
            let parent_name = unit
                .parent_id
                .as_deref()
                .and_then(|p| parent_names.get(p))
                .map(|s| (*s).to_string());
            make_doc(
                DocumentType::CodeChunk,
                input,
                unit.name.as_deref(),
                unit.content.clone(),
                vec![unit.id.clone()],
                DocumentPayload::CodeChunk {
                    start_line: unit.start_line,
                    end_line: unit.end_line,
                    chunk_type: unit.unit_type,
                    name: unit.name.clone(),
                    parent_name,
                    signature: (!unit.signature.is_empty()).then(|| unit.signature.clone()),
                },
                false,
            )
        })
        .collect()
}

impl DocExtractor for ChunkExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::CodeChunk
    }

    fn extract(&self, _llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        Ok(chunk_documents(input))
    }
}

// ---------------------------------------------------------------------------
// file_summary
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FileSummaryJson {
    summary: String,
    #[serde(default)]
    responsibilities: Vec<String>,
    #[serde(default)]
    exports: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchFileSummaryJson {
    path: String,
    #[serde(flatten)]
    summary: FileSummaryJson,
}

/// Whole-file summaries; supports cross-file batching.
pub struct FileSummaryExtractor;

impl FileSummaryExtractor {
    fn doc_from(
        &self,
        input: &ExtractionInput<'_>,
        parsed: FileSummaryJson,
    ) -> Document {
        let content = if parsed.responsibilities.is_empty() {
            parsed.summary.clone()
        } else {
            format!("{}\n{}", parsed.summary, parsed.responsibilities.join("; "))
        };
        make_doc(
            DocumentType::FileSummary,
            input,
            None,
            content,
            file_unit_id(input),
            DocumentPayload::FileSummary {
                summary: parsed.summary,
                responsibilities: parsed.responsibilities,
                exports: parsed.exports,
                dependencies: parsed.dependencies,
                patterns: parsed.patterns,
                language: input.language.as_str().to_string(),
            },
            true,
        )
    }
}

impl DocExtractor for FileSummaryExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::FileSummary
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        let prompt = format!(
            "Summarise this {} file for a code-search index.\n\
             Respond with JSON: {{\"summary\", \"responsibilities\", \"exports\", \
             \"dependencies\", \"patterns\"}}.\n\nFile: {}\n```\n{}\n```",
            input.language,
            input.file_path.display(),
            excerpt(input.file_content, CONTENT_EXCERPT_CHARS),
        );
        let parsed: FileSummaryJson = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        Ok(vec![self.doc_from(input, parsed)])
    }

    fn extract_batch(
        &self,
        llm: &dyn Llm,
        inputs: &[&ExtractionInput<'_>],
    ) -> QuarryResult<Vec<Vec<Document>>> {
        let mut prompt = String::from(
            "Summarise each file for a code-search index. Respond with a JSON array; \
             one object per file with keys: \"path\", \"summary\", \"responsibilities\", \
             \"exports\", \"dependencies\", \"patterns\".\n",
        );
        for input in inputs {
            prompt.push_str(&format!(
                "\nFile: {}\n```\n{}\n```\n",
                input.file_path.display(),
                excerpt(input.file_content, CONTENT_EXCERPT_CHARS / inputs.len().max(1)),
            ));
        }
        let parsed: Vec<BatchFileSummaryJson> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;

        inputs
            .iter()
            .map(|input| {
                let key = path_str(input.file_path);
                let entry = parsed
                    .iter()
                    .find(|e| e.path == key)
                    .ok_or_else(|| QuarryError::InvalidResponse {
                        message: format!("batch response missing file {key}"),
                    })?;
                let summary = FileSummaryJson {
                    summary: entry.summary.summary.clone(),
                    responsibilities: entry.summary.responsibilities.clone(),
                    exports: entry.summary.exports.clone(),
                    dependencies: entry.summary.dependencies.clone(),
                    patterns: entry.summary.patterns.clone(),
                };
                Ok(vec![self.doc_from(input, summary)])
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// symbol_summary
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
struct SymbolSummaryJson {
    symbol_name: String,
    #[serde(default)]
    symbol_type: String,
    summary: String,
    #[serde(default)]
    parameters: Vec<ParameterJson>,
    #[serde(default)]
    return_description: Option<String>,
    #[serde(default)]
    side_effects: Vec<String>,
    #[serde(default)]
    usage_context: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct ParameterJson {
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct BatchSymbolSummaryJson {
    path: String,
    symbols: Vec<SymbolSummaryJson>,
}

/// Per-symbol summaries; one LLM call covers all symbols of a file, and
/// batching packs several files into one call.
pub struct SymbolSummaryExtractor;

impl SymbolSummaryExtractor {
    fn docs_from(
        &self,
        input: &ExtractionInput<'_>,
        entries: Vec<SymbolSummaryJson>,
    ) -> Vec<Document> {
        let units = symbol_units(input);
        entries
            .into_iter()
            .filter_map(|entry| {
                let unit = units
                    .iter()
                    .find(|u| u.name.as_deref() == Some(entry.symbol_name.as_str()))?;
                let content = format!("{}: {}", entry.symbol_name, entry.summary);
                Some(make_doc(
                    DocumentType::SymbolSummary,
                    input,
                    Some(&entry.symbol_name.clone()),
                    content,
                    vec![unit.id.clone()],
                    DocumentPayload::SymbolSummary {
                        symbol_name: entry.symbol_name,
                        symbol_type: if entry.symbol_type.is_empty() {
                            unit.unit_type.as_str().to_string()
                        } else {
                            entry.symbol_type
                        },
                        summary: entry.summary,
                        parameters: entry
                            .parameters
                            .into_iter()
                            .map(|p| ParameterDoc { name: p.name, description: p.description })
                            .collect(),
                        return_description: entry.return_description,
                        side_effects: entry.side_effects,
                        usage_context: entry.usage_context,
                    },
                    true,
                ))
            })
            .collect()
    }

    fn file_section(input: &ExtractionInput<'_>) -> String {
        let mut section = format!("File: {}\n", input.file_path.display());
        for unit in symbol_units(input) {
            section.push_str(&format!(
                "- {} {} (lines {}-{}): {}\n",
                unit.unit_type.as_str(),
                unit.name.as_deref().unwrap_or("?"),
                unit.start_line,
                unit.end_line,
                excerpt(&unit.signature, 200),
            ));
        }
        section
    }
}

impl DocExtractor for SymbolSummaryExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::SymbolSummary
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        if symbol_units(input).is_empty() {
            return Ok(Vec::new());
        }
        let prompt = format!(
            "Summarise each symbol below. Respond with a JSON array; one object per \
             symbol with keys: \"symbol_name\", \"symbol_type\", \"summary\", \
             \"parameters\" (name/description pairs), \"return_description\", \
             \"side_effects\", \"usage_context\".\n\n{}\nSource:\n```\n{}\n```",
            Self::file_section(input),
            excerpt(input.file_content, CONTENT_EXCERPT_CHARS),
        );
        let entries: Vec<SymbolSummaryJson> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        Ok(self.docs_from(input, entries))
    }

    fn extract_batch(
        &self,
        llm: &dyn Llm,
        inputs: &[&ExtractionInput<'_>],
    ) -> QuarryResult<Vec<Vec<Document>>> {
        let mut prompt = String::from(
            "Summarise the symbols of each file. Respond with a JSON array; one object \
             per file with keys \"path\" and \"symbols\" (array of objects with \
             \"symbol_name\", \"symbol_type\", \"summary\", \"parameters\", \
             \"return_description\", \"side_effects\", \"usage_context\").\n",
        );
        for input in inputs {
            prompt.push('\n');
            prompt.push_str(&Self::file_section(input));
        }
        let parsed: Vec<BatchSymbolSummaryJson> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;

        inputs
            .iter()
            .map(|input| {
                let key = path_str(input.file_path);
                let entry = parsed
                    .iter()
                    .find(|e| e.path == key)
                    .ok_or_else(|| QuarryError::InvalidResponse {
                        message: format!("batch response missing file {key}"),
                    })?;
                Ok(self.docs_from(input, entry.symbols.clone()))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// idiom
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IdiomJson {
    title: String,
    description: String,
}

/// Recurring project idioms, grounded in the file summary.
pub struct IdiomExtractor;

impl DocExtractor for IdiomExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::Idiom
    }

    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        let prompt = format!(
            "Identify up to 3 recurring idioms in this file (naming schemes, error \
             handling habits, structural conventions). Respond with a JSON array of \
             {{\"title\", \"description\"}}.\n\nFile summary:\n{}\n\nSource:\n```\n{}\n```",
            prior_content(input, DocumentType::FileSummary),
            excerpt(input.file_content, CONTENT_EXCERPT_CHARS),
        );
        let entries: Vec<IdiomJson> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let content = format!("{}: {}", e.title, e.description);
                make_doc(
                    DocumentType::Idiom,
                    input,
                    Some(&e.title.clone()),
                    content,
                    file_unit_id(input),
                    DocumentPayload::Idiom { title: e.title, description: e.description },
                    true,
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// usage_example
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct UsageExampleJson {
    symbol_name: String,
    scenario: String,
    example: String,
}

/// Worked usage examples for the file's most prominent symbols.
pub struct UsageExampleExtractor;

impl DocExtractor for UsageExampleExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::UsageExample
    }

    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        let units = symbol_units(input);
        if units.is_empty() {
            return Ok(Vec::new());
        }
        let names: Vec<&str> = units
            .iter()
            .filter_map(|u| u.name.as_deref())
            .take(MAX_USAGE_EXAMPLES)
            .collect();
        let prompt = format!(
            "Write one short usage example for each of these symbols: {}. Use the \
             summaries for context. Respond with a JSON array of {{\"symbol_name\", \
             \"scenario\", \"example\"}}.\n\nSymbol summaries:\n{}\n",
            names.join(", "),
            prior_content(input, DocumentType::SymbolSummary),
        );
        let entries: Vec<UsageExampleJson> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let unit = units
                    .iter()
                    .find(|u| u.name.as_deref() == Some(e.symbol_name.as_str()))?;
                let content = format!("{}\n{}", e.scenario, e.example);
                Some(make_doc(
                    DocumentType::UsageExample,
                    input,
                    Some(&e.symbol_name.clone()),
                    content,
                    vec![unit.id.clone()],
                    DocumentPayload::UsageExample {
                        symbol_name: e.symbol_name,
                        scenario: e.scenario,
                    },
                    true,
                ))
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// anti_pattern
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AntiPatternJson {
    title: String,
    description: String,
    #[serde(default)]
    remedy: String,
}

/// Anti-patterns worth steering new code away from.
pub struct AntiPatternExtractor;

impl DocExtractor for AntiPatternExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::AntiPattern
    }

    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        let prompt = format!(
            "List up to 2 anti-patterns in this file, if any. Respond with a JSON \
             array of {{\"title\", \"description\", \"remedy\"}}; an empty array is a \
             valid answer.\n\nSource:\n```\n{}\n```",
            excerpt(input.file_content, CONTENT_EXCERPT_CHARS),
        );
        let entries: Vec<AntiPatternJson> = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        Ok(entries
            .into_iter()
            .map(|e| {
                let content = format!("{}: {} Remedy: {}", e.title, e.description, e.remedy);
                make_doc(
                    DocumentType::AntiPattern,
                    input,
                    Some(&e.title.clone()),
                    content,
                    file_unit_id(input),
                    DocumentPayload::AntiPattern { title: e.title, remedy: e.remedy },
                    true,
                )
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// project_doc
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProjectDocJson {
    title: String,
    #[serde(default)]
    topics: Vec<String>,
    body: String,
}

/// Project-level documentation synthesized from summaries and idioms.
pub struct ProjectDocExtractor;

impl DocExtractor for ProjectDocExtractor {
    fn document_type(&self) -> DocumentType {
        DocumentType::ProjectDoc
    }

    fn extract(&self, llm: &dyn Llm, input: &ExtractionInput<'_>) -> QuarryResult<Vec<Document>> {
        let summaries = prior_content(input, DocumentType::FileSummary);
        let idioms = prior_content(input, DocumentType::Idiom);
        if summaries.is_empty() && idioms.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = format!(
            "Write a short project-doc entry covering what this file contributes to \
             the project, based on its summary and idioms. Respond with JSON: \
             {{\"title\", \"topics\", \"body\"}}.\n\nSummary:\n{summaries}\n\nIdioms:\n{idioms}\n",
        );
        let parsed: ProjectDocJson = complete_json(
            llm,
            &[ChatMessage::user(prompt)],
            &CompletionOptions::default(),
        )?;
        let content = format!("{}\n{}", parsed.title, parsed.body);
        Ok(vec![make_doc(
            DocumentType::ProjectDoc,
            input,
            Some(&parsed.title.clone()),
            content,
            file_unit_id(input),
            DocumentPayload::ProjectDoc { title: parsed.title, topics: parsed.topics },
            true,
        )])
    }
}
