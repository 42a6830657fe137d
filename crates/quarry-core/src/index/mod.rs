//! Typed document index: relational rows, FTS5 keyword postings, and the
//! dense vector channel, fused with Reciprocal-Rank Fusion.
//!
//! Writes are serialised through the shared store connection; search
//! takes a read snapshot of the vector store and never raises to the
//! caller (a storage failure degrades to an empty result set).

pub mod vector;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::Glob;
use parking_lot::RwLock;

use crate::error::QuarryResult;
use crate::store::Store;
use crate::types::{Document, DocumentPayload, DocumentType, Language};
use vector::VectorStore;

/// RRF rank constant.
pub const RRF_K: f64 = 60.0;

/// Options controlling one hybrid search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Hard cap on results after fusion.
    pub limit: usize,
    /// Per-channel candidate list size (defaults to `limit`).
    pub candidate_limit: usize,
    /// Restrict to these document types.
    pub document_types: Option<Vec<DocumentType>>,
    /// Glob over file paths.
    pub path_pattern: Option<String>,
    /// Restrict to one source language.
    pub language: Option<Language>,
    /// Whether raw code chunks participate.
    pub include_code_chunks: bool,
    /// Weight of the vector channel (`bm25` gets `1 - vector`).
    pub vector_weight: f64,
    /// Per-type multipliers overriding the built-in defaults.
    pub type_weights: Option<BTreeMap<DocumentType, f64>>,
    /// Per-file boost factors (default 1.0).
    pub file_boosts: BTreeMap<PathBuf, f64>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            candidate_limit: 0,
            document_types: None,
            path_pattern: None,
            language: None,
            include_code_chunks: true,
            vector_weight: 0.6,
            type_weights: None,
            file_boosts: BTreeMap::new(),
        }
    }
}

/// One fused search hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched document (payload populated, vector omitted).
    pub document: Document,
    /// Cosine similarity from the vector channel (0 when unmatched).
    pub vector_score: f64,
    /// Keyword relevance from BM25 (0 when unmatched; higher is better).
    pub keyword_score: f64,
    /// Final fused score after type weights and file boosts.
    pub fused_score: f64,
}

/// The hybrid document index.
pub struct DocumentIndex {
    store: Arc<Store>,
    vectors: RwLock<VectorStore>,
}

impl DocumentIndex {
    /// Open the index over the shared store, with vectors at `vector_path`.
    pub fn open(store: Arc<Store>, vector_path: &Path, dimension: usize) -> QuarryResult<Self> {
        let vectors = VectorStore::open(vector_path, dimension)?;
        Ok(Self { store, vectors: RwLock::new(vectors) })
    }

    /// Open with an in-memory vector store (tests).
    pub fn in_memory(store: Arc<Store>, dimension: usize) -> Self {
        Self { store, vectors: RwLock::new(VectorStore::in_memory(dimension)) }
    }

    /// Batched upsert: rows, keyword postings, and vectors in one pass.
    pub fn insert(&self, docs: &[Document]) -> QuarryResult<()> {
        self.store.with_tx(|tx| {
            for doc in docs {
                let path = path_str(&doc.file_path);
                let language = doc
                    .file_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(Language::from_extension)
                    .map(|l| l.as_str());
                tx.execute(
                    "INSERT OR REPLACE INTO documents
                         (id, document_type, file_path, file_hash, content, source_ids,
                          created_at, enriched_at, payload, language)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    rusqlite::params![
                        doc.id,
                        doc.document_type.as_str(),
                        path,
                        doc.file_hash,
                        doc.content,
                        serde_json::to_string(&doc.source_ids)?,
                        doc.created_at,
                        doc.enriched_at,
                        serde_json::to_string(&doc.payload)?,
                        language,
                    ],
                )?;
                tx.execute("DELETE FROM documents_fts WHERE doc_id = ?1", [doc.id.as_str()])?;
                tx.execute(
                    "INSERT INTO documents_fts (content, doc_id) VALUES (?1, ?2)",
                    rusqlite::params![doc.content, doc.id],
                )?;
            }
            Ok(())
        })?;

        let mut vectors = self.vectors.write();
        for doc in docs {
            if let Some(v) = &doc.vector {
                vectors.upsert(&doc.id, v)?;
            }
        }
        Ok(())
    }

    /// Delete every document derived from a file.
    pub fn delete_by_file(&self, path: &Path) -> QuarryResult<()> {
        let ids: Vec<String> = {
            let conn = self.store.connection();
            let mut stmt = conn.prepare("SELECT id FROM documents WHERE file_path = ?1")?;
            let rows = stmt.query_map([path_str(path)], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM documents_fts WHERE doc_id IN
                     (SELECT id FROM documents WHERE file_path = ?1)",
                [path_str(path)],
            )?;
            tx.execute("DELETE FROM documents WHERE file_path = ?1", [path_str(path)])?;
            Ok(())
        })?;

        let mut vectors = self.vectors.write();
        for id in &ids {
            vectors.remove(id);
        }
        Ok(())
    }

    /// Documents for a file, optionally restricted by type.
    pub fn get_by_file(
        &self,
        path: &Path,
        types: Option<&[DocumentType]>,
    ) -> QuarryResult<Vec<Document>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT id, document_type, file_path, file_hash, content, source_ids,
                    created_at, enriched_at, payload
             FROM documents WHERE file_path = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map([path_str(path)], row_to_document)?;
        let mut docs = Vec::new();
        for row in rows {
            let doc = row?;
            if types.map_or(true, |ts| ts.contains(&doc.document_type)) {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    /// One document by id.
    pub fn get(&self, id: &str) -> QuarryResult<Option<Document>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT id, document_type, file_path, file_hash, content, source_ids,
                    created_at, enriched_at, payload
             FROM documents WHERE id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_document(row)?)),
            None => Ok(None),
        }
    }

    /// Per-type document counts.
    pub fn stats(&self) -> QuarryResult<BTreeMap<DocumentType, usize>> {
        let conn = self.store.connection();
        let mut stmt =
            conn.prepare("SELECT document_type, COUNT(*) FROM documents GROUP BY document_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut stats = BTreeMap::new();
        for row in rows {
            let (ty, count) = row?;
            if let Some(ty) = DocumentType::from_str_lossy(&ty) {
                stats.insert(ty, count as usize);
            }
        }
        Ok(stats)
    }

    /// Total document count.
    pub fn len(&self) -> QuarryResult<usize> {
        let conn = self.store.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> QuarryResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of stored vectors.
    pub fn vector_count(&self) -> usize {
        self.vectors.read().len()
    }

    /// Persist the vector side to disk.
    pub fn save_vectors(&self) -> QuarryResult<()> {
        self.vectors.read().save()
    }

    /// Hybrid search. Never errors: storage failures log and degrade to
    /// an empty result list.
    pub fn search(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        opts: &SearchOptions,
    ) -> Vec<SearchHit> {
        match self.search_inner(query_text, query_vector, opts) {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "search degraded to empty result");
                Vec::new()
            }
        }
    }

    fn search_inner(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        opts: &SearchOptions,
    ) -> QuarryResult<Vec<SearchHit>> {
        let candidates = if opts.candidate_limit > 0 {
            opts.candidate_limit
        } else {
            opts.limit
        };

        // Vector channel: rank by cosine similarity.
        let vector_hits: Vec<(String, f32)> = match query_vector {
            Some(qv) => self.vectors.read().search(qv, candidates),
            None => Vec::new(),
        };
        let vector_ranks: HashMap<&str, (usize, f32)> = vector_hits
            .iter()
            .enumerate()
            .map(|(i, (id, score))| (id.as_str(), (i + 1, *score)))
            .collect();

        // Keyword channel: FTS5 BM25, best first.
        let keyword_hits = self.keyword_search(query_text, candidates)?;
        let keyword_ranks: HashMap<&str, (usize, f64)> = keyword_hits
            .iter()
            .enumerate()
            .map(|(i, (id, score))| (id.as_str(), (i + 1, *score)))
            .collect();

        let w_vector = opts.vector_weight.clamp(0.0, 1.0);
        let w_bm25 = 1.0 - w_vector;

        let path_glob = opts
            .path_pattern
            .as_deref()
            .and_then(|p| Glob::new(p).ok())
            .map(|g| g.compile_matcher());

        let mut hits = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for id in vector_hits
            .iter()
            .map(|(id, _)| id)
            .chain(keyword_hits.iter().map(|(id, _)| id))
        {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let Some(doc) = self.get(id)? else { continue };

            if !opts.include_code_chunks && doc.document_type == DocumentType::CodeChunk {
                continue;
            }
            if let Some(types) = &opts.document_types {
                if !types.contains(&doc.document_type) {
                    continue;
                }
            }
            if let Some(glob) = &path_glob {
                if !glob.is_match(&doc.file_path) {
                    continue;
                }
            }
            if let Some(lang) = opts.language {
                let doc_lang = doc
                    .file_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(Language::from_extension);
                if doc_lang != Some(lang) {
                    continue;
                }
            }

            let (vector_rank, vector_score) = vector_ranks
                .get(id.as_str())
                .map(|(r, s)| (Some(*r), f64::from(*s)))
                .unwrap_or((None, 0.0));
            let (keyword_rank, keyword_score) = keyword_ranks
                .get(id.as_str())
                .map(|(r, s)| (Some(*r), *s))
                .unwrap_or((None, 0.0));

            let rrf = rrf_score(w_vector, vector_rank) + rrf_score(w_bm25, keyword_rank);

            let type_weight = opts
                .type_weights
                .as_ref()
                .and_then(|w| w.get(&doc.document_type).copied())
                .unwrap_or_else(|| doc.document_type.default_weight());
            let file_boost = opts.file_boosts.get(&doc.file_path).copied().unwrap_or(1.0);

            let fused_score = rrf * type_weight * file_boost;
            if fused_score <= 0.0 {
                continue;
            }

            hits.push(SearchHit { document: doc, vector_score, keyword_score, fused_score });
        }

        hits.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        hits.truncate(opts.limit);
        Ok(hits)
    }

    fn keyword_search(&self, query: &str, limit: usize) -> QuarryResult<Vec<(String, f64)>> {
        let match_expr = fts_match_expr(query);
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT doc_id, bm25(documents_fts) FROM documents_fts
             WHERE documents_fts MATCH ?1
             ORDER BY bm25(documents_fts) LIMIT ?2",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![match_expr, limit as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?;
        let mut hits = Vec::new();
        for row in rows {
            let (id, bm25) = row?;
            // FTS5 bm25() is smaller-is-better; flip the sign so callers
            // see higher-is-better.
            hits.push((id, -bm25));
        }
        Ok(hits)
    }
}

/// One RRF term: `w / (k + rank)`, zero when the channel missed.
pub fn rrf_score(weight: f64, rank: Option<usize>) -> f64 {
    match rank {
        Some(r) => weight / (RRF_K + r as f64),
        None => 0.0,
    }
}

/// Quote query tokens into an FTS5 OR expression.
fn fts_match_expr(query: &str) -> String {
    let tokens: Vec<String> = query
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    tokens.join(" OR ")
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let doc_type = DocumentType::from_str_lossy(&row.get::<_, String>(1)?)
        .unwrap_or(DocumentType::CodeChunk);
    let source_ids: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or_default();
    let payload: DocumentPayload = serde_json::from_str(&row.get::<_, String>(8)?)
        .unwrap_or(DocumentPayload::External {
            source: String::new(),
            topic: String::new(),
        });
    Ok(Document {
        id: row.get(0)?,
        document_type: doc_type,
        file_path: PathBuf::from(row.get::<_, String>(2)?),
        file_hash: row.get(3)?,
        content: row.get(4)?,
        source_ids,
        created_at: row.get(6)?,
        enriched_at: row.get(7)?,
        vector: None,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::now_ms;

    fn chunk_doc(id_seed: &str, path: &str, content: &str, vector: Option<Vec<f32>>) -> Document {
        Document {
            id: Document::make_id(DocumentType::CodeChunk, path, Some(id_seed), content),
            document_type: DocumentType::CodeChunk,
            file_path: PathBuf::from(path),
            file_hash: "hash".into(),
            content: content.into(),
            source_ids: vec![],
            created_at: now_ms(),
            enriched_at: None,
            vector,
            payload: DocumentPayload::CodeChunk {
                start_line: 1,
                end_line: 5,
                chunk_type: crate::types::UnitKind::Function,
                name: Some(id_seed.into()),
                parent_name: None,
                signature: None,
            },
        }
    }

    fn index() -> DocumentIndex {
        let store = Arc::new(Store::open_in_memory().expect("store"));
        DocumentIndex::in_memory(store, 3)
    }

    #[test]
    fn insert_and_get_by_file() {
        let idx = index();
        let doc = chunk_doc("alpha", "src/a.rs", "fn alpha() {}", None);
        idx.insert(&[doc.clone()]).expect("insert");

        let docs = idx.get_by_file(Path::new("src/a.rs"), None).expect("get");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, doc.id);
        assert!(matches!(docs[0].payload, DocumentPayload::CodeChunk { .. }));

        let none = idx
            .get_by_file(Path::new("src/a.rs"), Some(&[DocumentType::Idiom]))
            .expect("get filtered");
        assert!(none.is_empty());
    }

    #[test]
    fn insert_is_idempotent() {
        let idx = index();
        let doc = chunk_doc("alpha", "src/a.rs", "fn alpha() {}", None);
        idx.insert(&[doc.clone()]).expect("insert");
        idx.insert(&[doc]).expect("insert again");
        assert_eq!(idx.len().expect("len"), 1);
    }

    #[test]
    fn keyword_search_finds_tokens() {
        let idx = index();
        idx.insert(&[
            chunk_doc("auth", "src/auth.rs", "fn validate_token(token: &str) {}", None),
            chunk_doc("db", "src/db.rs", "fn connect_database(url: &str) {}", None),
        ])
        .expect("insert");

        let hits = idx.search("validate_token", None, &SearchOptions::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.file_path, PathBuf::from("src/auth.rs"));
        assert!(hits[0].keyword_score != 0.0);
        assert!(hits[0].fused_score > 0.0);
    }

    #[test]
    fn vector_search_ranks_by_similarity() {
        let idx = index();
        idx.insert(&[
            chunk_doc("close", "src/a.rs", "near vector", Some(vec![1.0, 0.0, 0.0])),
            chunk_doc("far", "src/b.rs", "far vector", Some(vec![0.0, 1.0, 0.0])),
        ])
        .expect("insert");

        let hits = idx.search("zzz_nomatch", Some(&[1.0, 0.0, 0.0]), &SearchOptions::default());
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.file_path, PathBuf::from("src/a.rs"));
        assert!(hits[0].vector_score > hits[1].vector_score);
    }

    #[test]
    fn fusion_prefers_balanced_document() {
        // D1: vector rank 1, keyword miss. D2: vector rank 2, keyword rank 1.
        // With equal channel weights D2's two mid ranks beat D1's single top rank.
        let idx = index();
        idx.insert(&[
            chunk_doc("d1", "src/d1.rs", "unrelated text entirely", Some(vec![1.0, 0.0, 0.0])),
            chunk_doc("d2", "src/d2.rs", "query keyword target", Some(vec![0.9, 0.1, 0.0])),
        ])
        .expect("insert");

        let opts = SearchOptions { vector_weight: 0.5, ..SearchOptions::default() };
        let hits = idx.search("keyword target", Some(&[1.0, 0.0, 0.0]), &opts);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.file_path, PathBuf::from("src/d2.rs"));
    }

    #[test]
    fn rrf_example_from_rank_inputs() {
        // vector rank 1 + bm25 rank 10 vs vector rank 5 + bm25 rank 2,
        // equal weights, k = 60.
        let d1 = rrf_score(0.5, Some(1)) + rrf_score(0.5, Some(10));
        let d2 = rrf_score(0.5, Some(5)) + rrf_score(0.5, Some(2));
        assert!(d2 > d1);
        assert!((d1 - (0.5 / 61.0 + 0.5 / 70.0)).abs() < 1e-12);
        assert!((d2 - (0.5 / 65.0 + 0.5 / 62.0)).abs() < 1e-12);
    }

    #[test]
    fn type_weights_and_file_boosts_scale_scores() {
        let idx = index();
        idx.insert(&[
            chunk_doc("a", "src/a.rs", "shared term alpha", None),
            chunk_doc("b", "src/b.rs", "shared term beta", None),
        ])
        .expect("insert");

        let mut opts = SearchOptions::default();
        opts.file_boosts.insert(PathBuf::from("src/b.rs"), 2.0);
        let hits = idx.search("shared term", None, &opts);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document.file_path, PathBuf::from("src/b.rs"));
    }

    #[test]
    fn filters_apply() {
        let idx = index();
        idx.insert(&[
            chunk_doc("a", "src/a.rs", "needle in rust", None),
            chunk_doc("b", "web/b.ts", "needle in typescript", None),
        ])
        .expect("insert");

        let opts = SearchOptions {
            path_pattern: Some("web/**".into()),
            ..SearchOptions::default()
        };
        let hits = idx.search("needle", None, &opts);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.file_path, PathBuf::from("web/b.ts"));

        let opts = SearchOptions {
            language: Some(Language::Rust),
            ..SearchOptions::default()
        };
        let hits = idx.search("needle", None, &opts);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.file_path, PathBuf::from("src/a.rs"));

        let opts = SearchOptions { include_code_chunks: false, ..SearchOptions::default() };
        let hits = idx.search("needle", None, &opts);
        assert!(hits.is_empty());
    }

    #[test]
    fn results_sorted_strictly_descending() {
        let idx = index();
        idx.insert(&[
            chunk_doc("a", "src/a.rs", "term one", None),
            chunk_doc("b", "src/b.rs", "term one two", None),
            chunk_doc("c", "src/c.rs", "term one two three", None),
        ])
        .expect("insert");

        let hits = idx.search("term", None, &SearchOptions::default());
        assert!(!hits.is_empty());
        for pair in hits.windows(2) {
            assert!(pair[0].fused_score >= pair[1].fused_score);
            assert!(pair[0].fused_score > 0.0);
        }
    }

    #[test]
    fn delete_by_file_removes_everything() {
        let idx = index();
        idx.insert(&[chunk_doc("a", "src/a.rs", "alpha body", Some(vec![1.0, 0.0, 0.0]))])
            .expect("insert");
        assert_eq!(idx.vector_count(), 1);

        idx.delete_by_file(Path::new("src/a.rs")).expect("delete");
        assert_eq!(idx.len().expect("len"), 0);
        assert_eq!(idx.vector_count(), 0);
        let hits = idx.search("alpha", Some(&[1.0, 0.0, 0.0]), &SearchOptions::default());
        assert!(hits.is_empty());
    }

    #[test]
    fn stats_by_type() {
        let idx = index();
        idx.insert(&[
            chunk_doc("a", "src/a.rs", "one", None),
            chunk_doc("b", "src/b.rs", "two", None),
        ])
        .expect("insert");
        let stats = idx.stats().expect("stats");
        assert_eq!(stats.get(&DocumentType::CodeChunk), Some(&2));
    }

    #[test]
    fn malformed_query_degrades_to_empty() {
        let idx = index();
        let hits = idx.search("!!! ???", None, &SearchOptions::default());
        assert!(hits.is_empty());
    }
}
