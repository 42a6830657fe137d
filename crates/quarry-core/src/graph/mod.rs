//! Reference graph construction, resolution, and PageRank.
//!
//! Symbols live in an arena keyed by stable id; edges are id -> id
//! adjacency maps (no owning pointers between nodes, cycles are fine).
//! The graph is rebuilt in isolation from persisted symbols/references
//! and swapped in atomically behind [`GraphHandle`], so readers always
//! see one consistent version.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::QuarryResult;
use crate::store::Store;
use crate::types::{RefKind, SymbolDefinition, SymbolKind, SymbolReference};

/// Persistence for symbols and references.
///
/// References are re-derived from scratch whenever a file is re-indexed,
/// so replacement is always per-file and transactional.
pub struct SymbolTable {
    store: Arc<Store>,
}

impl SymbolTable {
    /// Create a table over the shared store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Replace all symbols and references for one file.
    pub fn replace_file(
        &self,
        path: &Path,
        symbols: &[SymbolDefinition],
        refs: &[SymbolReference],
    ) -> QuarryResult<()> {
        let key = path.to_string_lossy().replace('\\', "/");
        self.store.with_tx(|tx| {
            tx.execute("DELETE FROM symbols WHERE file_path = ?1", [key.as_str()])?;
            tx.execute("DELETE FROM symbol_refs WHERE file_path = ?1", [key.as_str()])?;

            for s in symbols {
                tx.execute(
                    "INSERT OR REPLACE INTO symbols
                         (id, kind, name, file_path, start_line, end_line, signature,
                          docstring, parent_id, is_exported, language, pagerank_score, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    rusqlite::params![
                        s.id,
                        s.kind.as_str(),
                        s.name,
                        s.file_path.to_string_lossy().replace('\\', "/"),
                        s.start_line,
                        s.end_line,
                        s.signature,
                        s.docstring,
                        s.parent_id,
                        s.is_exported,
                        s.language.as_str(),
                        s.pagerank_score,
                        s.updated_at,
                    ],
                )?;
            }

            for r in refs {
                tx.execute(
                    "INSERT OR REPLACE INTO symbol_refs
                         (from_symbol_id, to_symbol_name, to_symbol_id, kind,
                          file_path, line, is_resolved)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        r.from_symbol_id,
                        r.to_symbol_name,
                        r.to_symbol_id,
                        r.kind.as_str(),
                        r.file_path.to_string_lossy().replace('\\', "/"),
                        r.line,
                        r.is_resolved,
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Load every symbol.
    pub fn load_symbols(&self) -> QuarryResult<Vec<SymbolDefinition>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT id, kind, name, file_path, start_line, end_line, signature,
                    docstring, parent_id, is_exported, language, pagerank_score, updated_at
             FROM symbols",
        )?;
        let rows = stmt.query_map([], row_to_symbol)?;
        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row?);
        }
        Ok(symbols)
    }

    /// Load every reference.
    pub fn load_references(&self) -> QuarryResult<Vec<SymbolReference>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT from_symbol_id, to_symbol_name, to_symbol_id, kind,
                    file_path, line, is_resolved
             FROM symbol_refs",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SymbolReference {
                from_symbol_id: row.get(0)?,
                to_symbol_name: row.get(1)?,
                to_symbol_id: row.get(2)?,
                kind: RefKind::from_str_lossy(&row.get::<_, String>(3)?),
                file_path: PathBuf::from(row.get::<_, String>(4)?),
                line: row.get(5)?,
                is_resolved: row.get(6)?,
            })
        })?;
        let mut refs = Vec::new();
        for row in rows {
            refs.push(row?);
        }
        Ok(refs)
    }

    /// Persist resolution results and PageRank scores.
    pub fn persist_graph(&self, graph: &ReferenceGraph) -> QuarryResult<()> {
        self.store.with_tx(|tx| {
            for (id, symbol) in &graph.symbols {
                tx.execute(
                    "UPDATE symbols SET pagerank_score = ?1 WHERE id = ?2",
                    rusqlite::params![symbol.pagerank_score, id],
                )?;
            }
            for r in &graph.resolved_refs {
                tx.execute(
                    "UPDATE symbol_refs SET to_symbol_id = ?1, is_resolved = 1
                     WHERE from_symbol_id = ?2 AND to_symbol_name = ?3 AND kind = ?4",
                    rusqlite::params![
                        r.to_symbol_id,
                        r.from_symbol_id,
                        r.to_symbol_name,
                        r.kind.as_str()
                    ],
                )?;
            }
            Ok(())
        })
    }

    /// Number of stored symbols.
    pub fn symbol_count(&self) -> QuarryResult<usize> {
        let conn = self.store.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbols", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Number of stored references.
    pub fn reference_count(&self) -> QuarryResult<usize> {
        let conn = self.store.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM symbol_refs", [], |r| r.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_symbol(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolDefinition> {
    Ok(SymbolDefinition {
        id: row.get(0)?,
        kind: SymbolKind::from_str_lossy(&row.get::<_, String>(1)?),
        name: row.get(2)?,
        file_path: PathBuf::from(row.get::<_, String>(3)?),
        start_line: row.get(4)?,
        end_line: row.get(5)?,
        signature: row.get(6)?,
        docstring: row.get(7)?,
        parent_id: row.get(8)?,
        is_exported: row.get(9)?,
        language: crate::types::Language::from_str_lossy(&row.get::<_, String>(10)?)
            .unwrap_or(crate::types::Language::TypeScript),
        pagerank_score: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

// ---------------------------------------------------------------------------
// Graph snapshot
// ---------------------------------------------------------------------------

/// PageRank parameters.
#[derive(Debug, Clone, Copy)]
pub struct PageRankParams {
    /// Damping factor.
    pub damping: f64,
    /// Iteration count.
    pub iterations: u32,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self { damping: 0.85, iterations: 20 }
    }
}

/// An immutable snapshot of the resolved reference graph.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    /// Symbol arena keyed by stable id, scores already computed.
    pub symbols: HashMap<String, SymbolDefinition>,
    /// `from -> [to]` adjacency.
    pub out_edges: HashMap<String, Vec<String>>,
    /// `to -> [from]` adjacency.
    pub in_edges: HashMap<String, Vec<String>>,
    /// References that resolved during this build.
    pub resolved_refs: Vec<SymbolReference>,
}

/// A caller or callee with its depth in a traversal.
#[derive(Debug, Clone)]
pub struct ImpactEntry {
    /// The affected symbol.
    pub symbol: SymbolDefinition,
    /// Hops from the origin (1 = direct).
    pub depth: u32,
}

impl ReferenceGraph {
    /// Build the graph: resolve references by name, populate adjacency
    /// maps, and run PageRank.
    pub fn build(
        symbols: Vec<SymbolDefinition>,
        mut refs: Vec<SymbolReference>,
        params: PageRankParams,
    ) -> Self {
        let mut by_name: HashMap<&str, Vec<&SymbolDefinition>> = HashMap::new();
        for s in &symbols {
            by_name.entry(s.name.as_str()).or_default().push(s);
        }

        // Resolution: file hint, then exported, then highest prior rank.
        let mut resolved_refs = Vec::new();
        for r in &mut refs {
            if r.is_resolved {
                resolved_refs.push(r.clone());
                continue;
            }
            let Some(candidates) = by_name.get(r.to_symbol_name.as_str()) else {
                continue;
            };
            let target = candidates
                .iter()
                .find(|c| c.file_path == r.file_path)
                .or_else(|| candidates.iter().find(|c| c.is_exported))
                .or_else(|| {
                    candidates.iter().max_by(|a, b| {
                        a.pagerank_score
                            .partial_cmp(&b.pagerank_score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                });
            if let Some(target) = target {
                r.to_symbol_id = Some(target.id.clone());
                r.is_resolved = true;
                resolved_refs.push(r.clone());
            }
            // Unresolved names stay unresolved; they never block analysis.
        }

        let mut out_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut in_edges: HashMap<String, Vec<String>> = HashMap::new();
        let mut edge_seen: HashSet<(String, String)> = HashSet::new();
        for r in &resolved_refs {
            let Some(to) = &r.to_symbol_id else { continue };
            if !edge_seen.insert((r.from_symbol_id.clone(), to.clone())) {
                continue;
            }
            out_edges
                .entry(r.from_symbol_id.clone())
                .or_default()
                .push(to.clone());
            in_edges.entry(to.clone()).or_default().push(r.from_symbol_id.clone());
        }

        let mut symbols: HashMap<String, SymbolDefinition> =
            symbols.into_iter().map(|s| (s.id.clone(), s)).collect();
        let scores = pagerank(&symbols, &out_edges, &in_edges, params);
        for (id, score) in &scores {
            if let Some(sym) = symbols.get_mut(id) {
                sym.pagerank_score = *score;
            }
        }

        Self { symbols, out_edges, in_edges, resolved_refs }
    }

    /// Symbols that reference `id`, highest rank first.
    pub fn callers(&self, id: &str) -> Vec<&SymbolDefinition> {
        let mut result: Vec<&SymbolDefinition> = self
            .in_edges
            .get(id)
            .map(|froms| froms.iter().filter_map(|f| self.symbols.get(f)).collect())
            .unwrap_or_default();
        sort_by_rank(&mut result);
        result
    }

    /// Symbols that `id` references, highest rank first.
    pub fn callees(&self, id: &str) -> Vec<&SymbolDefinition> {
        let mut result: Vec<&SymbolDefinition> = self
            .out_edges
            .get(id)
            .map(|tos| tos.iter().filter_map(|t| self.symbols.get(t)).collect())
            .unwrap_or_default();
        sort_by_rank(&mut result);
        result
    }

    /// BFS over inbound edges up to `max_depth`, emitting `(symbol, depth)`.
    /// Entries at equal depth are ordered by rank descending.
    pub fn transitive_impact(&self, id: &str, max_depth: u32) -> Vec<ImpactEntry> {
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(id);
        let mut result = Vec::new();
        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
        queue.push_back((id, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let mut level: Vec<&SymbolDefinition> = Vec::new();
            if let Some(froms) = self.in_edges.get(current) {
                for from in froms {
                    if visited.insert(from.as_str()) {
                        if let Some(sym) = self.symbols.get(from) {
                            level.push(sym);
                        }
                    }
                }
            }
            sort_by_rank(&mut level);
            for sym in level {
                result.push(ImpactEntry { symbol: sym.clone(), depth: depth + 1 });
                queue.push_back((sym.id.as_str(), depth + 1));
            }
        }

        result
    }

    /// Node count.
    pub fn node_count(&self) -> usize {
        self.symbols.len()
    }

    /// Distinct edge count.
    pub fn edge_count(&self) -> usize {
        self.out_edges.values().map(Vec::len).sum()
    }
}

fn sort_by_rank(symbols: &mut [&SymbolDefinition]) {
    symbols.sort_by(|a, b| {
        b.pagerank_score
            .partial_cmp(&a.pagerank_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Iterative PageRank with dangling-node protection.
///
/// `score'(v) = (1-d)/N + d * Σ score(u)/max(|out(u)|, 1)` over inbound
/// neighbours; dangling nodes use an out-degree of 1, and the final
/// distribution is normalised to sum to 1.
fn pagerank(
    symbols: &HashMap<String, SymbolDefinition>,
    out_edges: &HashMap<String, Vec<String>>,
    in_edges: &HashMap<String, Vec<String>>,
    params: PageRankParams,
) -> HashMap<String, f64> {
    let n = symbols.len();
    if n == 0 {
        return HashMap::new();
    }

    let initial = 1.0 / n as f64;
    let mut scores: HashMap<&str, f64> =
        symbols.keys().map(|id| (id.as_str(), initial)).collect();

    for _ in 0..params.iterations {
        let mut next: HashMap<&str, f64> = HashMap::with_capacity(n);
        for id in symbols.keys() {
            let mut inbound = 0.0;
            if let Some(froms) = in_edges.get(id) {
                for from in froms {
                    let out_degree = out_edges.get(from).map_or(0, Vec::len).max(1);
                    inbound += scores.get(from.as_str()).copied().unwrap_or(initial)
                        / out_degree as f64;
                }
            }
            next.insert(
                id.as_str(),
                (1.0 - params.damping) / n as f64 + params.damping * inbound,
            );
        }
        scores = next;
    }

    let total: f64 = scores.values().sum();
    let mut result = HashMap::with_capacity(n);
    for (id, score) in scores {
        let normalised = if total > 0.0 { score / total } else { initial };
        result.insert(id.to_string(), normalised);
    }
    result
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Atomically swappable graph reference.
///
/// Rebuilds happen on a fresh [`ReferenceGraph`]; readers keep whatever
/// snapshot they took and never observe a half-built graph.
pub struct GraphHandle {
    inner: RwLock<Arc<ReferenceGraph>>,
}

impl GraphHandle {
    /// Create a handle holding an empty graph.
    pub fn new() -> Self {
        Self { inner: RwLock::new(Arc::new(ReferenceGraph::default())) }
    }

    /// Take the current snapshot.
    pub fn snapshot(&self) -> Arc<ReferenceGraph> {
        Arc::clone(&self.inner.read())
    }

    /// Swap in a freshly built graph.
    pub fn swap(&self, graph: ReferenceGraph) {
        *self.inner.write() = Arc::new(graph);
    }
}

impl Default for GraphHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Language;

    fn symbol(id: &str, name: &str, file: &str, exported: bool) -> SymbolDefinition {
        SymbolDefinition {
            id: id.into(),
            kind: SymbolKind::Function,
            name: name.into(),
            file_path: PathBuf::from(file),
            start_line: 1,
            end_line: 10,
            signature: format!("fn {name}()"),
            docstring: None,
            parent_id: None,
            is_exported: exported,
            language: Language::Rust,
            pagerank_score: 0.0,
            updated_at: 0,
        }
    }

    fn reference(from: &str, to_name: &str, file: &str) -> SymbolReference {
        SymbolReference {
            from_symbol_id: from.into(),
            to_symbol_name: to_name.into(),
            to_symbol_id: None,
            kind: RefKind::Call,
            file_path: PathBuf::from(file),
            line: 2,
            is_resolved: false,
        }
    }

    #[test]
    fn resolution_prefers_same_file() {
        let symbols = vec![
            symbol("a", "target", "one.rs", true),
            symbol("b", "target", "two.rs", true),
            symbol("c", "caller", "two.rs", true),
        ];
        let refs = vec![reference("c", "target", "two.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());

        let resolved = &graph.resolved_refs[0];
        assert_eq!(resolved.to_symbol_id.as_deref(), Some("b"));
        assert!(resolved.is_resolved);
    }

    #[test]
    fn resolution_prefers_exported_across_files() {
        let symbols = vec![
            symbol("a", "target", "one.rs", false),
            symbol("b", "target", "two.rs", true),
            symbol("c", "caller", "three.rs", true),
        ];
        let refs = vec![reference("c", "target", "three.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());
        assert_eq!(graph.resolved_refs[0].to_symbol_id.as_deref(), Some("b"));
    }

    #[test]
    fn unresolved_names_are_kept_unresolved() {
        let symbols = vec![symbol("a", "caller", "x.rs", true)];
        let refs = vec![reference("a", "missing_external", "x.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());
        assert!(graph.resolved_refs.is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn pagerank_sums_to_one() {
        let symbols = vec![
            symbol("a", "a", "x.rs", true),
            symbol("b", "b", "x.rs", true),
            symbol("c", "c", "x.rs", true),
        ];
        let refs = vec![reference("a", "b", "x.rs"), reference("c", "b", "x.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());

        let total: f64 = graph.symbols.values().map(|s| s.pagerank_score).sum();
        assert!((total - 1.0).abs() < 1e-9, "sum was {total}");

        // The referenced node outranks the referencing ones.
        let b = &graph.symbols["b"];
        let a = &graph.symbols["a"];
        assert!(b.pagerank_score > a.pagerank_score);
    }

    #[test]
    fn pagerank_handles_cycles_and_dangling() {
        let symbols = vec![
            symbol("a", "a", "x.rs", true),
            symbol("b", "b", "x.rs", true),
            symbol("d", "dangling", "x.rs", true),
        ];
        // a -> b, b -> a: a two-cycle plus one isolated node.
        let refs = vec![reference("a", "b", "x.rs"), reference("b", "a", "x.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());

        let total: f64 = graph.symbols.values().map(|s| s.pagerank_score).sum();
        assert!((total - 1.0).abs() < 1e-9);
        for s in graph.symbols.values() {
            assert!(s.pagerank_score.is_finite());
            assert!(s.pagerank_score > 0.0);
        }
    }

    #[test]
    fn callers_and_callees() {
        let symbols = vec![
            symbol("a", "a", "x.rs", true),
            symbol("b", "b", "x.rs", true),
            symbol("c", "c", "x.rs", true),
        ];
        let refs = vec![reference("a", "c", "x.rs"), reference("b", "c", "x.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());

        let callers: Vec<&str> = graph.callers("c").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(callers.len(), 2);
        assert!(callers.contains(&"a") && callers.contains(&"b"));

        let callees: Vec<&str> = graph.callees("a").iter().map(|s| s.id.as_str()).collect();
        assert_eq!(callees, vec!["c"]);
    }

    #[test]
    fn transitive_impact_depth_and_superset() {
        // c <- b <- a : changing c impacts b directly, a transitively.
        let symbols = vec![
            symbol("a", "a", "x.rs", true),
            symbol("b", "b", "x.rs", true),
            symbol("c", "c", "x.rs", true),
        ];
        let refs = vec![reference("a", "b", "x.rs"), reference("b", "c", "x.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());

        let direct = graph.callers("c");
        let transitive = graph.transitive_impact("c", 10);

        assert_eq!(direct.len(), 1);
        assert_eq!(transitive.len(), 2);
        assert_eq!(transitive[0].symbol.id, "b");
        assert_eq!(transitive[0].depth, 1);
        assert_eq!(transitive[1].symbol.id, "a");
        assert_eq!(transitive[1].depth, 2);

        // Direct callers are a subset of the transitive set.
        for d in &direct {
            assert!(transitive.iter().any(|t| t.symbol.id == d.id));
        }

        let shallow = graph.transitive_impact("c", 1);
        assert_eq!(shallow.len(), 1);
    }

    #[test]
    fn impact_terminates_on_cycles() {
        let symbols = vec![
            symbol("a", "a", "x.rs", true),
            symbol("b", "b", "x.rs", true),
        ];
        let refs = vec![reference("a", "b", "x.rs"), reference("b", "a", "x.rs")];
        let graph = ReferenceGraph::build(symbols, refs, PageRankParams::default());
        let impact = graph.transitive_impact("a", 10);
        assert_eq!(impact.len(), 1);
    }

    #[test]
    fn table_roundtrip_and_persist() {
        let store = Arc::new(Store::open_in_memory().expect("open"));
        let table = SymbolTable::new(Arc::clone(&store));

        let symbols = vec![symbol("a", "alpha", "x.rs", true), symbol("b", "beta", "x.rs", false)];
        let refs = vec![reference("a", "beta", "x.rs")];
        table
            .replace_file(Path::new("x.rs"), &symbols, &refs)
            .expect("replace");
        assert_eq!(table.symbol_count().expect("count"), 2);
        assert_eq!(table.reference_count().expect("count"), 1);

        let graph = ReferenceGraph::build(
            table.load_symbols().expect("load"),
            table.load_references().expect("load"),
            PageRankParams::default(),
        );
        table.persist_graph(&graph).expect("persist");

        let reloaded = table.load_symbols().expect("reload");
        let total: f64 = reloaded.iter().map(|s| s.pagerank_score).sum();
        assert!((total - 1.0).abs() < 1e-9);

        let refs = table.load_references().expect("reload refs");
        assert!(refs[0].is_resolved);
        assert_eq!(refs[0].to_symbol_id.as_deref(), Some("b"));

        // Re-indexing the file replaces prior rows instead of stacking.
        table
            .replace_file(Path::new("x.rs"), &symbols[..1], &[])
            .expect("replace again");
        assert_eq!(table.symbol_count().expect("count"), 1);
        assert_eq!(table.reference_count().expect("count"), 0);
    }

    #[test]
    fn graph_handle_swaps_atomically() {
        let handle = GraphHandle::new();
        let before = handle.snapshot();
        assert_eq!(before.node_count(), 0);

        let symbols = vec![symbol("a", "a", "x.rs", true)];
        handle.swap(ReferenceGraph::build(symbols, vec![], PageRankParams::default()));

        // The old snapshot is untouched; a new snapshot sees the swap.
        assert_eq!(before.node_count(), 0);
        assert_eq!(handle.snapshot().node_count(), 1);
    }
}
