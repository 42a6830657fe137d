//! Durable per-file state tracking.
//!
//! The tracker owns the `files` table and is the only write path to
//! on-disk file state. Change detection is two-tier: mtime comparison
//! first, SHA-256 content hashing only when the mtime moved. A file whose
//! hash is unchanged after an mtime bump gets its stored mtime refreshed
//! and is reported unchanged.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::QuarryResult;
use crate::store::Store;
use crate::types::{now_ms, DocumentType, EnrichmentStatus, FileState};

/// Outcome of comparing the tracked state against the current tree.
#[derive(Debug, Clone, Default)]
pub struct TrackerDiff {
    /// Paths never seen before.
    pub new: Vec<PathBuf>,
    /// Paths whose content hash changed (or could not be read).
    pub modified: Vec<PathBuf>,
    /// Tracked paths that no longer exist on disk.
    pub deleted: Vec<PathBuf>,
    /// Paths with identical content.
    pub unchanged: Vec<PathBuf>,
}

/// Tracks per-file indexing and enrichment state.
pub struct FileTracker {
    store: Arc<Store>,
    root: PathBuf,
}

impl FileTracker {
    /// Create a tracker over the given store, resolving relative paths
    /// against `root`.
    pub fn new(store: Arc<Store>, root: &Path) -> Self {
        Self { store, root: root.to_path_buf() }
    }

    /// Compare `current_paths` (repo-relative) against tracked state.
    ///
    /// Fast path compares mtimes; only on an mtime change is the content
    /// re-hashed. Any I/O error while statting or hashing a tracked file
    /// reports that file as modified so the next pass re-examines it.
    pub fn diff(&self, current_paths: &[PathBuf]) -> QuarryResult<TrackerDiff> {
        let tracked = self.tracked_files()?;
        let mut diff = TrackerDiff::default();

        let current: std::collections::HashSet<&PathBuf> = current_paths.iter().collect();

        for path in current_paths {
            let Some((stored_hash, stored_mtime)) = tracked.get(path) else {
                diff.new.push(path.clone());
                continue;
            };

            let abs = self.root.join(path);
            let mtime_ms = match file_mtime_ms(&abs) {
                Ok(m) => m,
                Err(_) => {
                    diff.modified.push(path.clone());
                    continue;
                }
            };

            if mtime_ms == *stored_mtime {
                diff.unchanged.push(path.clone());
                continue;
            }

            match std::fs::read(&abs) {
                Ok(bytes) => {
                    let hash = hash_bytes(&bytes);
                    if hash == *stored_hash {
                        // Touch without content change: refresh mtime only.
                        self.store.connection().execute(
                            "UPDATE files SET mtime_ms = ?1 WHERE path = ?2",
                            rusqlite::params![mtime_ms, path_str(path)],
                        )?;
                        diff.unchanged.push(path.clone());
                    } else {
                        diff.modified.push(path.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "hash failed, treating as modified");
                    diff.modified.push(path.clone());
                }
            }
        }

        for path in tracked.keys() {
            if !current.contains(path) {
                diff.deleted.push(path.clone());
            }
        }

        Ok(diff)
    }

    /// Record a file as indexed. Idempotent upsert.
    ///
    /// A changed content hash resets every enrichment state to pending.
    pub fn mark_indexed(
        &self,
        path: &Path,
        content_hash: &str,
        chunk_ids: &[String],
    ) -> QuarryResult<()> {
        let mtime_ms = file_mtime_ms(&self.root.join(path)).unwrap_or(0);
        let chunk_json = serde_json::to_string(chunk_ids)?;
        let now = now_ms();
        let key = path_str(path);

        self.store.with_tx(|tx| {
            let prior_hash: Option<String> = tx
                .query_row(
                    "SELECT content_hash FROM files WHERE path = ?1",
                    [key.as_str()],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let reset = prior_hash.as_deref() != Some(content_hash);
            if reset {
                tx.execute(
                    "INSERT INTO files (path, content_hash, mtime_ms, chunk_ids, indexed_at, enrichment_state)
                     VALUES (?1, ?2, ?3, ?4, ?5, '{}')
                     ON CONFLICT(path) DO UPDATE SET
                         content_hash = excluded.content_hash,
                         mtime_ms = excluded.mtime_ms,
                         chunk_ids = excluded.chunk_ids,
                         indexed_at = excluded.indexed_at,
                         enrichment_state = '{}'",
                    rusqlite::params![key, content_hash, mtime_ms, chunk_json, now],
                )?;
            } else {
                tx.execute(
                    "INSERT INTO files (path, content_hash, mtime_ms, chunk_ids, indexed_at, enrichment_state)
                     VALUES (?1, ?2, ?3, ?4, ?5, '{}')
                     ON CONFLICT(path) DO UPDATE SET
                         mtime_ms = excluded.mtime_ms,
                         chunk_ids = excluded.chunk_ids,
                         indexed_at = excluded.indexed_at",
                    rusqlite::params![key, content_hash, mtime_ms, chunk_json, now],
                )?;
            }
            Ok(())
        })
    }

    /// Drop the file row and all documents tied to it.
    pub fn remove(&self, path: &Path) -> QuarryResult<()> {
        let key = path_str(path);
        self.store.with_tx(|tx| {
            tx.execute(
                "DELETE FROM documents_fts WHERE doc_id IN
                     (SELECT id FROM documents WHERE file_path = ?1)",
                [key.as_str()],
            )?;
            tx.execute("DELETE FROM documents WHERE file_path = ?1", [key.as_str()])?;
            tx.execute("DELETE FROM files WHERE path = ?1", [key.as_str()])?;
            Ok(())
        })
    }

    /// Full state for one file.
    pub fn get_state(&self, path: &Path) -> QuarryResult<Option<FileState>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare(
            "SELECT path, content_hash, mtime_ms, chunk_ids, indexed_at, enrichment_state
             FROM files WHERE path = ?1",
        )?;
        let mut rows = stmt.query([path_str(path)])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        Ok(Some(row_to_state(row)?))
    }

    /// The chunk ids recorded for a path (empty when untracked).
    pub fn get_chunk_ids(&self, path: &Path) -> QuarryResult<Vec<String>> {
        Ok(self
            .get_state(path)?
            .map(|s| s.chunk_ids)
            .unwrap_or_default())
    }

    /// Per-type enrichment status map for a file. Types absent from the
    /// map are pending.
    pub fn enrichment_state(
        &self,
        path: &Path,
    ) -> QuarryResult<BTreeMap<DocumentType, EnrichmentStatus>> {
        Ok(self
            .get_state(path)?
            .map(|s| s.enrichment_state)
            .unwrap_or_default())
    }

    /// Atomically set the enrichment status for one `(file, type)` pair.
    pub fn set_enrichment(
        &self,
        path: &Path,
        doc_type: DocumentType,
        status: EnrichmentStatus,
    ) -> QuarryResult<()> {
        let key = path_str(path);
        self.store.with_tx(|tx| {
            let raw: String = tx.query_row(
                "SELECT enrichment_state FROM files WHERE path = ?1",
                [key.as_str()],
                |row| row.get(0),
            )?;
            let mut state: BTreeMap<DocumentType, EnrichmentStatus> =
                serde_json::from_str(&raw).unwrap_or_default();
            state.insert(doc_type, status.clone());
            let enriched_at = if matches!(status, EnrichmentStatus::Complete) {
                Some(now_ms())
            } else {
                None
            };
            tx.execute(
                "UPDATE files SET enrichment_state = ?1,
                     enriched_at = COALESCE(?2, enriched_at)
                 WHERE path = ?3",
                rusqlite::params![serde_json::to_string(&state)?, enriched_at, key],
            )?;
            Ok(())
        })
    }

    /// Whether a `(file, type)` pair still needs enrichment.
    pub fn needs_enrichment(&self, path: &Path, doc_type: DocumentType) -> QuarryResult<bool> {
        let state = self.enrichment_state(path)?;
        Ok(state
            .get(&doc_type)
            .map_or(true, EnrichmentStatus::needs_enrichment))
    }

    /// All tracked paths.
    pub fn all_paths(&self) -> QuarryResult<Vec<PathBuf>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare("SELECT path FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = Vec::new();
        for row in rows {
            paths.push(PathBuf::from(row?));
        }
        Ok(paths)
    }

    /// Number of tracked files.
    pub fn file_count(&self) -> QuarryResult<usize> {
        let conn = self.store.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn tracked_files(&self) -> QuarryResult<BTreeMap<PathBuf, (String, i64)>> {
        let conn = self.store.connection();
        let mut stmt = conn.prepare("SELECT path, content_hash, mtime_ms FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (path, hash, mtime) = row?;
            map.insert(PathBuf::from(path), (hash, mtime));
        }
        Ok(map)
    }
}

fn row_to_state(row: &rusqlite::Row<'_>) -> QuarryResult<FileState> {
    let chunk_ids: Vec<String> =
        serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or_default();
    let enrichment_state: BTreeMap<DocumentType, EnrichmentStatus> =
        serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or_default();
    Ok(FileState {
        path: PathBuf::from(row.get::<_, String>(0)?),
        content_hash: row.get(1)?,
        mtime_ms: row.get(2)?,
        chunk_ids,
        indexed_at: row.get(4)?,
        enrichment_state,
    })
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn file_mtime_ms(path: &Path) -> std::io::Result<i64> {
    let meta = std::fs::metadata(path)?;
    let mtime = meta.modified()?;
    Ok(mtime
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0))
}

/// Full SHA-256 hex digest of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
