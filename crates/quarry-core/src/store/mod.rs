//! SQLite-backed relational store.
//!
//! One database file (`index.db`) holds file state, document metadata,
//! symbols, references, learned weights, and the FTS5 keyword index.
//! All subsystems share a single [`Store`] handle; SQLite is configured
//! in WAL mode so readers proceed during writes, and the connection
//! mutex serialises writers.
//!
//! ## Migrations
//!
//! The baseline schema lives in `schema.sql`. Anything added after the
//! first release is applied additively in [`Store::apply_migrations`]
//! (`ALTER TABLE ADD COLUMN` with defaults) so existing databases
//! upgrade in place.

use std::path::Path;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;

use crate::error::{QuarryError, QuarryResult};

/// Shared handle to the relational store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the store at the given path.
    pub fn open(db_path: &Path) -> QuarryResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", "-64000")?; // 64MB cache
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self { conn: Mutex::new(conn) };
        store.ensure_schema()?;
        store.apply_migrations()?;
        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> QuarryResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.ensure_schema()?;
        store.apply_migrations()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> QuarryResult<()> {
        self.conn.lock().execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    /// Apply additive schema migrations to databases created by older
    /// versions. New columns always carry a default so old rows stay valid.
    fn apply_migrations(&self) -> QuarryResult<()> {
        self.ensure_column("files", "enriched_at", "INTEGER")?;
        self.ensure_column("documents", "language", "TEXT")?;
        Ok(())
    }

    /// Add a column if the table does not have it yet.
    fn ensure_column(&self, table: &str, column: &str, decl: &str) -> QuarryResult<()> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
            tracing::debug!(table, column, "applied additive migration");
        }
        Ok(())
    }

    /// Lock the underlying connection.
    ///
    /// Subsystem modules use this for their queries; prefer adding typed
    /// methods over spreading raw SQL through callers.
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Run `work` inside a transaction.
    ///
    /// On error the transaction rolls back and the operation is retried
    /// once; a second failure surfaces as a storage error.
    pub fn with_tx<T>(
        &self,
        mut work: impl FnMut(&rusqlite::Transaction<'_>) -> QuarryResult<T>,
    ) -> QuarryResult<T> {
        let mut last_err = None;
        for attempt in 0..2 {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            match work(&tx) {
                Ok(value) => {
                    tx.commit()?;
                    return Ok(value);
                }
                Err(e) => {
                    drop(tx); // implicit rollback
                    if attempt == 0 {
                        tracing::warn!(error = %e, "transaction failed, retrying once");
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(match last_err {
            Some(e) => QuarryError::Storage(e.to_string()),
            None => QuarryError::Internal("transaction retry loop exited".into()),
        })
    }

    /// Read a metadata value.
    pub fn get_meta(&self, key: &str) -> QuarryResult<Option<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Write a metadata value.
    pub fn set_meta(&self, key: &str, value: &str) -> QuarryResult<()> {
        self.conn.lock().execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    /// Run an integrity check on the database.
    pub fn check_integrity(&self) -> QuarryResult<bool> {
        let conn = self.conn.lock();
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_database() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("index.db");
        let store = Store::open(&db_path).expect("open database");
        assert!(store.check_integrity().expect("check integrity"));
    }

    #[test]
    fn metadata_roundtrip() {
        let store = Store::open_in_memory().expect("open");
        assert_eq!(store.get_meta("model").expect("get"), None);
        store.set_meta("model", "code-embed-v2").expect("set");
        assert_eq!(
            store.get_meta("model").expect("get"),
            Some("code-embed-v2".into())
        );
        store.set_meta("model", "other").expect("overwrite");
        assert_eq!(store.get_meta("model").expect("get"), Some("other".into()));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().expect("open");
        let result: QuarryResult<()> = store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO metadata (key, value) VALUES ('a', '1')",
                [],
            )?;
            Err(QuarryError::Internal("forced failure".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.get_meta("a").expect("get"), None);
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("index.db");
        {
            let _store = Store::open(&db_path).expect("first open");
        }
        // Reopening must not fail on already-applied migrations.
        let store = Store::open(&db_path).expect("second open");
        assert!(store.check_integrity().expect("integrity"));
    }
}
