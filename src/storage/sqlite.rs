//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the DocumentStore trait.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{check_key, key_under, DocumentStore, StorageError, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Database("connection lock poisoned".to_string()))
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        check_key(key)?;
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM documents WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => {
                // Lists live in log_entries; expose them as an array document
                drop(conn);
                let entries = self.list(key)?;
                if entries.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(Value::Array(entries)))
                }
            }
        }
    }

    fn put(&self, key: &str, value: &Value) -> StorageResult<()> {
        check_key(key)?;
        let raw = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO documents (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, raw, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn append_capped(&self, key: &str, entry: &Value, cap: usize) -> StorageResult<()> {
        check_key(key)?;
        let raw = serde_json::to_string(entry)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO log_entries (key, value, created_at) VALUES (?1, ?2, ?3)",
            params![key, raw, Utc::now().to_rfc3339()],
        )?;
        tx.execute(
            "DELETE FROM log_entries WHERE key = ?1 AND id NOT IN (
                SELECT id FROM log_entries WHERE key = ?1 ORDER BY id DESC LIMIT ?2
            )",
            params![key, cap as i64],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn list(&self, key: &str) -> StorageResult<Vec<Value>> {
        check_key(key)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT value FROM log_entries WHERE key = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;

        let mut entries = Vec::new();
        for raw in rows {
            entries.push(serde_json::from_str(&raw?)?);
        }
        Ok(entries)
    }

    fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM documents UNION SELECT DISTINCT key FROM log_entries ORDER BY 1",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut keys = Vec::new();
        for key in rows {
            let key = key?;
            if key_under(&key, prefix) {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}
