//! Local persistent key-value store.
//!
//! The evidence log lives under a single named key. [`KvStore`] keeps it in
//! `SQLite`; [`MemoryStore`] is an in-memory stand-in for tests and for runs
//! that should not touch disk.

pub mod migrations;
pub mod schema;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A string-keyed store holding string documents.
pub trait KeyValueStore: Send {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Human-readable location of the store, for logs.
    fn location(&self) -> String;
}

/// `SQLite`-backed key-value store.
#[derive(Debug)]
pub struct KvStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Connection,
}

impl KvStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self { path, conn })
    }

    /// Create an in-memory `SQLite` store.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn,
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// When the value under `key` was last written.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let stamp: Option<String> = self
            .conn
            .query_row(
                "SELECT updated_at FROM kv_entries WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(stamp
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let (total_keys, total_value_bytes): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(value)), 0) FROM kv_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            total_keys: u64::try_from(total_keys).unwrap_or(0),
            total_value_bytes: u64::try_from(total_value_bytes).unwrap_or(0),
            db_size_bytes,
        })
    }
}

impl KeyValueStore for KvStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            r"
            INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        debug!(key, bytes = value.len(), "Stored value");
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Statistics about the key-value store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of stored keys.
    pub total_keys: u64,
    /// Combined size of all stored values in bytes.
    pub total_value_bytes: u64,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// In-memory key-value store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    values: BTreeMap<String, String>,
    fail_writes: bool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with one value.
    #[must_use]
    pub fn with_value(key: &str, value: &str) -> Self {
        let mut store = Self::new();
        store.values.insert(key.to_string(), value.to_string());
        store
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            return Err(Error::Io(std::io::Error::other(
                "memory store is refusing writes",
            )));
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> KvStore {
        KvStore::open_in_memory().expect("failed to create test store")
    }

    #[test]
    fn test_open_in_memory() {
        let store = create_test_store();
        assert_eq!(store.path().to_string_lossy(), ":memory:");
        assert_eq!(store.location(), ":memory:");
    }

    #[test]
    fn test_get_missing_key() {
        let store = create_test_store();
        assert!(store.get("nothing").unwrap().is_none());
    }

    #[test]
    fn test_set_and_get() {
        let mut store = create_test_store();
        store.set("k", "[1,2,3]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("[1,2,3]"));
    }

    #[test]
    fn test_set_overwrites() {
        let mut store = create_test_store();
        store.set("k", "first").unwrap();
        store.set("k", "second").unwrap();

        assert_eq!(store.get("k").unwrap().as_deref(), Some("second"));
        assert_eq!(store.stats().unwrap().total_keys, 1);
    }

    #[test]
    fn test_updated_at() {
        let mut store = create_test_store();
        assert!(store.updated_at("k").unwrap().is_none());

        store.set("k", "v").unwrap();
        let stamp = store.updated_at("k").unwrap().unwrap();
        assert!((Utc::now() - stamp).num_seconds() < 60);
    }

    #[test]
    fn test_stats() {
        let mut store = create_test_store();
        let empty = store.stats().unwrap();
        assert_eq!(empty.total_keys, 0);
        assert_eq!(empty.total_value_bytes, 0);

        store.set("a", "12345").unwrap();
        store.set("b", "678").unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_keys, 2);
        assert_eq!(stats.total_value_bytes, 8);
        assert_eq!(stats.db_size_bytes, 0);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("safedrive.db");

        {
            let mut store = KvStore::open(&path).unwrap();
            store.set("evidence", "[]").unwrap();
            assert_eq!(store.path(), path);
        }

        let store = KvStore::open(&path).unwrap();
        assert_eq!(store.get("evidence").unwrap().as_deref(), Some("[]"));
        assert!(store.stats().unwrap().db_size_bytes > 0);
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
        assert_eq!(store.location(), "memory");
    }

    #[test]
    fn test_memory_store_failing_writes() {
        let mut store = MemoryStore::with_value("k", "old");
        store.set_fail_writes(true);

        assert!(store.set("k", "new").is_err());
        assert_eq!(store.get("k").unwrap().as_deref(), Some("old"));

        store.set_fail_writes(false);
        store.set("k", "new").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("new"));
    }
}
