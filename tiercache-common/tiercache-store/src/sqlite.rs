//! # SqliteStore
//!
//! Persistent tier backed by SQLite. A single connection is shared behind a
//! mutex, so every call blocks until the statement completes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::store::{numeric_value, LevelStore, StoreFootprint, StoreMaintenance, StoreSnapshot};

/// SQLite-backed cache tier
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a cache database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA wal_autocheckpoint = 1000;",
        )?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path),
        })
    }

    /// Private in-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache_entries(expires_at)",
            [],
        )?;

        Ok(())
    }

    fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    fn expires_at(ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|ttl| Self::now_secs() + ttl.as_secs().max(1) as i64)
    }

    fn size_bytes(conn: &Connection) -> Result<u64> {
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok((page_count * page_size).max(0) as u64)
    }

    fn snapshot_with(conn: &Connection) -> Result<StoreSnapshot> {
        let now = Self::now_secs();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [now],
            |row| row.get(0),
        )?;
        let tagged: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE tags <> '[]'",
            [],
            |row| row.get(0),
        )?;

        Ok(StoreSnapshot {
            total_entries: total as u64,
            expired_entries: expired as u64,
            tagged_entries: tagged as u64,
            size_bytes: Self::size_bytes(conn)?,
        })
    }
}

impl LevelStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_tagged(key)?.map(|(value, _)| value))
    }

    fn get_tagged(&self, key: &str) -> Result<Option<(Value, BTreeSet<String>)>> {
        let conn = self.conn.lock();
        let row: Option<(String, String, Option<i64>)> = conn
            .query_row(
                "SELECT value, tags, expires_at FROM cache_entries WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((_, _, Some(expires_at))) if expires_at <= Self::now_secs() => {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
                Ok(None)
            }
            Some((raw, tags, _)) => Ok(Some((serde_json::from_str(&raw)?, serde_json::from_str(&tags)?))),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &Value, ttl: Option<Duration>, tags: &BTreeSet<String>) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        let tags = serde_json::to_string(tags)?;
        let now = Self::now_secs();

        self.conn.lock().execute(
            "INSERT INTO cache_entries (key, value, tags, expires_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             tags = excluded.tags,
             expires_at = excluded.expires_at,
             updated_at = excluded.updated_at",
            params![key, raw, tags, Self::expires_at(ttl), now],
        )?;
        Ok(())
    }

    fn forget(&self, key: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .execute("DELETE FROM cache_entries WHERE key = ?1", [key])?;
        Ok(changed > 0)
    }

    fn flush(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    fn increment(&self, key: &str, by: i64) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Self::now_secs();

        let row: Option<(String, Option<i64>)> = tx
            .query_row(
                "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                [key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (current, expires_at) = match row {
            Some((_, Some(expires_at))) if expires_at <= now => (0, None),
            Some((raw, expires_at)) => {
                let value: Value = serde_json::from_str(&raw)?;
                let current = numeric_value(&value).ok_or_else(|| StoreError::NotNumeric(key.to_string()))?;
                (current, expires_at)
            }
            None => (0, None),
        };

        let next = current.saturating_add(by);
        tx.execute(
            "INSERT INTO cache_entries (key, value, tags, expires_at, created_at, updated_at)
             VALUES (?1, ?2, '[]', ?3, ?4, ?4)
             ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             expires_at = excluded.expires_at,
             updated_at = excluded.updated_at",
            params![key, next.to_string(), expires_at, now],
        )?;
        tx.commit()?;
        Ok(next)
    }

    fn forget_tagged(&self, tags: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for tag in tags {
            removed += tx.execute(
                "DELETE FROM cache_entries WHERE EXISTS (
                    SELECT 1 FROM json_each(cache_entries.tags) WHERE json_each.value = ?1
                 )",
                [tag],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key FROM cache_entries WHERE expires_at IS NULL OR expires_at > ?1",
        )?;
        let keys = stmt
            .query_map([Self::now_secs()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn footprint(&self) -> Option<StoreFootprint> {
        let conn = self.conn.lock();
        let result: rusqlite::Result<(i64, i64)> = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0) FROM cache_entries",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        );
        match result {
            Ok((entries, bytes)) => Some(StoreFootprint {
                entries: entries as u64,
                bytes: bytes as u64,
            }),
            Err(e) => {
                tracing::warn!("Failed to measure sqlite tier: {}", e);
                None
            }
        }
    }

    fn maintenance(&self) -> Option<&dyn StoreMaintenance> {
        Some(self)
    }
}

impl StoreMaintenance for SqliteStore {
    fn cleanup_expired(&self) -> Result<u64> {
        let removed = self.conn.lock().execute(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            [Self::now_secs()],
        )?;
        Ok(removed as u64)
    }

    fn optimize(&self) -> Result<()> {
        self.conn.lock().execute_batch("PRAGMA optimize;")?;
        Ok(())
    }

    fn analyze(&self) -> Result<StoreSnapshot> {
        let conn = self.conn.lock();
        conn.execute_batch("ANALYZE cache_entries;")?;
        Self::snapshot_with(&conn)
    }

    fn vacuum(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let before = Self::size_bytes(&conn)?;
        conn.execute("VACUUM", [])?;
        let after = Self::size_bytes(&conn)?;
        Ok(before.saturating_sub(after))
    }

    fn reindex(&self) -> Result<()> {
        self.conn.lock().execute_batch("REINDEX cache_entries;")?;
        Ok(())
    }

    fn integrity_check(&self) -> Result<bool> {
        let verdict: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(verdict == "ok")
    }

    fn snapshot(&self) -> Result<StoreSnapshot> {
        Self::snapshot_with(&self.conn.lock())
    }
}
