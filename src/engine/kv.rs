// ── Durable Key/Value Store ────────────────────────────────────────────────
// String→string persistence behind the token cache, session memory, and the
// glyph ledger. Backends implement the `KvStore` trait; quota exhaustion is
// surfaced distinctly so the cache can fall back to its in-memory overlay.
//
// Backends:
//   SqliteKv — bundled SQLite, single `kv` table, WAL, connection behind a
//              parking_lot Mutex. The production store.
//   MemoryKv — HashMap-backed, configurable quota. Tests and the overlay
//              fallback.

use crate::atoms::error::{HlsfError, HlsfResult};
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The durable store contract. `set` must return
/// `HlsfError::QuotaExceeded` — and nothing else — when space runs out.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> HlsfResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> HlsfResult<()>;
    fn remove(&self, key: &str) -> HlsfResult<()>;
    /// All keys starting with `prefix`, ascending.
    fn keys(&self, prefix: &str) -> HlsfResult<Vec<String>>;
}

// ═════════════════════════════════════════════════════════════════════════════
// SQLite backend
// ═════════════════════════════════════════════════════════════════════════════

/// Default on-disk location: `<data_dir>/hlsf/store.db`.
pub fn default_db_path() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("hlsf").join("store.db")
}

/// Thread-safe SQLite key/value store.
pub struct SqliteKv {
    conn: Mutex<Connection>,
    /// Soft byte quota over keys+values; `None` = unbounded.
    quota_bytes: Option<u64>,
}

impl SqliteKv {
    /// Open (or create) the store at `path` and run migrations.
    pub fn open(path: &Path) -> HlsfResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("[store] Opening key/value store at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::migrate(&conn)?;
        Ok(SqliteKv {
            conn: Mutex::new(conn),
            quota_bytes: None,
        })
    }

    /// In-memory SQLite store — integration tests exercise the SQL path
    /// without touching disk.
    pub fn open_in_memory() -> HlsfResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::migrate(&conn)?;
        Ok(SqliteKv {
            conn: Mutex::new(conn),
            quota_bytes: None,
        })
    }

    /// Apply a soft byte quota. Writes that would push the summed
    /// key+value bytes past the quota fail with `QuotaExceeded`.
    pub fn with_quota(mut self, quota_bytes: u64) -> Self {
        self.quota_bytes = Some(quota_bytes);
        self
    }

    fn migrate(conn: &Connection) -> HlsfResult<()> {
        // Idempotent: append new DDL here, never edit existing statements.
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    fn used_bytes(conn: &Connection) -> HlsfResult<u64> {
        let used: Option<i64> = conn
            .query_row(
                "SELECT SUM(LENGTH(key) + LENGTH(value)) FROM kv",
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(used.unwrap_or(0).max(0) as u64)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> HlsfResult<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> HlsfResult<()> {
        let conn = self.conn.lock();
        if let Some(quota) = self.quota_bytes {
            let existing: Option<i64> = conn
                .query_row(
                    "SELECT LENGTH(key) + LENGTH(value) FROM kv WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            let incoming = (key.len() + value.len()) as u64;
            let used = Self::used_bytes(&conn)?;
            let after = used - existing.unwrap_or(0).max(0) as u64 + incoming;
            if after > quota {
                return Err(HlsfError::QuotaExceeded);
            }
        }
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> HlsfResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn keys(&self, prefix: &str) -> HlsfResult<Vec<String>> {
        let conn = self.conn.lock();
        // LIKE needs escaping for `%`/`_` in the prefix; a range scan on the
        // primary key avoids that entirely.
        let mut stmt =
            conn.prepare("SELECT key FROM kv WHERE key >= ?1 AND key < ?2 ORDER BY key")?;
        let upper = prefix_upper_bound(prefix);
        let rows = match upper {
            Some(upper) => stmt.query_map(params![prefix, upper], |row| row.get(0))?,
            None => {
                // Prefix of all 0xFF bytes — fall back to a full scan.
                let mut all = conn.prepare("SELECT key FROM kv ORDER BY key")?;
                let collected: Vec<String> = all
                    .query_map([], |row| row.get::<_, String>(0))?
                    .filter_map(|r| r.ok())
                    .filter(|k| k.starts_with(prefix))
                    .collect();
                return Ok(collected);
            }
        };
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

/// Smallest string strictly greater than every string with `prefix`.
fn prefix_upper_bound(prefix: &str) -> Option<String> {
    if prefix.is_empty() {
        return Some("\u{10FFFF}".to_string());
    }
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.last_mut() {
        if *last < 0xFF {
            *last += 1;
            // Bumping a byte may leave invalid UTF-8; lossy round-trip keeps
            // the bound usable as a SQL parameter.
            return Some(String::from_utf8_lossy(&bytes).into_owned());
        }
        bytes.pop();
    }
    None
}

// ═════════════════════════════════════════════════════════════════════════════
// In-memory backend
// ═════════════════════════════════════════════════════════════════════════════

/// HashMap-backed store with an optional quota. BTreeMap keeps `keys()`
/// ordering identical to the SQLite backend.
#[derive(Default)]
pub struct MemoryKv {
    map: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<u64>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: u64) -> Self {
        MemoryKv {
            map: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> HlsfResult<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> HlsfResult<()> {
        let mut map = self.map.lock();
        if let Some(quota) = self.quota_bytes {
            let used: u64 = map
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| (k.len() + v.len()) as u64)
                .sum();
            if used + (key.len() + value.len()) as u64 > quota {
                return Err(HlsfError::QuotaExceeded);
            }
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> HlsfResult<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    fn keys(&self, prefix: &str) -> HlsfResult<Vec<String>> {
        Ok(self
            .map
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Tests
// ═════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("missing").unwrap(), None);
        store.set("hlsf_token_alpha", "1").unwrap();
        store.set("hlsf_token_beta", "2").unwrap();
        store.set("hlsf_db_snapshot", "3").unwrap();
        assert_eq!(store.get("hlsf_token_alpha").unwrap().as_deref(), Some("1"));

        let keys = store.keys("hlsf_token_").unwrap();
        assert_eq!(keys, vec!["hlsf_token_alpha", "hlsf_token_beta"]);

        store.set("hlsf_token_alpha", "updated").unwrap();
        assert_eq!(
            store.get("hlsf_token_alpha").unwrap().as_deref(),
            Some("updated")
        );

        store.remove("hlsf_token_alpha").unwrap();
        assert_eq!(store.get("hlsf_token_alpha").unwrap(), None);
        assert_eq!(store.keys("hlsf_token_").unwrap().len(), 1);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn sqlite_store_contract() {
        exercise(&SqliteKv::open_in_memory().unwrap());
    }

    #[test]
    fn sqlite_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = SqliteKv::open(&path).unwrap();
            store.set("hlsf_token_alpha", "persisted").unwrap();
        }
        let reopened = SqliteKv::open(&path).unwrap();
        assert_eq!(
            reopened.get("hlsf_token_alpha").unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn memory_quota_is_distinct() {
        let store = MemoryKv::with_quota(20);
        store.set("k", "0123456789").unwrap();
        let err = store.set("k2", "0123456789").unwrap_err();
        assert!(matches!(err, HlsfError::QuotaExceeded));
        // Overwriting within quota still works.
        store.set("k", "x").unwrap();
    }

    #[test]
    fn sqlite_quota_is_distinct() {
        let store = SqliteKv::open_in_memory().unwrap().with_quota(16);
        store.set("a", "0123456789").unwrap();
        let err = store.set("b", "0123456789").unwrap_err();
        assert!(matches!(err, HlsfError::QuotaExceeded));
        // Replacing the existing value inside the quota succeeds.
        store.set("a", "01234").unwrap();
    }

    #[test]
    fn prefix_bound_edge_cases() {
        assert_eq!(prefix_upper_bound("a"), Some("b".to_string()));
        assert_eq!(prefix_upper_bound("hlsf_"), Some("hlsf`".to_string()));
        assert!(prefix_upper_bound("").is_some());
    }
}
