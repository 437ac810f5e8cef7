//! Key/value, set, and list persistence with per-key expiration.
//!
//! Backed by a single SQLite database behind a mutex. Values are opaque
//! strings; callers encode their own documents. Expired keys are invisible
//! to every read and evicted lazily on access; `purge_expired` sweeps the
//! rest.

pub mod keys;
pub mod migrations;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    LockPoisoned,
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run(&conn)?;

        info!("Store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory instance, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        f(&conn)
    }

    // -- Strings --

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            if evict_if_expired(conn, key)? {
                return Ok(None);
            }
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    /// Unconditional write. Clears any TTL previously set on the key.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )?;
            conn.execute("DELETE FROM expiry WHERE key = ?1", [key])?;
            Ok(())
        })
    }

    /// Atomic set-if-not-exists. Returns true if this call claimed the key.
    /// This is the conditional-write primitive uniqueness checks build on.
    pub fn set_nx(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            evict_if_expired(conn, key)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO kv (key, value) VALUES (?1, ?2)",
                (key, value),
            )?;
            Ok(inserted > 0)
        })
    }

    /// Write with a TTL.
    pub fn setex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                (key, value),
            )?;
            set_expiry(conn, key, ttl)?;
            Ok(())
        })
    }

    pub fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| remove_key(conn, key))
    }

    /// Attach or refresh a TTL on an existing key of any kind.
    pub fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.with_conn(|conn| set_expiry(conn, key, ttl))
    }

    // -- Sets --

    /// Idempotent add. Returns true if the member was not already present.
    pub fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            evict_if_expired(conn, key)?;
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO set_members (key, member) VALUES (?1, ?2)",
                (key, member),
            )?;
            Ok(inserted > 0)
        })
    }

    /// Idempotent remove. Returns true if the member was present.
    pub fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM set_members WHERE key = ?1 AND member = ?2",
                (key, member),
            )?;
            Ok(removed > 0)
        })
    }

    pub fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            if evict_if_expired(conn, key)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn
                .prepare("SELECT member FROM set_members WHERE key = ?1 ORDER BY member")?;
            let members = stmt
                .query_map([key], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(members)
        })
    }

    pub fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            if evict_if_expired(conn, key)? {
                return Ok(false);
            }
            let found = conn
                .query_row(
                    "SELECT 1 FROM set_members WHERE key = ?1 AND member = ?2",
                    (key, member),
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Lists --

    /// Prepend semantics: `lrange` returns entries most-recent-first.
    pub fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            evict_if_expired(conn, key)?;
            conn.execute(
                "INSERT INTO list_entries (key, value) VALUES (?1, ?2)",
                (key, value),
            )?;
            Ok(())
        })
    }

    pub fn lrange(
        &self,
        key: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            if evict_if_expired(conn, key)? {
                return Ok(Vec::new());
            }
            let mut stmt = conn.prepare(
                "SELECT value FROM list_entries WHERE key = ?1
                 ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
            )?;
            let values = stmt
                .query_map((key, limit as i64, offset as i64), |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(values)
        })
    }

    // -- Keys --

    /// Enumerate live keys by prefix across all three key kinds.
    pub fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let now = Utc::now().timestamp();
            let mut stmt = conn.prepare(
                "SELECT DISTINCT key FROM (
                     SELECT key FROM kv
                     UNION SELECT key FROM set_members
                     UNION SELECT key FROM list_entries
                 )
                 WHERE key LIKE ?1 || '%'
                   AND key NOT IN (SELECT key FROM expiry WHERE expires_at <= ?2)
                 ORDER BY key",
            )?;
            let keys = stmt
                .query_map((prefix, now), |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
    }

    /// Sweep every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        self.with_conn(|conn| {
            let now = Utc::now().timestamp();
            let mut stmt =
                conn.prepare("SELECT key FROM expiry WHERE expires_at <= ?1")?;
            let expired = stmt
                .query_map([now], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            for key in &expired {
                remove_key(conn, key)?;
            }
            Ok(expired.len())
        })
    }
}

fn set_expiry(conn: &Connection, key: &str, ttl: Duration) -> Result<(), StoreError> {
    let expires_at = Utc::now().timestamp() + ttl.as_secs() as i64;
    conn.execute(
        "INSERT INTO expiry (key, expires_at) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET expires_at = excluded.expires_at",
        (key, expires_at),
    )?;
    Ok(())
}

/// Removes the key from every table. Returns true if any row was deleted.
fn remove_key(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    let mut removed = 0;
    removed += conn.execute("DELETE FROM kv WHERE key = ?1", [key])?;
    removed += conn.execute("DELETE FROM set_members WHERE key = ?1", [key])?;
    removed += conn.execute("DELETE FROM list_entries WHERE key = ?1", [key])?;
    conn.execute("DELETE FROM expiry WHERE key = ?1", [key])?;
    Ok(removed > 0)
}

/// Lazy eviction: if the key has an elapsed TTL, drop it and report true.
fn evict_if_expired(conn: &Connection, key: &str) -> Result<bool, StoreError> {
    let expires_at = conn
        .query_row(
            "SELECT expires_at FROM expiry WHERE key = ?1",
            [key],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;

    match expires_at {
        Some(ts) if ts <= Utc::now().timestamp() => {
            remove_key(conn, key)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Store {
        Store::open_in_memory().unwrap()
    }

    #[test]
    fn get_set_del() {
        let s = store();
        assert_eq!(s.get("a").unwrap(), None);

        s.set("a", "1").unwrap();
        assert_eq!(s.get("a").unwrap(), Some("1".into()));

        s.set("a", "2").unwrap();
        assert_eq!(s.get("a").unwrap(), Some("2".into()));

        assert!(s.del("a").unwrap());
        assert!(!s.del("a").unwrap());
        assert_eq!(s.get("a").unwrap(), None);
    }

    #[test]
    fn set_nx_claims_once() {
        let s = store();
        assert!(s.set_nx("lock", "first").unwrap());
        assert!(!s.set_nx("lock", "second").unwrap());
        assert_eq!(s.get("lock").unwrap(), Some("first".into()));
    }

    #[test]
    fn expired_key_is_invisible() {
        let s = store();
        s.setex("gone", "x", Duration::ZERO).unwrap();
        assert_eq!(s.get("gone").unwrap(), None);

        // An elapsed TTL frees the key for set_nx
        s.setex("lock", "x", Duration::ZERO).unwrap();
        assert!(s.set_nx("lock", "y").unwrap());
    }

    #[test]
    fn plain_set_clears_ttl() {
        let s = store();
        s.setex("k", "x", Duration::ZERO).unwrap();
        s.set("k", "y").unwrap();
        assert_eq!(s.get("k").unwrap(), Some("y".into()));
    }

    #[test]
    fn set_membership_is_idempotent() {
        let s = store();
        assert!(s.sadd("s", "a").unwrap());
        assert!(!s.sadd("s", "a").unwrap());
        assert!(s.sadd("s", "b").unwrap());

        assert!(s.sismember("s", "a").unwrap());
        assert!(!s.sismember("s", "c").unwrap());
        assert_eq!(s.smembers("s").unwrap(), vec!["a", "b"]);

        assert!(s.srem("s", "a").unwrap());
        assert!(!s.srem("s", "a").unwrap());
        assert_eq!(s.smembers("s").unwrap(), vec!["b"]);
    }

    #[test]
    fn lists_are_most_recent_first() {
        let s = store();
        for i in 0..5 {
            s.lpush("l", &i.to_string()).unwrap();
        }
        assert_eq!(s.lrange("l", 0, 3).unwrap(), vec!["4", "3", "2"]);
        assert_eq!(s.lrange("l", 3, 10).unwrap(), vec!["1", "0"]);
        assert!(s.lrange("missing", 0, 10).unwrap().is_empty());
    }

    #[test]
    fn expire_hides_collections() {
        let s = store();
        s.sadd("s", "a").unwrap();
        s.expire("s", Duration::ZERO).unwrap();
        assert!(s.smembers("s").unwrap().is_empty());

        s.lpush("l", "a").unwrap();
        s.expire("l", Duration::ZERO).unwrap();
        assert!(s.lrange("l", 0, 10).unwrap().is_empty());
    }

    #[test]
    fn keys_by_prefix_skips_expired() {
        let s = store();
        s.set("group:a", "{}").unwrap();
        s.sadd("group:a:members", "m").unwrap();
        s.set("user:x", "{}").unwrap();
        s.setex("group:old", "{}", Duration::ZERO).unwrap();

        assert_eq!(
            s.keys("group:").unwrap(),
            vec!["group:a", "group:a:members"]
        );
    }

    #[test]
    fn purge_expired_sweeps() {
        let s = store();
        s.setex("a", "1", Duration::ZERO).unwrap();
        s.setex("b", "2", Duration::ZERO).unwrap();
        s.set("c", "3").unwrap();

        assert_eq!(s.purge_expired().unwrap(), 2);
        assert_eq!(s.get("c").unwrap(), Some("3".into()));
    }
}
