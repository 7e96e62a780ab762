//! SQLite-backed token registry.
//!
//! Table:
//! - `registry`: identity (PK), token (unique), image_reference,
//!   created_at, last_reset_at (Unix seconds)

use super::{Registry, RegistryEntry, RegistryError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct SqliteRegistry {
    conn: Mutex<Connection>,
}

impl SqliteRegistry {
    /// Open (or create) the registry database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RegistryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS registry (
                identity TEXT PRIMARY KEY,
                token TEXT NOT NULL UNIQUE,
                image_reference TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                last_reset_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_registry_reset ON registry(last_reset_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of live entries.
    pub fn count(&self) -> Result<u64, RegistryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM registry", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove entries last issued before `cutoff`. Their images can no
    /// longer pass the age check, so the rows are dead weight.
    pub fn prune_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, RegistryError> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM registry WHERE last_reset_at < ?1",
            params![cutoff.timestamp()],
        )?;
        Ok(deleted as u64)
    }

    fn query_one(&self, sql: &str, key: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(sql, params![key], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .optional()?;

        row.map(|(identity, token, image_reference, created_at, last_reset_at)| {
            Ok(RegistryEntry {
                identity,
                token,
                image_reference,
                created_at: from_epoch(created_at)?,
                last_reset_at: from_epoch(last_reset_at)?,
            })
        })
        .transpose()
    }
}

impl Registry for SqliteRegistry {
    fn upsert(&self, entry: RegistryEntry) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        // REPLACE drops any row conflicting on identity or token in the same
        // statement, so supersession is atomic.
        conn.execute(
            "INSERT OR REPLACE INTO registry
                (identity, token, image_reference, created_at, last_reset_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.identity,
                entry.token,
                entry.image_reference,
                entry.created_at.timestamp(),
                entry.last_reset_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    fn find_by_token(&self, token: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        self.query_one(
            "SELECT identity, token, image_reference, created_at, last_reset_at
             FROM registry WHERE token = ?1",
            token,
        )
    }

    fn find_by_identity(&self, identity: &str) -> Result<Option<RegistryEntry>, RegistryError> {
        self.query_one(
            "SELECT identity, token, image_reference, created_at, last_reset_at
             FROM registry WHERE identity = ?1",
            identity,
        )
    }
}

fn from_epoch(secs: i64) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| RegistryError::Corrupt(format!("timestamp {secs} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn test_registry() -> (TempDir, SqliteRegistry) {
        let tmp = TempDir::new().unwrap();
        let registry = SqliteRegistry::open(&tmp.path().join("registry.db")).unwrap();
        (tmp, registry)
    }

    fn entry(identity: &str, token: &str, at: DateTime<Utc>) -> RegistryEntry {
        RegistryEntry {
            identity: identity.into(),
            token: token.into(),
            image_reference: format!("{token}.png"),
            created_at: at,
            last_reset_at: at,
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, day, 8, 0, 0).unwrap()
    }

    #[test]
    fn upsert_and_find() {
        let (_tmp, registry) = test_registry();
        let stored = entry("a@example.com", "t1", at(1));
        registry.upsert(stored.clone()).unwrap();

        assert_eq!(registry.find_by_token("t1").unwrap(), Some(stored.clone()));
        assert_eq!(registry.find_by_identity("a@example.com").unwrap(), Some(stored));
        assert!(registry.find_by_token("nope").unwrap().is_none());
        assert!(registry.find_by_identity("nobody@example.com").unwrap().is_none());
    }

    #[test]
    fn reset_replaces_entry() {
        let (_tmp, registry) = test_registry();
        registry.upsert(entry("a@example.com", "t1", at(1))).unwrap();
        registry.upsert(entry("a@example.com", "t2", at(2))).unwrap();

        assert_eq!(registry.count().unwrap(), 1);
        assert!(registry.find_by_token("t1").unwrap().is_none());
        let current = registry.find_by_identity("a@example.com").unwrap().unwrap();
        assert_eq!(current.token, "t2");
        assert_eq!(current.last_reset_at, at(2));
    }

    #[test]
    fn entries_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("registry.db");
        SqliteRegistry::open(&path)
            .unwrap()
            .upsert(entry("a@example.com", "t1", at(3)))
            .unwrap();

        let reopened = SqliteRegistry::open(&path).unwrap();
        assert_eq!(
            reopened.find_by_token("t1").unwrap().unwrap().identity,
            "a@example.com"
        );
    }

    #[test]
    fn prune_removes_only_stale_entries() {
        let registry = SqliteRegistry::open_in_memory().unwrap();
        registry.upsert(entry("old@example.com", "t1", at(1))).unwrap();
        registry.upsert(entry("new@example.com", "t2", at(10))).unwrap();

        let removed = registry.prune_expired(at(10) - Duration::days(7)).unwrap();
        assert_eq!(removed, 1);
        assert!(registry.find_by_identity("old@example.com").unwrap().is_none());
        assert!(registry.find_by_identity("new@example.com").unwrap().is_some());
    }
}
