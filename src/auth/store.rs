//! Sessions handed out after an image login.
//!
//! `POST /login` opens a row here once the verifier accepts an image; the
//! bearer token in the response is what `/dashboard` and `/logout` check.
//! Issuing a new image for an identity drops all of its rows, so a session
//! never outlives the image that opened it.
//!
//! Only the SHA-256 of a bearer token is stored:
//! - `sessions`: token_hash, identity, client_address, created_at, expires_at

use anyhow::Result;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// `[session] ttl_secs` when unset: one day.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 3600;

/// Bearer token entropy; hex-encoded to 64 characters like image tokens.
const TOKEN_BYTES: usize = 32;

/// A live login: who the accepted image belonged to and where it came from.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: String,
    pub client_address: Option<String>,
    pub expires_at: i64,
}

/// Sessions opened by successful image logins.
pub struct SessionStore {
    conn: Mutex<rusqlite::Connection>,
    session_ttl_secs: u64,
}

impl SessionStore {
    /// Open the `sessions` table inside the registry database file.
    pub fn new(db_path: &Path, session_ttl_secs: Option<u64>) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        // Shares the file with SqliteRegistry; same pragmas.
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init(conn, session_ttl_secs)
    }

    /// Sessions that vanish with the process.
    pub fn in_memory(session_ttl_secs: Option<u64>) -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory()?, session_ttl_secs)
    }

    fn init(conn: rusqlite::Connection, session_ttl_secs: Option<u64>) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                token_hash TEXT PRIMARY KEY,
                identity TEXT NOT NULL,
                client_address TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_identity ON sessions(identity);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at);",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            session_ttl_secs: session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS),
        })
    }

    /// Open a session for the identity whose image was just accepted.
    /// The returned bearer token is not recoverable from the store.
    pub fn create_session(&self, identity: &str, client_address: Option<&str>) -> Result<String> {
        let token = generate_token();
        let token_hash = hash_token(&token);
        let now = epoch_secs();
        let expires_at = now + self.session_ttl_secs;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sessions (token_hash, identity, client_address, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                token_hash,
                identity,
                client_address,
                now as i64,
                expires_at as i64,
            ],
        )?;

        Ok(token)
    }

    /// Look up a bearer token. Unknown and expired tokens both yield `None`.
    pub fn validate_session(&self, token: &str) -> Option<Session> {
        let token_hash = hash_token(token);
        let now = epoch_secs() as i64;

        let conn = self.conn.lock();
        conn.query_row(
            "SELECT identity, client_address, expires_at
             FROM sessions
             WHERE token_hash = ?1 AND expires_at > ?2",
            rusqlite::params![token_hash, now],
            |row| {
                Ok(Session {
                    identity: row.get(0)?,
                    client_address: row.get(1)?,
                    expires_at: row.get(2)?,
                })
            },
        )
        .ok()
    }

    /// Logout: drop the session behind one bearer token.
    pub fn revoke_session(&self, token: &str) -> Result<bool> {
        let token_hash = hash_token(token);
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            rusqlite::params![token_hash],
        )?;
        Ok(deleted > 0)
    }

    /// Drop every session of an identity. Called whenever a new image
    /// supersedes the one those sessions were opened with.
    pub fn revoke_all_sessions(&self, identity: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE identity = ?1",
            rusqlite::params![identity],
        )?;
        Ok(deleted as u64)
    }

    /// Delete sessions past their TTL (`stegokey prune`).
    pub fn cleanup_expired_sessions(&self) -> Result<u64> {
        let now = epoch_secs() as i64;
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            rusqlite::params![now],
        )?;
        Ok(deleted as u64)
    }
}

/// Fresh bearer token from the OS RNG.
fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Storage key for a bearer token.
fn hash_token(token: &str) -> String {
    let mut h = Sha256::new();
    h.update(token.as_bytes());
    hex::encode(h.finalize())
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
