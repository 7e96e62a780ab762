//! Token registry: the server-side authority behind every embedded record.
//!
//! An embedded record is never trusted on its own; it must match a live
//! entry here. Implementations make `upsert` and each lookup individually
//! atomic. The core never performs read-modify-write across calls.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRegistry;
pub use sqlite::SqliteRegistry;

use chrono::{DateTime, Utc};

/// One issued credential, keyed by identity and by token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// External identity, e.g. an email address.
    pub identity: String,
    pub token: String,
    /// Where the rendered image was archived; not the image itself.
    pub image_reference: String,
    pub created_at: DateTime<Utc>,
    pub last_reset_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("registry entry is corrupt: {0}")]
    Corrupt(String),
}

pub trait Registry: Send + Sync {
    /// Insert `entry`, replacing any prior entry for the same identity.
    fn upsert(&self, entry: RegistryEntry) -> Result<(), RegistryError>;

    fn find_by_token(&self, token: &str) -> Result<Option<RegistryEntry>, RegistryError>;

    fn find_by_identity(&self, identity: &str) -> Result<Option<RegistryEntry>, RegistryError>;
}
