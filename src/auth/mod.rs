//! Login sessions for identities that passed image verification.
//!
//! Provides:
//! - Session token management (opaque hex tokens, SHA-256 hashed for storage, time-limited)
//! - SQLite-backed persistent storage, sharing the registry database file
//!
//! ## Design Decisions
//! - Sessions use opaque random tokens with server-side SHA-256 hashed lookup,
//!   the same pattern as image tokens minus the image.
//! - The image token itself is never reused as a session credential.

pub mod store;

pub use store::{Session, SessionStore};
