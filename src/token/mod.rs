//! Image token lifecycle.
//!
//! Provides:
//! - [`AuthRecord`]: the record embedded in every issued image
//! - [`TokenIssuer`]: registration and reset (one registry write)
//! - [`TokenVerifier`]: login (one registry read, then age and country policy)
//!
//! ## Design Decisions
//! - The token is an opaque 32-byte random value, hex-encoded, checked against
//!   the registry. It is not a MAC over the record, so edits to non-token
//!   fields are only caught by the age and country checks.
//! - A reset issues a brand-new record and image; the registry entry for the
//!   identity is replaced, which invalidates the previous image.

pub mod issuer;
pub mod record;
pub mod source;
pub mod verifier;

pub use issuer::{IssueError, IssuedToken, TokenIssuer};
pub use record::{AuthRecord, RecordError};
pub use source::{Clock, ManualClock, OsTokenSource, SeededTokenSource, SystemClock, TokenSource};
pub use verifier::{Accepted, Rejection, TokenVerifier, VerifyError};
