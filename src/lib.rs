#![forbid(unsafe_code)]

//! Image-carried authentication tokens.
//!
//! Issuance renders a login record (client address, coarse location, client
//! software, timestamp, random token) into the least-significant bits of a
//! blank PNG and records the token in a server-side registry. Login extracts
//! the record from an uploaded image and accepts it only if the token is the
//! identity's current one, the record is inside the retention window, and the
//! country matches the one resolved for the login request.

pub mod auth;
pub mod config;
pub mod context;
pub mod delivery;
pub mod gateway;
pub mod registry;
pub mod stego;
pub mod token;

pub use config::Config;
pub use context::{ContextProvider, RequestContext};
pub use registry::{MemoryRegistry, Registry, RegistryEntry, SqliteRegistry};
pub use token::{Accepted, IssuedToken, Rejection, TokenIssuer, TokenVerifier, VerifyError};
