//! Login: decide whether a submitted image is a current, consistent proof.
//!
//! Checks run in a fixed order and the first failure decides the outcome:
//! extract/parse → registry lookup → age → country.

use super::record::AuthRecord;
use super::source::{Clock, SystemClock};
use crate::context::RequestContext;
use crate::registry::{Registry, RegistryError};
use crate::stego::{carrier, codec, PixelBuffer};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Default retention window: 7 days.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// Why a submitted image was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("image does not carry a readable authentication record: {0}")]
    Malformed(String),
    #[error("authentication image is not recognized")]
    InvalidToken,
    #[error("authentication image has expired (issued {issued_at})")]
    Expired { issued_at: DateTime<Utc> },
    #[error("login attempt from a different country (issued in {issued}, now {current})")]
    GeoMismatch { issued: String, current: String },
}

impl Rejection {
    /// Stable machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::InvalidToken => "invalid_token",
            Self::Expired { .. } => "expired",
            Self::GeoMismatch { .. } => "geo_mismatch",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl VerifyError {
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Rejected(rejection) => Some(rejection),
            Self::Registry(_) => None,
        }
    }
}

/// A successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    /// Identity of the matching registry entry.
    pub identity: String,
    pub record: AuthRecord,
}

pub struct TokenVerifier {
    registry: Arc<dyn Registry>,
    clock: Arc<dyn Clock>,
    retention: Duration,
    max_dimension: u32,
}

impl TokenVerifier {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            clock: Arc::new(SystemClock),
            retention: Duration::days(DEFAULT_RETENTION_DAYS),
            max_dimension: carrier::DEFAULT_MAX_DIMENSION,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Verify an uploaded raster file.
    pub fn verify(&self, image_bytes: &[u8], context: &RequestContext) -> Result<Accepted, VerifyError> {
        let outcome = carrier::decode(image_bytes, self.max_dimension)
            .map_err(|e| VerifyError::from(Rejection::Malformed(e.to_string())))
            .and_then(|pixels| self.verify_pixels(&pixels, context));
        log_outcome(&outcome);
        outcome
    }

    /// Verify an already-decoded carrier.
    pub fn verify_pixels(&self, pixels: &PixelBuffer, context: &RequestContext) -> Result<Accepted, VerifyError> {
        let record = read_record(pixels)?;

        let entry = self
            .registry
            .find_by_token(&record.token)?
            .ok_or(Rejection::InvalidToken)?;

        let age = self.clock.now() - record.issued_at;
        if age > self.retention {
            return Err(Rejection::Expired {
                issued_at: record.issued_at,
            }
            .into());
        }

        if record.country != context.country {
            return Err(Rejection::GeoMismatch {
                issued: record.country.clone(),
                current: context.country.clone(),
            }
            .into());
        }

        Ok(Accepted {
            identity: entry.identity,
            record,
        })
    }
}

/// Extract and parse the embedded record.
pub fn read_record(pixels: &PixelBuffer) -> Result<AuthRecord, Rejection> {
    let payload = codec::extract(pixels).map_err(|e| Rejection::Malformed(e.to_string()))?;
    AuthRecord::from_bytes(&payload).map_err(|e| Rejection::Malformed(e.to_string()))
}

fn log_outcome(outcome: &Result<Accepted, VerifyError>) {
    match outcome {
        Ok(accepted) => {
            tracing::info!(identity = %accepted.identity, "Image login accepted");
        }
        Err(VerifyError::Rejected(rejection)) => {
            tracing::warn!(kind = rejection.kind(), "Image login rejected: {rejection}");
        }
        Err(VerifyError::Registry(e)) => {
            tracing::warn!("Image login failed on registry lookup: {e}");
        }
    }
}
