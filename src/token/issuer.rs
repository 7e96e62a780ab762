//! Registration and reset: mint a token, embed it, record it.

use super::record::{truncate_to_seconds, AuthRecord, RecordError};
use super::source::{Clock, OsTokenSource, SystemClock, TokenSource};
use crate::context::RequestContext;
use crate::registry::{Registry, RegistryEntry, RegistryError};
use crate::stego::{carrier, codec, CarrierError, CarrierSpec, CodecError};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("authentication record is incomplete: `{0}` is empty")]
    IncompleteRecord(&'static str),
    #[error("could not serialize record: {0}")]
    Serialize(#[from] RecordError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Carrier(#[from] CarrierError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The artifact handed to the delivery channel.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub identity: String,
    pub token: String,
    /// Archive name for the image, as stored in the registry.
    pub image_reference: String,
    pub issued_at: DateTime<Utc>,
    /// Rendered PNG carrying the embedded record.
    pub png: Vec<u8>,
}

/// Mints image tokens. One registry write per call.
pub struct TokenIssuer {
    registry: Arc<dyn Registry>,
    tokens: Arc<dyn TokenSource>,
    clock: Arc<dyn Clock>,
    carrier: CarrierSpec,
}

impl TokenIssuer {
    pub fn new(registry: Arc<dyn Registry>, carrier: CarrierSpec) -> Self {
        Self {
            registry,
            tokens: Arc::new(OsTokenSource),
            clock: Arc::new(SystemClock),
            carrier,
        }
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn carrier(&self) -> CarrierSpec {
        self.carrier
    }

    /// Issue a fresh image token for `identity`, superseding any prior one.
    ///
    /// The registry is written before returning, so a failed delivery can be
    /// retried with the returned artifact.
    pub fn issue(&self, identity: &str, context: &RequestContext) -> Result<IssuedToken, IssueError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(IssueError::IncompleteRecord("identity"));
        }

        let now = truncate_to_seconds(self.clock.now());
        let record = AuthRecord {
            client_address: context.client_address.clone(),
            city: context.city.clone(),
            country: context.country.clone(),
            os_name: context.os_name.clone(),
            browser_name: context.browser_name.clone(),
            issued_at: now,
            token: self.tokens.next_token(),
        };
        if let Some(field) = record.first_empty_field() {
            return Err(IssueError::IncompleteRecord(field));
        }

        let payload = record.to_bytes()?;
        let stego = codec::embed(&self.carrier.blank(), &payload)?;
        let png = carrier::render_png(&stego)?;

        let image_reference = format!("{}.png", record.token);
        self.registry.upsert(RegistryEntry {
            identity: identity.to_string(),
            token: record.token.clone(),
            image_reference: image_reference.clone(),
            created_at: now,
            last_reset_at: now,
        })?;

        tracing::info!(
            identity,
            country = %record.country,
            payload_bytes = payload.len(),
            "Authentication image issued"
        );

        Ok(IssuedToken {
            identity: identity.to_string(),
            token: record.token,
            image_reference,
            issued_at: now,
            png,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::stego::carrier::decode;
    use crate::token::source::{ManualClock, SeededTokenSource};
    use chrono::TimeZone;
    use std::collections::HashSet;

    fn context() -> RequestContext {
        RequestContext {
            client_address: "203.0.113.7".into(),
            city: "Testville".into(),
            country: "Testland".into(),
            os_name: "TestOS".into(),
            browser_name: "TestBrowser".into(),
        }
    }

    fn issuer(registry: Arc<MemoryRegistry>) -> TokenIssuer {
        TokenIssuer::new(registry, CarrierSpec::new(64, 64))
            .with_token_source(Arc::new(SeededTokenSource::new(42)))
    }

    #[test]
    fn issued_image_carries_the_record() {
        let registry = Arc::new(MemoryRegistry::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap(),
        ));
        let issued = issuer(registry.clone())
            .with_clock(clock)
            .issue("a@example.com", &context())
            .unwrap();

        let pixels = decode(&issued.png, 4096).unwrap();
        assert_eq!((pixels.width(), pixels.height()), (64, 64));
        let record = AuthRecord::from_bytes(&codec::extract(&pixels).unwrap()).unwrap();

        assert_eq!(record.token, issued.token);
        assert_eq!(record.country, "Testland");
        assert_eq!(record.city, "Testville");
        assert_eq!(record.os_name, "TestOS");
        assert_eq!(record.browser_name, "TestBrowser");
        assert_eq!(record.client_address, "203.0.113.7");
        assert_eq!(record.issued_at, issued.issued_at);
        assert_eq!(issued.image_reference, format!("{}.png", issued.token));
    }

    #[test]
    fn issuance_writes_registry_entry() {
        let registry = Arc::new(MemoryRegistry::new());
        let issued = issuer(registry.clone())
            .issue("  a@example.com ", &context())
            .unwrap();

        let entry = registry.find_by_identity("a@example.com").unwrap().unwrap();
        assert_eq!(entry.token, issued.token);
        assert_eq!(entry.image_reference, issued.image_reference);
        assert_eq!(entry.created_at, issued.issued_at);
        assert_eq!(entry.last_reset_at, issued.issued_at);
    }

    #[test]
    fn seeded_issuance_never_repeats_tokens() {
        let registry = Arc::new(MemoryRegistry::new());
        let issuer = issuer(registry.clone());
        let mut seen = HashSet::new();
        for i in 0..200 {
            let issued = issuer.issue(&format!("user{i}@example.com"), &context()).unwrap();
            assert!(seen.insert(issued.token), "duplicate token at {i}");
        }
        assert_eq!(registry.len(), 200);
    }

    #[test]
    fn reset_leaves_one_entry() {
        let registry = Arc::new(MemoryRegistry::new());
        let issuer = issuer(registry.clone());
        let first = issuer.issue("a@example.com", &context()).unwrap();
        let second = issuer.issue("a@example.com", &context()).unwrap();

        assert_ne!(first.token, second.token);
        assert_eq!(registry.len(), 1);
        assert!(registry.find_by_token(&first.token).unwrap().is_none());
    }

    #[test]
    fn empty_context_field_is_incomplete() {
        let registry = Arc::new(MemoryRegistry::new());
        let mut ctx = context();
        ctx.country = "  ".into();

        let err = issuer(registry.clone()).issue("a@example.com", &ctx).unwrap_err();
        assert!(matches!(err, IssueError::IncompleteRecord("country")));
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_identity_is_incomplete() {
        let registry = Arc::new(MemoryRegistry::new());
        let err = issuer(registry).issue("", &context()).unwrap_err();
        assert!(matches!(err, IssueError::IncompleteRecord("identity")));
    }

    #[test]
    fn carrier_too_small_is_capacity_exceeded() {
        let registry = Arc::new(MemoryRegistry::new());
        let err = TokenIssuer::new(registry.clone(), CarrierSpec::new(8, 8))
            .issue("a@example.com", &context())
            .unwrap_err();
        assert!(matches!(
            err,
            IssueError::Codec(CodecError::CapacityExceeded { .. })
        ));
        assert!(registry.is_empty());
    }
}
