//! Issue → deliver → verify through the public API, against both registries.

use chrono::{Duration, TimeZone, Utc};
use std::sync::Arc;
use stegokey::delivery::{DeliveryChannel, OutboxDelivery};
use stegokey::stego::{carrier, CarrierSpec};
use stegokey::token::{Clock, ManualClock, SeededTokenSource};
use stegokey::{
    MemoryRegistry, Registry, Rejection, RequestContext, SqliteRegistry, TokenIssuer,
    TokenVerifier,
};
use tempfile::TempDir;

fn test_context() -> RequestContext {
    RequestContext {
        client_address: "203.0.113.7".into(),
        city: "Testville".into(),
        country: "Testland".into(),
        os_name: "TestOS".into(),
        browser_name: "TestBrowser".into(),
    }
}

#[test]
fn issue_then_verify_same_context_is_accepted() {
    let registry = Arc::new(MemoryRegistry::new());
    let issuer = TokenIssuer::new(registry.clone(), CarrierSpec::default());
    let verifier = TokenVerifier::new(registry);

    let issued = issuer.issue("a@example.com", &test_context()).unwrap();
    let accepted = verifier.verify(&issued.png, &test_context()).unwrap();

    assert_eq!(accepted.identity, "a@example.com");
    assert_eq!(accepted.record.city, "Testville");
    assert_eq!(accepted.record.os_name, "TestOS");
    assert_eq!(accepted.record.browser_name, "TestBrowser");
    assert_eq!(accepted.record.token, issued.token);
}

#[test]
fn delivered_png_is_a_standard_800x600_image() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(MemoryRegistry::new());
    let issuer = TokenIssuer::new(registry, CarrierSpec::default());
    let issued = issuer.issue("a@example.com", &test_context()).unwrap();

    let outbox = OutboxDelivery::new(tmp.path()).unwrap();
    outbox.deliver(&issued).unwrap();

    let written = std::fs::read(tmp.path().join(OutboxDelivery::file_name(&issued))).unwrap();
    let pixels = carrier::decode(&written, carrier::DEFAULT_MAX_DIMENSION).unwrap();
    assert_eq!((pixels.width(), pixels.height(), pixels.channels()), (800, 600, 3));
}

#[test]
fn sqlite_reset_supersedes_previous_image() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(SqliteRegistry::open(&tmp.path().join("stegokey.db")).unwrap());
    let issuer = TokenIssuer::new(registry.clone(), CarrierSpec::default())
        .with_token_source(Arc::new(SeededTokenSource::new(7)));
    let verifier = TokenVerifier::new(registry.clone());

    let first = issuer.issue("a@example.com", &test_context()).unwrap();
    let second = issuer.issue("a@example.com", &test_context()).unwrap();
    assert_ne!(first.token, second.token);
    assert_eq!(registry.count().unwrap(), 1);

    let err = verifier.verify(&first.png, &test_context()).unwrap_err();
    assert_eq!(err.rejection(), Some(&Rejection::InvalidToken));
    assert_eq!(
        verifier.verify(&second.png, &test_context()).unwrap().identity,
        "a@example.com"
    );
}

#[test]
fn registry_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("stegokey.db");

    let png = {
        let registry = Arc::new(SqliteRegistry::open(&path).unwrap());
        let issuer = TokenIssuer::new(registry, CarrierSpec::default());
        issuer.issue("a@example.com", &test_context()).unwrap().png
    };

    let registry = Arc::new(SqliteRegistry::open(&path).unwrap());
    let verifier = TokenVerifier::new(registry.clone());
    assert!(verifier.verify(&png, &test_context()).is_ok());
    assert!(registry.find_by_identity("a@example.com").unwrap().is_some());
}

#[test]
fn expired_image_is_rejected_and_pruned() {
    let tmp = TempDir::new().unwrap();
    let registry = Arc::new(SqliteRegistry::open(&tmp.path().join("stegokey.db")).unwrap());
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));

    let issuer = TokenIssuer::new(registry.clone(), CarrierSpec::default()).with_clock(clock.clone());
    let verifier = TokenVerifier::new(registry.clone()).with_clock(clock.clone());

    let issued = issuer.issue("a@example.com", &test_context()).unwrap();
    clock.advance(Duration::days(8));

    let err = verifier.verify(&issued.png, &test_context()).unwrap_err();
    assert!(matches!(err.rejection(), Some(Rejection::Expired { .. })));

    let removed = registry.prune_expired(clock.now() - Duration::days(7)).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(registry.count().unwrap(), 0);
}

#[test]
fn login_from_another_country_is_rejected() {
    let registry = Arc::new(MemoryRegistry::new());
    let issuer = TokenIssuer::new(registry.clone(), CarrierSpec::default());
    let verifier = TokenVerifier::new(registry);

    let issued = issuer.issue("a@example.com", &test_context()).unwrap();
    let mut elsewhere = test_context();
    elsewhere.country = "Elsewhere".into();

    let err = verifier.verify(&issued.png, &elsewhere).unwrap_err();
    assert_eq!(
        err.rejection(),
        Some(&Rejection::GeoMismatch {
            issued: "Testland".into(),
            current: "Elsewhere".into(),
        })
    );
}
