//! Request-time environmental signals.
//!
//! The provider turns a client address and User-Agent header into the
//! [`RequestContext`] that issuance embeds and verification compares against.
//! Any signal that cannot be determined becomes `"Unknown"`; loopback clients
//! get `"Local"` for city and country without a remote lookup.
//!
//! Country strings are compared verbatim at login, so the same resolver must
//! serve issuance and verification. A provider that answers inconsistently
//! for one location will cause false `GeoMismatch` rejections.

pub mod geo;
pub mod user_agent;

pub use geo::{GeoLocation, GeoResolver, IpApiResolver, StaticGeoResolver};

use crate::token::record::{LOCAL, UNKNOWN};
use std::net::IpAddr;
use std::sync::Arc;

/// Resolved signals for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub client_address: String,
    pub city: String,
    pub country: String,
    pub os_name: String,
    pub browser_name: String,
}

impl RequestContext {
    /// Context with every signal set to `"Unknown"` except the address.
    pub fn unknown(client_address: impl Into<String>) -> Self {
        Self {
            client_address: client_address.into(),
            city: UNKNOWN.into(),
            country: UNKNOWN.into(),
            os_name: UNKNOWN.into(),
            browser_name: UNKNOWN.into(),
        }
    }
}

/// `true` for the addresses the original deployment treated as local.
pub fn is_local_address(address: &str) -> bool {
    let trimmed = address.trim();
    if trimmed.eq_ignore_ascii_case("localhost") {
        return true;
    }
    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(|ip| match ip {
            IpAddr::V4(v4) => v4.is_loopback(),
            // Dual-stack listeners report IPv4 peers as `::ffff:a.b.c.d`.
            IpAddr::V6(v6) => {
                v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
            }
        })
        .unwrap_or(false)
}

/// Builds [`RequestContext`]s from raw request data.
#[derive(Clone)]
pub struct ContextProvider {
    geo: Option<Arc<dyn GeoResolver>>,
}

impl ContextProvider {
    pub fn new(geo: Arc<dyn GeoResolver>) -> Self {
        Self { geo: Some(geo) }
    }

    /// A provider that never performs geo lookups; every non-local country
    /// resolves to `"Unknown"`.
    pub fn without_geo() -> Self {
        Self { geo: None }
    }

    pub async fn resolve(&self, client_address: &str, user_agent: Option<&str>) -> RequestContext {
        let mut context = RequestContext::unknown(client_address);

        if let Some(ua) = user_agent {
            let parsed = user_agent::parse(ua);
            if let Some(os) = parsed.os {
                context.os_name = os.to_string();
            }
            if let Some(browser) = parsed.browser {
                context.browser_name = browser.to_string();
            }
        }

        if is_local_address(client_address) {
            tracing::debug!(client_address, "Local address, skipping geo lookup");
            context.city = LOCAL.into();
            context.country = LOCAL.into();
            return context;
        }

        let (Some(geo), Ok(ip)) = (self.geo.as_ref(), client_address.trim().parse::<IpAddr>())
        else {
            return context;
        };

        match geo.locate(ip).await {
            Ok(location) => {
                if let Some(city) = location.city.filter(|c| !c.trim().is_empty()) {
                    context.city = city;
                }
                if let Some(country) = location.country.filter(|c| !c.trim().is_empty()) {
                    context.country = country;
                }
            }
            Err(e) => {
                tracing::warn!(client_address, "Geo lookup failed, using defaults: {e:#}");
            }
        }

        context
    }
}
