//! Approximate geography for a client address.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;

/// Default ipapi.co-compatible endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://ipapi.co";

/// What a resolver could determine. Missing fields become `"Unknown"`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoLocation {
    pub city: Option<String>,
    pub country: Option<String>,
}

#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation>;
}

/// ipapi.co JSON API: `GET {endpoint}/{ip}/json/`.
pub struct IpApiResolver {
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    city: Option<String>,
    country_name: Option<String>,
    #[serde(default)]
    error: bool,
    reason: Option<String>,
}

impl IpApiResolver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stegokey/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build geo HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn lookup_url(&self, ip: IpAddr) -> String {
        format!("{}/{ip}/json/", self.endpoint)
    }
}

#[async_trait]
impl GeoResolver for IpApiResolver {
    async fn locate(&self, ip: IpAddr) -> Result<GeoLocation> {
        let resp = self.http.get(self.lookup_url(ip)).send().await?;

        if !resp.status().is_success() {
            bail!("Geo lookup returned {}", resp.status());
        }

        let body: IpApiResponse = resp.json().await.context("Invalid geo lookup response")?;
        if body.error {
            bail!(
                "Geo lookup refused: {}",
                body.reason.as_deref().unwrap_or("no reason given")
            );
        }

        tracing::debug!(%ip, city = ?body.city, country = ?body.country_name, "Geo data received");
        Ok(GeoLocation {
            city: body.city,
            country: body.country_name,
        })
    }
}

/// Always answers with the same location. Used for offline CLI runs and
/// tests.
#[derive(Debug, Clone, Default)]
pub struct StaticGeoResolver {
    location: GeoLocation,
}

impl StaticGeoResolver {
    pub fn new(city: Option<String>, country: Option<String>) -> Self {
        Self {
            location: GeoLocation { city, country },
        }
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn locate(&self, _ip: IpAddr) -> Result<GeoLocation> {
        Ok(self.location.clone())
    }
}
