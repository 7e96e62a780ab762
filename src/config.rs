//! TOML configuration with environment overrides.
//!
//! Lookup order: explicit `--config` path, then
//! `<config_dir>/stegokey/config.toml`, then built-in defaults.

use crate::delivery::{smtp::DEFAULT_SUBJECT, DeliveryChannel, OutboxDelivery, SmtpDelivery};
use crate::stego::carrier::{DEFAULT_HEIGHT, DEFAULT_MAX_DIMENSION, DEFAULT_WIDTH};
use crate::stego::CarrierSpec;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Smallest payload capacity accepted for the carrier. A record holds an
/// address, four free-text context fields, a timestamp and a 64-char token.
pub const MIN_CARRIER_CAPACITY: u64 = 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub token: TokenConfig,
    pub geo: GeoConfig,
    pub mail: MailConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that sets these headers.
    pub trust_forwarded_for: bool,
    pub max_upload_bytes: usize,
    pub request_timeout_secs: u64,
    /// 0 disables login rate limiting.
    pub login_attempts_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".into(),
            trust_forwarded_for: false,
            max_upload_bytes: 8 * 1024 * 1024,
            request_timeout_secs: 30,
            login_attempts_per_minute: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    /// Archive of issued PNGs, written as `<image_dir>/<image_reference>`.
    pub image_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("stegokey.db"),
            image_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub retention_days: i64,
    pub carrier_width: u32,
    pub carrier_height: u32,
    pub max_upload_dimension: u32,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            retention_days: crate::token::verifier::DEFAULT_RETENTION_DAYS,
            carrier_width: DEFAULT_WIDTH,
            carrier_height: DEFAULT_HEIGHT,
            max_upload_dimension: DEFAULT_MAX_DIMENSION,
        }
    }
}

impl TokenConfig {
    pub fn carrier(&self) -> CarrierSpec {
        CarrierSpec::new(self.carrier_width, self.carrier_height)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: crate::context::geo::DEFAULT_ENDPOINT.into(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox; defaults to `username`.
    pub from: Option<String>,
    pub subject: String,
    /// When set, images are written here instead of being mailed.
    pub outbox_dir: Option<PathBuf>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".into(),
            smtp_port: 587,
            username: None,
            password: None,
            from: None,
            subject: DEFAULT_SUBJECT.into(),
            outbox_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: crate::auth::store::DEFAULT_SESSION_TTL_SECS,
        }
    }
}

impl Config {
    /// Load, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    tracing::debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Mail credentials from the environment win over the file.
    /// `STEGOKEY_MAIL_*` takes precedence over the legacy `EMAIL_*` names.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let pick = |keys: [&str; 2]| {
            keys.into_iter()
                .filter_map(&lookup)
                .map(|value| value.trim().to_string())
                .find(|value| !value.is_empty())
        };

        if let Some(username) = pick(["STEGOKEY_MAIL_USERNAME", "EMAIL_USER"]) {
            self.mail.username = Some(username);
        }
        if let Some(password) = pick(["STEGOKEY_MAIL_PASSWORD", "EMAIL_PASSWORD"]) {
            self.mail.password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.retention_days <= 0 {
            bail!("[token] retention_days must be positive");
        }

        let Some(capacity) = self.token.carrier().capacity_bytes() else {
            bail!(
                "[token] carrier {}x{} is too large to allocate",
                self.token.carrier_width,
                self.token.carrier_height
            );
        };
        if capacity < MIN_CARRIER_CAPACITY {
            bail!(
                "[token] carrier {}x{} holds {capacity} bytes, need at least {MIN_CARRIER_CAPACITY}",
                self.token.carrier_width,
                self.token.carrier_height
            );
        }

        if self.token.max_upload_dimension < self.token.carrier_width.max(self.token.carrier_height) {
            bail!("[token] max_upload_dimension is smaller than the carrier itself");
        }

        Ok(())
    }

    /// Checked only by commands that deliver images; offline issuance and
    /// verification work without mail settings.
    pub fn validate_delivery(&self) -> Result<()> {
        if self.mail.outbox_dir.is_none()
            && (self.mail.username.is_none() || self.mail.password.is_none())
        {
            bail!(
                "[mail] needs username and password (or STEGOKEY_MAIL_USERNAME / \
                 STEGOKEY_MAIL_PASSWORD), or an outbox_dir"
            );
        }
        Ok(())
    }

    /// Outbox when configured, SMTP otherwise.
    pub fn build_delivery(&self) -> Result<Arc<dyn DeliveryChannel>> {
        self.validate_delivery()?;
        if let Some(dir) = &self.mail.outbox_dir {
            return Ok(Arc::new(OutboxDelivery::new(dir)?));
        }

        let (Some(username), Some(password)) = (&self.mail.username, &self.mail.password) else {
            bail!("SMTP delivery requires mail username and password");
        };
        let from = self.mail.from.as_deref().unwrap_or(username);
        Ok(Arc::new(SmtpDelivery::new(
            &self.mail.smtp_host,
            self.mail.smtp_port,
            username,
            password,
            from,
            &self.mail.subject,
        )?))
    }
}

/// `<config_dir>/stegokey/config.toml` for the current user.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "stegokey")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
