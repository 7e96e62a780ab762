//! Filesystem outbox: drops issued images into a directory instead of
//! mailing them. Useful for development and for hosts that ship mail
//! through a separate pipeline.

use super::DeliveryChannel;
use crate::token::IssuedToken;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub struct OutboxDelivery {
    dir: PathBuf,
}

impl OutboxDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create outbox {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<identity with unsafe characters replaced>-<first 12 token chars>.png`
    pub fn file_name(issued: &IssuedToken) -> String {
        let safe: String = issued
            .identity
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let prefix: String = issued.token.chars().take(12).collect();
        format!("{safe}-{prefix}.png")
    }
}

impl DeliveryChannel for OutboxDelivery {
    fn name(&self) -> &str {
        "outbox"
    }

    fn deliver(&self, issued: &IssuedToken) -> Result<()> {
        let path = self.dir.join(Self::file_name(issued));
        std::fs::write(&path, &issued.png)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "Authentication image written to outbox");
        Ok(())
    }
}
