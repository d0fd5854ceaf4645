use crate::shared::error::WatcherError;
use crate::shared::types::Pubkey;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Somewhere the watched public keys come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    fn name(&self) -> &str;

    async fn load(&self) -> Result<HashSet<Pubkey>>;
}

/// Plain text file, one key per line. Re-read on every refresh so it can be
/// edited without restarting.
pub struct FileKeySource {
    path: PathBuf,
    name: String,
}

impl FileKeySource {
    pub fn new(path: PathBuf) -> Self {
        let name = format!("file:{}", path.display());
        Self { path, name }
    }
}

pub(crate) fn parse_key_lines(content: &str) -> HashSet<Pubkey> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.parse::<Pubkey>() {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Ignoring malformed key line: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl KeySource for FileKeySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<HashSet<Pubkey>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| WatcherError::KeySource {
                source_name: self.name.clone(),
                reason: e.to_string(),
            })?;

        let keys = parse_key_lines(&content);
        debug!("Loaded {} keys from {}", keys.len(), self.name);
        Ok(keys)
    }
}

/// Keys managed by a Web3Signer instance.
pub struct Web3SignerKeySource {
    url: String,
    name: String,
    http_client: Client,
}

impl Web3SignerKeySource {
    pub fn new(url: String, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            name: format!("web3signer:{}", url),
            url: url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn failure(&self, reason: impl ToString) -> WatcherError {
        WatcherError::KeySource {
            source_name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl KeySource for Web3SignerKeySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<HashSet<Pubkey>> {
        let response = self
            .http_client
            .get(format!("{}/api/v1/eth2/publicKeys", self.url))
            .send()
            .await
            .map_err(|e| self.failure(e))?;

        if !response.status().is_success() {
            return Err(self.failure(format!("status {}", response.status())).into());
        }

        let raw: Vec<String> = response.json().await.map_err(|e| self.failure(e))?;

        Ok(raw
            .iter()
            .filter_map(|key| match key.parse::<Pubkey>() {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!("{} returned a malformed key: {}", self.name, e);
                    None
                }
            })
            .collect())
    }
}
