//! Public endpoint registry (Chainlist `rpcs.json`) with an on-disk cache.
//!
//! Lookup order: fresh cache, network, stale cache, nothing. Fetching never
//! fails the caller; an unreachable registry just means no new candidates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::DiscoveryConfig;
use crate::discovery::DiscoveryError;

/// One endpoint as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking: Option<String>,
    #[serde(default, rename = "isOpenSource", skip_serializing_if = "Option::is_none")]
    pub is_open_source: Option<bool>,
}

impl RpcEntry {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tracking: None,
            is_open_source: None,
        }
    }

    /// Registry marks the endpoint as logging user data.
    pub fn is_tracking(&self) -> bool {
        matches!(self.tracking.as_deref(), Some("yes") | Some("limited"))
    }
}

/// Registry entries are either bare URL strings or objects.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRpc {
    Url(String),
    Entry(RpcEntry),
}

#[derive(Deserialize)]
struct ChainRecord {
    #[serde(rename = "chainId")]
    chain_id: u64,
    #[serde(default)]
    rpc: Vec<RawRpc>,
}

/// Source of candidate endpoints for a chain.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch_candidates(&self, chain_id: u64) -> Vec<RpcEntry>;
}

/// Pull the entries of `chain_id` out of a full registry document.
/// Chains that fail to parse are skipped, not fatal.
pub fn parse_registry(document: &serde_json::Value, chain_id: u64) -> Vec<RpcEntry> {
    let Some(chains) = document.as_array() else {
        return Vec::new();
    };
    chains
        .iter()
        .filter(|c| c.get("chainId").and_then(|v| v.as_u64()) == Some(chain_id))
        .filter_map(|c| serde_json::from_value::<ChainRecord>(c.clone()).ok())
        .flat_map(|record| record.rpc)
        .map(|raw| match raw {
            RawRpc::Url(url) => RpcEntry::new(url),
            RawRpc::Entry(entry) => entry,
        })
        .filter(|entry| !entry.url.is_empty())
        .collect()
}

/// Chainlist-backed [`CandidateSource`].
#[derive(Debug, Clone)]
pub struct ChainlistRegistry {
    client: reqwest::Client,
    registry_url: String,
    cache_dir: PathBuf,
    ttl: Duration,
}

impl ChainlistRegistry {
    pub fn new(config: &DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .user_agent(concat!("chain-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            registry_url: config.registry_url.clone(),
            cache_dir: config.cache_dir.clone(),
            ttl: Duration::from_secs(config.cache_ttl_secs),
        })
    }

    pub fn cache_path(&self, chain_id: u64) -> PathBuf {
        self.cache_dir.join(format!("chainlist_{}.json", chain_id))
    }

    async fn fetch_remote(&self, chain_id: u64) -> Result<Vec<RpcEntry>, DiscoveryError> {
        let document: serde_json::Value = self
            .client
            .get(&self.registry_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(parse_registry(&document, chain_id))
    }

    async fn write_cache(&self, path: &Path, entries: &[RpcEntry]) -> Result<(), DiscoveryError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let body = serde_json::to_vec_pretty(entries)?;
        tokio::fs::write(path, body).await?;
        Ok(())
    }
}

/// Cached entries and whether they are younger than `ttl`.
pub async fn read_cache(path: &Path, ttl: Duration) -> Option<(Vec<RpcEntry>, bool)> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let fresh = metadata
        .modified()
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .map(|age| age < ttl)
        .unwrap_or(false);
    let body = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice::<Vec<RpcEntry>>(&body) {
        Ok(entries) => Some((entries, fresh)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable registry cache");
            None
        }
    }
}

#[async_trait]
impl CandidateSource for ChainlistRegistry {
    async fn fetch_candidates(&self, chain_id: u64) -> Vec<RpcEntry> {
        let path = self.cache_path(chain_id);
        let cached = read_cache(&path, self.ttl).await;

        if let Some((entries, true)) = &cached {
            tracing::debug!(chain_id, count = entries.len(), "Using fresh registry cache");
            return entries.clone();
        }

        match self.fetch_remote(chain_id).await {
            Ok(entries) => {
                if let Err(e) = self.write_cache(&path, &entries).await {
                    tracing::warn!(chain_id, error = %e, "Failed to write registry cache");
                }
                tracing::info!(chain_id, count = entries.len(), "Fetched registry candidates");
                entries
            }
            Err(e) => match cached {
                Some((entries, _)) => {
                    tracing::warn!(chain_id, error = %e, "Registry unreachable, using stale cache");
                    entries
                }
                None => {
                    tracing::warn!(chain_id, error = %e, "Registry unreachable and no cache");
                    Vec::new()
                }
            },
        }
    }
}

/// Fixed candidate list.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub entries: Vec<RpcEntry>,
}

#[async_trait]
impl CandidateSource for StaticSource {
    async fn fetch_candidates(&self, _chain_id: u64) -> Vec<RpcEntry> {
        self.entries.clone()
    }
}
