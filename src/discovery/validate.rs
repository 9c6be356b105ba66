//! Candidate filtering and health scoring.
//!
//! ```text
//! registry entries
//!   → drop templates, insecure, tracking (opt-in), already configured
//!   → probe (bounded concurrency)
//!   → drop endpoints lagging the median height by MAX_BLOCK_LAG or more
//!   → sort by latency, truncate
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};

use crate::config::DiscoveryConfig;
use crate::discovery::chainlist::{CandidateSource, RpcEntry};
use crate::discovery::probe::Prober;
use crate::pool::endpoint::{is_template_url, normalize_url};
use crate::pool::ProbeResult;

/// Blocks behind the median at which an endpoint counts as stale.
pub const MAX_BLOCK_LAG: u64 = 100;

#[derive(Debug, Clone)]
pub struct ValidationSettings {
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
    pub max_block_lag: u64,
    pub require_https: bool,
    pub exclude_tracking: bool,
}

impl From<&DiscoveryConfig> for ValidationSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            max_concurrent_probes: config.max_concurrent_probes.max(1),
            max_block_lag: config.max_block_lag,
            require_https: config.require_https,
            exclude_tracking: config.exclude_tracking,
        }
    }
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

/// URLs worth probing: no templates, secure when required, not already
/// known (after normalization), no duplicates.
pub fn filter_candidates(
    entries: &[RpcEntry],
    existing: &[String],
    settings: &ValidationSettings,
) -> Vec<String> {
    let mut seen: HashSet<String> = existing.iter().map(|u| normalize_url(u)).collect();
    entries
        .iter()
        .filter(|e| !is_template_url(&e.url))
        // health checks and backends speak HTTP, so wss:// is dropped along with http://
        .filter(|e| !settings.require_https || e.url.trim().to_lowercase().starts_with("https://"))
        .filter(|e| !(settings.exclude_tracking && e.is_tracking()))
        .filter(|e| seen.insert(normalize_url(&e.url)))
        .map(|e| e.url.trim().to_string())
        .collect()
}

/// Median of the heights; even-sized sets average the middle pair.
pub fn median_height(heights: &[u64]) -> Option<u64> {
    if heights.is_empty() {
        return None;
    }
    let mut sorted = heights.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some(sorted[mid - 1] / 2 + sorted[mid] / 2 + (sorted[mid - 1] % 2 + sorted[mid] % 2) / 2)
    } else {
        Some(sorted[mid])
    }
}

/// Drop laggards, sort fastest first, keep `max_results`.
pub fn select_healthy(results: Vec<ProbeResult>, max_lag: u64, max_results: usize) -> Vec<ProbeResult> {
    let heights: Vec<u64> = results.iter().map(|r| r.block_height).collect();
    let Some(median) = median_height(&heights) else {
        return Vec::new();
    };

    let mut healthy: Vec<ProbeResult> = results
        .into_iter()
        .filter(|r| {
            let lag = median.saturating_sub(r.block_height);
            if lag >= max_lag {
                tracing::debug!(url = %r.url, height = r.block_height, median, "Dropping lagging endpoint");
                false
            } else {
                true
            }
        })
        .collect();
    healthy.sort_by_key(|r| r.latency_ms);
    healthy.truncate(max_results);
    healthy
}

/// Probe every URL with at most `concurrency` probes in flight.
pub async fn probe_all(
    prober: &dyn Prober,
    urls: Vec<String>,
    timeout: Duration,
    concurrency: usize,
) -> Vec<(String, Option<ProbeResult>)> {
    stream::iter(urls)
        .map(|url| async move {
            let result = prober.probe(&url, timeout).await;
            (url, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await
}

/// Turns registry candidates into a ranked list of usable endpoints.
pub struct EndpointValidator {
    source: Arc<dyn CandidateSource>,
    prober: Arc<dyn Prober>,
    settings: ValidationSettings,
}

impl EndpointValidator {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        prober: Arc<dyn Prober>,
        settings: ValidationSettings,
    ) -> Self {
        Self {
            source,
            prober,
            settings,
        }
    }

    pub fn prober(&self) -> &Arc<dyn Prober> {
        &self.prober
    }

    pub fn settings(&self) -> &ValidationSettings {
        &self.settings
    }

    /// Healthy new endpoints for `chain_id`, fastest first, at most
    /// `max_results`. URLs in `existing` are never returned.
    pub async fn validate(&self, chain_id: u64, existing: &[String], max_results: usize) -> Vec<String> {
        self.validate_scored(chain_id, existing, max_results)
            .await
            .into_iter()
            .map(|r| r.url)
            .collect()
    }

    /// Same as [`validate`](Self::validate) but keeps the probe data.
    pub async fn validate_scored(
        &self,
        chain_id: u64,
        existing: &[String],
        max_results: usize,
    ) -> Vec<ProbeResult> {
        if max_results == 0 {
            return Vec::new();
        }
        let entries = self.source.fetch_candidates(chain_id).await;
        let candidates = filter_candidates(&entries, existing, &self.settings);
        if candidates.is_empty() {
            tracing::debug!(chain_id, "No new candidates to probe");
            return Vec::new();
        }

        let total = candidates.len();
        let probed = probe_all(
            self.prober.as_ref(),
            candidates,
            self.settings.probe_timeout,
            self.settings.max_concurrent_probes,
        )
        .await;
        let alive: Vec<ProbeResult> = probed.into_iter().filter_map(|(_, r)| r).collect();
        let selected = select_healthy(alive, self.settings.max_block_lag, max_results);

        tracing::info!(
            chain_id,
            candidates = total,
            selected = selected.len(),
            "Validated registry endpoints"
        );
        selected
    }
}
