//! Endpoint discovery subsystem.
//!
//! # Data Flow
//! ```text
//! startup:
//!     chainlist.rs (registry + disk cache)
//!     → validate.rs (filter, probe, median-lag filter, latency sort)
//!     → enrich_pool (merge into EndpointPool, capped)
//!
//! every refresh interval (monitor.rs):
//!     probe.rs over every pool endpoint
//!     → re-score, exclude / re-admit
//!     → top up from the registry
//! ```
//!
//! # Design Decisions
//! - Discovery only produces URLs; it never issues transactions
//! - Failures anywhere here leave the pool as it was
//! - Forked test networks are never enriched

pub mod chainlist;
pub mod monitor;
pub mod probe;
pub mod validate;

use thiserror::Error;

use crate::pool::endpoint::is_ephemeral_url;
use crate::pool::EndpointPool;

pub use chainlist::{CandidateSource, ChainlistRegistry, RpcEntry, StaticSource};
pub use monitor::{DiscoveryMonitor, WatchedPool};
pub use probe::{HttpProber, Prober};
pub use validate::{EndpointValidator, ValidationSettings, MAX_BLOCK_LAG};

/// Hard cap on endpoints per chain.
pub const MAX_RPCS: usize = 20;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry JSON invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Merge validated registry endpoints into `pool`. Returns how many were
/// added. Skipped for ephemeral networks and full pools.
pub async fn enrich_pool(pool: &EndpointPool, validator: &validate::EndpointValidator, ephemeral: bool) -> usize {
    let urls = pool.urls();
    let ephemeral = ephemeral || urls.first().map(|u| is_ephemeral_url(u)).unwrap_or(false);
    if ephemeral {
        tracing::debug!(chain_id = pool.chain_id(), url = ?urls.first(), "Skipping enrichment for ephemeral network");
        return 0;
    }
    if pool.is_full() {
        tracing::debug!(chain_id = pool.chain_id(), size = pool.len(), "Pool full, skipping enrichment");
        return 0;
    }

    let room = pool.max_size() - pool.len();
    let extra = validator.validate(pool.chain_id(), &urls, room).await;
    let added = pool.merge(extra);
    if added > 0 {
        tracing::info!(chain_id = pool.chain_id(), added, total = pool.len(), "Enriched endpoint pool");
    }
    added
}
