//! Periodic endpoint refresh.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::discovery::enrich_pool;
use crate::discovery::validate::{median_height, probe_all, EndpointValidator};
use crate::observability::metrics;
use crate::pool::EndpointPool;

/// A pool under watch.
pub struct WatchedPool {
    pub pool: Arc<EndpointPool>,
    /// Forked test networks are re-probed but never enriched.
    pub ephemeral: bool,
}

/// Re-probes every pool on an interval: re-scores endpoints, excludes dead
/// or lagging ones, re-admits recovered ones and tops pools up from the
/// registry.
pub struct DiscoveryMonitor {
    pools: Vec<WatchedPool>,
    validator: Arc<EndpointValidator>,
    interval: Duration,
}

impl DiscoveryMonitor {
    pub fn new(pools: Vec<WatchedPool>, validator: Arc<EndpointValidator>, interval: Duration) -> Self {
        Self {
            pools,
            validator,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            pools = self.pools.len(),
            interval_secs = self.interval.as_secs(),
            "Discovery monitor starting"
        );

        // pools were just enriched at startup; first refresh after one interval
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Discovery monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub async fn refresh_all(&self) {
        for watched in &self.pools {
            refresh_pool(&watched.pool, &self.validator).await;
            if !watched.ephemeral {
                enrich_pool(&watched.pool, &self.validator, false).await;
            }
        }
    }
}

/// Probe every endpoint of `pool` once and fold the results in.
pub async fn refresh_pool(pool: &EndpointPool, validator: &EndpointValidator) {
    let settings = validator.settings();
    let results = probe_all(
        validator.prober().as_ref(),
        pool.urls(),
        settings.probe_timeout,
        settings.max_concurrent_probes,
    )
    .await;

    let heights: Vec<u64> = results
        .iter()
        .filter_map(|(_, r)| r.as_ref().map(|r| r.block_height))
        .collect();
    let median = median_height(&heights);
    pool.apply_probes(&results, median, settings.max_block_lag);

    for endpoint in pool.snapshot() {
        metrics::record_endpoint_health(pool.chain_id(), &endpoint.url, endpoint.health_score);
    }
    tracing::debug!(
        chain_id = pool.chain_id(),
        probed = results.len(),
        alive = heights.len(),
        available = pool.available(),
        "Endpoint refresh complete"
    );
}
