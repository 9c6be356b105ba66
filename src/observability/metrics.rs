//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define relay metrics (submission counters, RPC errors, endpoint health)
//! - Expose Prometheus-compatible metrics endpoint
//! - Provide an injectable counter sink so submission logic never reaches
//!   for global state
//!
//! # Metrics
//! - `relay_tx_events_total` (counter): submission events by flow, event
//! - `relay_rpc_errors_total` (counter): classified RPC failures by chain, kind
//! - `relay_endpoint_health` (gauge): health score per chain, endpoint
//!
//! # Design Decisions
//! - Counters never influence control flow
//! - Default sink is a no-op

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics_exporter_prometheus::PrometheusBuilder;

/// Submission lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxCounter {
    Attempt,
    GasRetry,
    NonceRetry,
    RpcRotation,
    Success,
    Failure,
}

impl TxCounter {
    pub const ALL: [TxCounter; 6] = [
        TxCounter::Attempt,
        TxCounter::GasRetry,
        TxCounter::NonceRetry,
        TxCounter::RpcRotation,
        TxCounter::Success,
        TxCounter::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TxCounter::Attempt => "total_attempts",
            TxCounter::GasRetry => "gas_retries",
            TxCounter::NonceRetry => "nonce_retries",
            TxCounter::RpcRotation => "rpc_rotations",
            TxCounter::Success => "final_successes",
            TxCounter::Failure => "final_failures",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Sink for submission counters.
pub trait TxMetrics: Send + Sync {
    fn increment(&self, counter: TxCounter);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl TxMetrics for NoopMetrics {
    fn increment(&self, _counter: TxCounter) {}
}

/// In-process counters with snapshot and reset.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    counts: [AtomicU64; 6],
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: TxCounter) -> u64 {
        self.counts[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        TxCounter::ALL
            .iter()
            .map(|c| (c.as_str(), self.get(*c)))
            .collect()
    }

    pub fn clear(&self) {
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    pub fn log_stats(&self) {
        tracing::info!(
            total_attempts = self.get(TxCounter::Attempt),
            gas_retries = self.get(TxCounter::GasRetry),
            nonce_retries = self.get(TxCounter::NonceRetry),
            rpc_rotations = self.get(TxCounter::RpcRotation),
            final_successes = self.get(TxCounter::Success),
            final_failures = self.get(TxCounter::Failure),
            "Submission stats"
        );
    }
}

impl TxMetrics for CounterMetrics {
    fn increment(&self, counter: TxCounter) {
        self.counts[counter.index()].fetch_add(1, Ordering::Relaxed);
    }
}

/// Forwards counters to the global `metrics` recorder.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    flow: &'static str,
}

impl PrometheusMetrics {
    /// `flow` labels the series, e.g. "eoa" or "safe".
    pub fn new(flow: &'static str) -> Self {
        Self { flow }
    }
}

impl TxMetrics for PrometheusMetrics {
    fn increment(&self, counter: TxCounter) {
        metrics::counter!("relay_tx_events_total", "flow" => self.flow, "event" => counter.as_str())
            .increment(1);
    }
}

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_rpc_error(chain_id: u64, kind: &'static str) {
    metrics::counter!("relay_rpc_errors_total", "chain_id" => chain_id.to_string(), "kind" => kind)
        .increment(1);
}

pub fn record_endpoint_health(chain_id: u64, url: &str, score: f64) {
    metrics::gauge!("relay_endpoint_health", "chain_id" => chain_id.to_string(), "endpoint" => url.to_string())
        .set(score);
}
