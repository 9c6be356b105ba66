//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// RPC call timeouts and polling.
    pub rpc: RpcConfig,

    /// Per-chain request budget.
    pub rate_limit: RateLimitConfig,

    /// Endpoint discovery and refresh.
    pub discovery: DiscoveryConfig,

    /// Plain (EOA) transaction submission.
    pub submission: SubmissionConfig,

    /// Safe multisig execution.
    pub safe: SafeConfig,

    /// Directory of contract ABI JSON files used for revert decoding.
    pub abi_dir: Option<PathBuf>,

    /// Chains the relay talks to.
    pub chains: Vec<ChainConfig>,
}

impl RelayConfig {
    pub fn chain(&self, name_or_id: &str) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| {
            c.name.eq_ignore_ascii_case(name_or_id) || c.chain_id.to_string() == name_or_id
        })
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// RPC timeouts and polling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Same-endpoint retries for transient read failures.
    pub read_retries: u32,

    /// Base delay between transient read retries.
    pub retry_base_ms: u64,

    /// Upper bound on the delay between read retries.
    pub retry_max_ms: u64,

    /// How long to wait for a receipt after broadcast.
    pub receipt_timeout_secs: u64,

    /// Receipt polling interval.
    pub receipt_poll_ms: u64,

    /// How long to wait for the pending nonce to settle after success.
    pub pending_timeout_secs: u64,

    /// Pending-nonce polling interval.
    pub pending_poll_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            read_retries: 3,
            retry_base_ms: 500,
            retry_max_ms: 5_000,
            receipt_timeout_secs: 120,
            receipt_poll_ms: 2_000,
            pending_timeout_secs: 60,
            pending_poll_ms: 2_000,
        }
    }
}

/// Rate limiting configuration (token bucket per chain).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained requests per second.
    pub requests_per_second: f64,

    /// Bucket size.
    pub burst: u32,

    /// Longest a caller waits for a token.
    pub acquire_timeout_secs: u64,

    /// Pause applied after a rate-limit response with nowhere to rotate.
    pub backoff_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 25.0,
            burst: 50,
            acquire_timeout_secs: 30,
            backoff_secs: 5,
        }
    }
}

/// Endpoint discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Enrich pools with public endpoints at startup.
    pub enabled: bool,

    /// Registry document listing public endpoints per chain.
    pub registry_url: String,

    /// Directory holding the per-chain registry cache.
    pub cache_dir: PathBuf,

    /// Cache freshness in seconds.
    pub cache_ttl_secs: u64,

    /// Registry download timeout in seconds.
    pub fetch_timeout_secs: u64,

    /// Timeout of a single `eth_blockNumber` probe in seconds.
    pub probe_timeout_secs: u64,

    /// Probes in flight at once.
    pub max_concurrent_probes: usize,

    /// Blocks an endpoint may trail the median before it is dropped.
    pub max_block_lag: u64,

    /// Hard cap on endpoints per chain, configured ones included.
    pub max_endpoints: usize,

    /// Only accept `https://` candidates.
    pub require_https: bool,

    /// Skip candidates the registry flags as tracking users.
    pub exclude_tracking: bool,

    /// Background re-probe interval in seconds.
    pub refresh_interval_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            registry_url: "https://chainlist.org/rpcs.json".to_string(),
            cache_dir: PathBuf::from("data"),
            cache_ttl_secs: 86_400,
            fetch_timeout_secs: 10,
            probe_timeout_secs: 5,
            max_concurrent_probes: 10,
            max_block_lag: 100,
            max_endpoints: 20,
            require_https: true,
            exclude_tracking: false,
            refresh_interval_secs: 3_600,
        }
    }
}

/// EOA submission configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Attempts before giving up.
    pub max_attempts: u32,

    /// Multiplier applied to gas after a gas-too-low failure.
    pub gas_bump: f64,

    /// Gas never exceeds this multiple of the first gas limit.
    pub gas_cap_multiplier: u64,

    /// Base backoff between attempts.
    pub backoff_base_ms: u64,

    /// Backoff cap.
    pub backoff_max_ms: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            gas_bump: 1.5,
            gas_cap_multiplier: 10,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

/// Safe multisig execution configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SafeConfig {
    /// Attempts before giving up.
    pub max_retries: u32,

    /// Base delay; retry `n` waits `base * 2^n`.
    pub retry_base_delay_ms: u64,

    /// Delay cap.
    pub retry_max_delay_ms: u64,

    /// Multiplier applied to every fresh gas estimate.
    pub gas_buffer: f64,

    /// Gas never exceeds this multiple of the first estimate.
    pub gas_cap_multiplier: u64,
}

impl Default for SafeConfig {
    fn default() -> Self {
        Self {
            max_retries: 6,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 60_000,
            gas_buffer: 1.5,
            gas_cap_multiplier: 10,
        }
    }
}

/// One chain the relay talks to.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
    /// Name used for lookups and env overrides (e.g. "gnosis").
    pub name: String,

    pub chain_id: u64,

    /// Primary RPC endpoint. Always first in the pool.
    pub rpc_url: String,

    /// Additional operator-supplied endpoints.
    #[serde(default)]
    pub extra_rpcs: Vec<String>,

    /// Native currency symbol.
    #[serde(default = "default_native_currency")]
    pub native_currency: String,

    /// Forked/virtual test network. Never enriched from the registry.
    #[serde(default)]
    pub ephemeral: bool,

    /// Known tokens, symbol to address. Used to label transfers.
    #[serde(default)]
    pub tokens: BTreeMap<String, Address>,
}

fn default_native_currency() -> String {
    "ETH".to_string()
}

impl ChainConfig {
    pub fn new(name: impl Into<String>, chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain_id,
            rpc_url: rpc_url.into(),
            extra_rpcs: Vec::new(),
            native_currency: default_native_currency(),
            ephemeral: false,
            tokens: BTreeMap::new(),
        }
    }

    /// Symbol of a known token address.
    pub fn token_symbol(&self, address: &Address) -> Option<&str> {
        self.tokens
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(symbol, _)| symbol.as_str())
    }
}
