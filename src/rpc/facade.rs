//! Rate-limited RPC facade with transparent endpoint rotation.
//!
//! # Data Flow
//! ```text
//! caller ──► acquire token ──► active backend ──► Ok ──► caller
//!                                   │
//!                                   └─ Err ──► classify
//!                                              ├─ Transient (reads): backoff, same endpoint
//!                                              ├─ RotationWorthy: rotate once, retry once
//!                                              ├─ QuotaExhausted: surface as its own error
//!                                              └─ anything else: propagate
//! ```
//!
//! # Design Decisions
//! - The facade is long-lived; rotation swaps only the backend behind it
//! - Writes are never retried in place: a broadcast that may have been
//!   accepted must not be sent twice
//! - Two tasks failing on the same endpoint rotate once, not twice

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::{RateLimitConfig, RpcConfig};
use crate::observability::metrics::{self, NoopMetrics, TxCounter, TxMetrics};
use crate::pool::endpoint::is_ephemeral_url;
use crate::pool::EndpointPool;
use crate::resilience::calculate_backoff;
use crate::rpc::backend::{BackendFactory, RpcBackend};
use crate::rpc::classify::{classify, is_rate_limit, ErrorKind};
use crate::rpc::rate_limit::RateLimiter;
use crate::rpc::types::{BlockTag, FeeSuggestion, Receipt, RpcError, RpcResult};

/// Backend currently serving calls, with the pool slot it came from.
pub struct ActiveBackend {
    pub index: usize,
    pub url: String,
    pub backend: Arc<dyn RpcBackend>,
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecoveryDecision {
    pub kind: ErrorKind,
    pub rotated: bool,
    pub should_retry: bool,
}

/// Timing knobs of the facade.
#[derive(Debug, Clone)]
pub struct FacadeSettings {
    pub acquire_timeout: Duration,
    pub read_retries: u32,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub rate_limit_backoff: Duration,
    pub receipt_timeout: Duration,
    pub receipt_poll: Duration,
    pub pending_timeout: Duration,
    pub pending_poll: Duration,
}

impl FacadeSettings {
    pub fn from_config(rpc: &RpcConfig, rate_limit: &RateLimitConfig) -> Self {
        Self {
            acquire_timeout: Duration::from_secs(rate_limit.acquire_timeout_secs),
            read_retries: rpc.read_retries,
            retry_base_ms: rpc.retry_base_ms,
            retry_max_ms: rpc.retry_max_ms,
            rate_limit_backoff: Duration::from_secs(rate_limit.backoff_secs),
            receipt_timeout: Duration::from_secs(rpc.receipt_timeout_secs),
            receipt_poll: Duration::from_millis(rpc.receipt_poll_ms),
            pending_timeout: Duration::from_secs(rpc.pending_timeout_secs),
            pending_poll: Duration::from_millis(rpc.pending_poll_ms),
        }
    }
}

impl Default for FacadeSettings {
    fn default() -> Self {
        Self::from_config(&RpcConfig::default(), &RateLimitConfig::default())
    }
}

/// Stable handle for all RPC traffic of one chain.
pub struct RpcFacade {
    chain_id: u64,
    ephemeral: bool,
    pool: Arc<EndpointPool>,
    factory: Arc<dyn BackendFactory>,
    limiter: Arc<RateLimiter>,
    active: ArcSwap<ActiveBackend>,
    rotation_lock: Mutex<()>,
    settings: FacadeSettings,
    metrics: Arc<dyn TxMetrics>,
}

impl RpcFacade {
    /// Connect to the pool's current endpoint.
    pub fn new(
        pool: Arc<EndpointPool>,
        factory: Arc<dyn BackendFactory>,
        limiter: Arc<RateLimiter>,
        settings: FacadeSettings,
    ) -> RpcResult<Self> {
        let (index, url) = pool.current();
        let backend = factory.connect(&url)?;
        Ok(Self {
            chain_id: pool.chain_id(),
            ephemeral: false,
            pool,
            factory,
            limiter,
            active: ArcSwap::from_pointee(ActiveBackend { index, url, backend }),
            rotation_lock: Mutex::new(()),
            settings,
            metrics: Arc::new(NoopMetrics),
        })
    }

    /// Mark the chain as a forked/virtual test network.
    pub fn with_ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TxMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// True when rotations are already counted into `metrics` here.
    pub fn reports_to(&self, metrics: &Arc<dyn TxMetrics>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.metrics), Arc::as_ptr(metrics))
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &FacadeSettings {
        &self.settings
    }

    pub fn active_url(&self) -> String {
        self.active.load().url.clone()
    }

    pub fn active_index(&self) -> usize {
        self.active.load().index
    }

    /// Snapshot of the active backend and its URL, published together.
    pub fn active(&self) -> Arc<ActiveBackend> {
        self.active.load_full()
    }

    /// Backend serving calls right now. Holders keep the old backend alive
    /// after a rotation; ask again to follow it.
    pub fn backend(&self) -> Arc<dyn RpcBackend> {
        self.active.load().backend.clone()
    }

    fn classify(&self, err: &RpcError, url: &str) -> ErrorKind {
        let kind = classify(err, self.ephemeral || is_ephemeral_url(url));
        metrics::record_rpc_error(self.chain_id, kind.as_str());
        kind
    }

    /// Rotate away from `observed`. Returns `true` when the active backend
    /// is no longer `observed`, whether this call or a concurrent one moved it.
    fn rotate_from(&self, observed: usize) -> bool {
        let _guard = self.rotation_lock.lock().expect("rotation mutex poisoned");
        if self.active.load().index != observed {
            return true;
        }

        for _ in 0..self.pool.len() {
            let Some((index, url)) = self.pool.rotate() else {
                return false;
            };
            if index == observed {
                return false;
            }
            match self.factory.connect(&url) {
                Ok(backend) => {
                    self.active.store(Arc::new(ActiveBackend { index, url, backend }));
                    self.metrics.increment(TxCounter::RpcRotation);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(chain_id = self.chain_id, url = %url, error = %e, "Cannot connect rotated endpoint");
                    self.pool.exclude(&url);
                }
            }
        }
        false
    }

    /// Force a rotation away from the current endpoint.
    pub fn rotate(&self) -> bool {
        self.rotate_from(self.active_index())
    }

    /// Rotation hook for submitters: classify `err`, rotate if that helps,
    /// and say whether another attempt makes sense.
    pub fn handle_error(&self, err: &RpcError) -> RecoveryDecision {
        let active = self.active.load_full();
        let kind = self.classify(err, &active.url);
        let (rotated, should_retry) = match kind {
            ErrorKind::RotationWorthy => {
                let rotated = self.rotate_from(active.index);
                if !rotated && is_rate_limit(err) {
                    self.limiter.trigger_backoff(self.settings.rate_limit_backoff);
                    (false, true)
                } else {
                    (rotated, rotated)
                }
            }
            ErrorKind::Transient => (false, true),
            _ => (false, false),
        };
        tracing::debug!(
            chain_id = self.chain_id,
            kind = %kind,
            rotated,
            should_retry,
            error = %err,
            "RPC error handled"
        );
        RecoveryDecision {
            kind,
            rotated,
            should_retry,
        }
    }

    async fn read<T, F, Fut>(&self, op: &'static str, call: F) -> RpcResult<T>
    where
        F: Fn(Arc<dyn RpcBackend>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let mut transient_retries = 0u32;
        let mut rotated = false;
        loop {
            self.limiter.acquire(self.settings.acquire_timeout).await?;
            let active = self.active.load_full();
            let err = match call(active.backend.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match self.classify(&err, &active.url) {
                ErrorKind::QuotaExhausted => return Err(RpcError::QuotaExhausted(err.to_string())),
                ErrorKind::Transient if !rotated && transient_retries < self.settings.read_retries => {
                    transient_retries += 1;
                    let delay = calculate_backoff(
                        transient_retries,
                        self.settings.retry_base_ms,
                        self.settings.retry_max_ms,
                    );
                    tracing::debug!(op, attempt = transient_retries, ?delay, error = %err, "Transient RPC error, retrying");
                    tokio::time::sleep(delay).await;
                }
                ErrorKind::RotationWorthy if !rotated => {
                    rotated = true;
                    if self.rotate_from(active.index) {
                        tracing::warn!(op, from = %active.url, error = %err, "Rotating RPC endpoint");
                    } else if is_rate_limit(&err) {
                        // nowhere to go: let the bucket cool down, then one more try
                        self.limiter.trigger_backoff(self.settings.rate_limit_backoff);
                    } else {
                        return Err(err);
                    }
                }
                _ => return Err(err),
            }
        }
    }

    pub async fn block_number(&self) -> RpcResult<u64> {
        self.read("block_number", |b| async move { b.block_number().await }).await
    }

    pub async fn get_chain_id(&self) -> RpcResult<u64> {
        self.read("chain_id", |b| async move { b.chain_id().await }).await
    }

    pub async fn transaction_count(&self, address: Address, tag: BlockTag) -> RpcResult<u64> {
        self.read("transaction_count", |b| async move {
            b.transaction_count(address, tag).await
        })
        .await
    }

    pub async fn balance(&self, address: Address) -> RpcResult<U256> {
        self.read("balance", |b| async move { b.balance(address).await }).await
    }

    pub async fn code(&self, address: Address) -> RpcResult<Bytes> {
        self.read("code", |b| async move { b.code(address).await }).await
    }

    pub async fn is_contract(&self, address: Address) -> RpcResult<bool> {
        Ok(!self.code(address).await?.is_empty())
    }

    pub async fn gas_price(&self) -> RpcResult<u128> {
        self.read("gas_price", |b| async move { b.gas_price().await }).await
    }

    pub async fn max_priority_fee(&self) -> RpcResult<u128> {
        self.read("max_priority_fee", |b| async move { b.max_priority_fee().await })
            .await
    }

    pub async fn latest_base_fee(&self) -> RpcResult<Option<u128>> {
        self.read("latest_base_fee", |b| async move { b.latest_base_fee().await })
            .await
    }

    pub async fn estimate_gas(&self, tx: &TransactionRequest) -> RpcResult<u64> {
        self.read("estimate_gas", |b| {
            let tx = tx.clone();
            async move { b.estimate_gas(tx).await }
        })
        .await
    }

    pub async fn call(&self, tx: &TransactionRequest) -> RpcResult<Bytes> {
        self.read("call", |b| {
            let tx = tx.clone();
            async move { b.call(tx).await }
        })
        .await
    }

    pub async fn transaction_receipt(&self, hash: TxHash) -> RpcResult<Option<Receipt>> {
        self.read("transaction_receipt", |b| async move {
            b.transaction_receipt(hash).await
        })
        .await
    }

    pub async fn logs(&self, filter: &Filter) -> RpcResult<Vec<Log>> {
        self.read("logs", |b| {
            let filter = filter.clone();
            async move { b.logs(filter).await }
        })
        .await
    }

    /// Broadcast a signed transaction.
    ///
    /// Only a rotation-worthy failure earns one retry on a fresh endpoint;
    /// every other error is returned as is.
    pub async fn send_raw_transaction(&self, raw: &Bytes) -> RpcResult<TxHash> {
        let mut rotated = false;
        loop {
            self.limiter.acquire(self.settings.acquire_timeout).await?;
            let active = self.active.load_full();
            let err = match active.backend.send_raw_transaction(raw.clone()).await {
                Ok(hash) => return Ok(hash),
                Err(err) => err,
            };

            match self.classify(&err, &active.url) {
                ErrorKind::QuotaExhausted => return Err(RpcError::QuotaExhausted(err.to_string())),
                ErrorKind::RotationWorthy if !rotated => {
                    rotated = true;
                    if !self.rotate_from(active.index) {
                        if is_rate_limit(&err) {
                            self.limiter.trigger_backoff(self.settings.rate_limit_backoff);
                        }
                        return Err(err);
                    }
                    tracing::warn!(from = %active.url, error = %err, "Broadcast rejected, retrying on next endpoint");
                }
                _ => return Err(err),
            }
        }
    }

    /// EIP-1559 fees when the chain has a base fee, legacy gas price otherwise.
    pub async fn suggested_fees(&self) -> RpcResult<FeeSuggestion> {
        if let Ok(Some(base_fee)) = self.latest_base_fee().await {
            let priority = match self.max_priority_fee().await {
                Ok(fee) => fee.max(1),
                Err(e) => {
                    tracing::debug!(error = %e, "Priority fee unavailable, using 1 wei");
                    1
                }
            };
            return Ok(FeeSuggestion::Eip1559 {
                max_fee_per_gas: base_fee * 3 / 2 + priority,
                max_priority_fee_per_gas: priority,
            });
        }
        Ok(FeeSuggestion::Legacy {
            gas_price: self.gas_price().await?,
        })
    }

    /// Poll until `hash` has a receipt, bounded by the receipt timeout.
    pub async fn wait_for_receipt(&self, hash: TxHash) -> RpcResult<Receipt> {
        self.wait_for_receipt_within(hash, self.settings.receipt_timeout).await
    }

    pub async fn wait_for_receipt_within(&self, hash: TxHash, timeout: Duration) -> RpcResult<Receipt> {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(self.settings.receipt_poll);
        loop {
            ticker.tick().await;
            match self.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(RpcError::QuotaExhausted(msg)) => return Err(RpcError::QuotaExhausted(msg)),
                Err(e) => tracing::warn!(tx_hash = %hash, error = %e, "Receipt poll failed"),
            }
            if Instant::now() >= deadline {
                return Err(RpcError::ReceiptTimeout(hash, timeout.as_secs()));
            }
        }
    }

    /// Poll until the latest and pending nonces of `address` agree.
    /// Returns `false` if they still differ when the window closes.
    pub async fn wait_for_no_pending(&self, address: Address) -> bool {
        let deadline = Instant::now() + self.settings.pending_timeout;
        loop {
            let latest = self.transaction_count(address, BlockTag::Latest).await;
            let pending = self.transaction_count(address, BlockTag::Pending).await;
            match (latest, pending) {
                (Ok(latest), Ok(pending)) if latest == pending => return true,
                (Ok(latest), Ok(pending)) => {
                    tracing::debug!(%address, latest, pending, "Waiting for pending transactions");
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!(%address, error = %e, "Pending nonce poll failed");
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(%address, "Pending transactions did not clear in time");
                return false;
            }
            tokio::time::sleep(self.settings.pending_poll).await;
        }
    }

    /// True if the active endpoint answers `eth_blockNumber`.
    pub async fn check_health(&self) -> bool {
        let healthy = self.block_number().await.is_ok();
        metrics::record_endpoint_health(self.chain_id, &self.active_url(), if healthy { 1.0 } else { 0.0 });
        healthy
    }
}

impl std::fmt::Debug for RpcFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.load();
        f.debug_struct("RpcFacade")
            .field("chain_id", &self.chain_id)
            .field("active_url", &active.url)
            .field("active_index", &active.index)
            .field("endpoints", &self.pool.len())
            .finish()
    }
}
