//! RPC backends.
//!
//! A backend is a single connection to a single endpoint. It knows nothing
//! about rotation, retries or rate limits; the facade layers those on top.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, TransactionRequest};
use alloy::transports::{TransportError, TransportErrorKind};
use async_trait::async_trait;
use tokio::time::timeout;

use crate::rpc::types::{BlockTag, Receipt, RpcError, RpcResult};

/// JSON-RPC surface used by the relay.
#[async_trait]
pub trait RpcBackend: Send + Sync {
    async fn block_number(&self) -> RpcResult<u64>;
    async fn chain_id(&self) -> RpcResult<u64>;
    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RpcResult<u64>;
    async fn balance(&self, address: Address) -> RpcResult<U256>;
    async fn code(&self, address: Address) -> RpcResult<Bytes>;
    async fn gas_price(&self) -> RpcResult<u128>;
    async fn max_priority_fee(&self) -> RpcResult<u128>;
    /// Base fee of the latest block; `None` on pre-London chains.
    async fn latest_base_fee(&self) -> RpcResult<Option<u128>>;
    async fn estimate_gas(&self, tx: TransactionRequest) -> RpcResult<u64>;
    async fn call(&self, tx: TransactionRequest) -> RpcResult<Bytes>;
    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<TxHash>;
    async fn transaction_receipt(&self, hash: TxHash) -> RpcResult<Option<Receipt>>;
    async fn logs(&self, filter: Filter) -> RpcResult<Vec<Log>>;
}

/// Builds backends for endpoint URLs; the facade calls it on every rotation.
pub trait BackendFactory: Send + Sync {
    fn connect(&self, url: &str) -> RpcResult<Arc<dyn RpcBackend>>;
}

/// Backend over an alloy HTTP provider.
pub struct AlloyBackend {
    url: String,
    provider: Arc<dyn Provider + Send + Sync>,
    timeout_duration: Duration,
}

impl AlloyBackend {
    pub fn connect_http(url: &str, timeout_duration: Duration) -> RpcResult<Self> {
        let parsed: url::Url = url.parse().map_err(|e: url::ParseError| RpcError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let provider = ProviderBuilder::new()
            .disable_recommended_fillers()
            .connect_http(parsed);

        Ok(Self {
            url: url.to_string(),
            provider: Arc::new(provider),
            timeout_duration,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn timed<T, F>(&self, fut: F) -> RpcResult<T>
    where
        F: Future<Output = Result<T, TransportError>> + Send,
    {
        match timeout(self.timeout_duration, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(map_transport_error(e)),
            Err(_) => Err(RpcError::Timeout(self.timeout_duration.as_secs())),
        }
    }
}

/// Keep the HTTP status when the transport exposes one.
pub fn map_transport_error(err: TransportError) -> RpcError {
    if let Some(TransportErrorKind::HttpError(http)) = err.as_transport_err() {
        return RpcError::Http {
            status: http.status,
            message: http.body.clone(),
        };
    }
    RpcError::Rpc(err.to_string())
}

#[async_trait]
impl RpcBackend for AlloyBackend {
    async fn block_number(&self) -> RpcResult<u64> {
        self.timed(async { self.provider.get_block_number().await }).await
    }

    async fn chain_id(&self) -> RpcResult<u64> {
        self.timed(async { self.provider.get_chain_id().await }).await
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RpcResult<u64> {
        let block = match tag {
            BlockTag::Latest => BlockId::latest(),
            BlockTag::Pending => BlockId::pending(),
        };
        self.timed(async {
            self.provider
                .get_transaction_count(address)
                .block_id(block)
                .await
        })
        .await
    }

    async fn balance(&self, address: Address) -> RpcResult<U256> {
        self.timed(async { self.provider.get_balance(address).await }).await
    }

    async fn code(&self, address: Address) -> RpcResult<Bytes> {
        self.timed(async { self.provider.get_code_at(address).await }).await
    }

    async fn gas_price(&self) -> RpcResult<u128> {
        self.timed(async { self.provider.get_gas_price().await }).await
    }

    async fn max_priority_fee(&self) -> RpcResult<u128> {
        self.timed(async { self.provider.get_max_priority_fee_per_gas().await })
            .await
    }

    async fn latest_base_fee(&self) -> RpcResult<Option<u128>> {
        let block = self
            .timed(async {
                self.provider
                    .get_block_by_number(BlockNumberOrTag::Latest)
                    .await
            })
            .await?;
        Ok(block.and_then(|b| b.header.base_fee_per_gas.map(u128::from)))
    }

    async fn estimate_gas(&self, tx: TransactionRequest) -> RpcResult<u64> {
        self.timed(async { self.provider.estimate_gas(tx).await }).await
    }

    async fn call(&self, tx: TransactionRequest) -> RpcResult<Bytes> {
        self.timed(async { self.provider.call(tx).await }).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<TxHash> {
        let pending = self
            .timed(async { self.provider.send_raw_transaction(&raw).await })
            .await?;
        Ok(*pending.tx_hash())
    }

    async fn transaction_receipt(&self, hash: TxHash) -> RpcResult<Option<Receipt>> {
        let receipt = self
            .timed(async { self.provider.get_transaction_receipt(hash).await })
            .await?;
        Ok(receipt.map(Receipt::from))
    }

    async fn logs(&self, filter: Filter) -> RpcResult<Vec<Log>> {
        self.timed(async { self.provider.get_logs(&filter).await }).await
    }
}

impl std::fmt::Debug for AlloyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyBackend")
            .field("url", &self.url)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}

/// Factory producing [`AlloyBackend`]s with a fixed request timeout.
#[derive(Debug, Clone)]
pub struct HttpBackendFactory {
    timeout_duration: Duration,
}

impl HttpBackendFactory {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }
}

impl BackendFactory for HttpBackendFactory {
    fn connect(&self, url: &str) -> RpcResult<Arc<dyn RpcBackend>> {
        Ok(Arc::new(AlloyBackend::connect_http(url, self.timeout_duration)?))
    }
}
