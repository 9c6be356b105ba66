//! Safe client bound to one endpoint.
//!
//! A client is a throwaway: the executor binds a new one on every attempt so
//! a rotation made by a previous failure is picked up. Calls go straight to
//! the bound backend behind the chain's rate limiter, without the facade's
//! own retries; the executor's loop decides what happens on failure.

use std::sync::Arc;
use std::time::Duration;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::sol_types::SolCall;

use crate::rpc::{BlockTag, RateLimiter, RpcBackend, RpcError, RpcFacade, RpcResult};
use crate::safe::contracts::ISafe;
use crate::safe::transaction::SafeTransaction;

pub struct SafeClient {
    address: Address,
    url: String,
    backend: Arc<dyn RpcBackend>,
    limiter: Arc<RateLimiter>,
    acquire_timeout: Duration,
}

fn decode_error(what: &str, err: alloy::sol_types::Error) -> RpcError {
    RpcError::Rpc(format!("cannot decode {} result: {}", what, err))
}

impl SafeClient {
    /// Bind to whatever endpoint `facade` is using right now.
    pub fn bind(facade: &RpcFacade, address: Address) -> Self {
        let active = facade.active();
        Self {
            address,
            url: active.url.clone(),
            backend: active.backend.clone(),
            limiter: facade.limiter().clone(),
            acquire_timeout: facade.settings().acquire_timeout,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn view<C: SolCall>(&self, call: C) -> RpcResult<C::Return> {
        self.limiter.acquire(self.acquire_timeout).await?;
        let request = TransactionRequest::default()
            .with_to(self.address)
            .with_input(call.abi_encode());
        let output = self.backend.call(request).await?;
        C::abi_decode_returns(&output).map_err(|e| decode_error(C::SIGNATURE, e))
    }

    pub async fn nonce(&self) -> RpcResult<u64> {
        let nonce: U256 = self.view(ISafe::nonceCall {}).await?;
        Ok(nonce.saturating_to())
    }

    pub async fn threshold(&self) -> RpcResult<u64> {
        let threshold: U256 = self.view(ISafe::getThresholdCall {}).await?;
        Ok(threshold.saturating_to())
    }

    pub async fn owners(&self) -> RpcResult<Vec<Address>> {
        self.view(ISafe::getOwnersCall {}).await
    }

    /// Gas the inner call needs, measured as a call from the Safe itself.
    pub async fn estimate_tx_gas(&self, tx: &SafeTransaction) -> RpcResult<u64> {
        self.limiter.acquire(self.acquire_timeout).await?;
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_value(tx.value)
            .with_input(tx.data.clone());
        self.backend.estimate_gas(request).await
    }

    fn exec_request(&self, tx: &SafeTransaction, executor: Address) -> TransactionRequest {
        TransactionRequest::default()
            .with_from(executor)
            .with_to(self.address)
            .with_input(tx.exec_calldata())
    }

    /// Dry-run `execTransaction` from `executor`. Returns the contract's
    /// boolean result; a revert comes back as an error.
    pub async fn simulate(&self, tx: &SafeTransaction, executor: Address) -> RpcResult<bool> {
        self.limiter.acquire(self.acquire_timeout).await?;
        let output = self.backend.call(self.exec_request(tx, executor)).await?;
        ISafe::execTransactionCall::abi_decode_returns(&output)
            .map_err(|e| decode_error("execTransaction", e))
    }

    /// Unsigned outer transaction carrying `execTransaction`.
    pub fn build_exec(&self, tx: &SafeTransaction, executor: Address, chain_id: u64) -> TransactionRequest {
        let mut request = self.exec_request(tx, executor);
        request.chain_id = Some(chain_id);
        request
    }

    pub async fn estimate_exec_gas(&self, request: &TransactionRequest) -> RpcResult<u64> {
        self.limiter.acquire(self.acquire_timeout).await?;
        self.backend.estimate_gas(request.clone()).await
    }

    pub async fn pending_nonce(&self, account: Address) -> RpcResult<u64> {
        self.limiter.acquire(self.acquire_timeout).await?;
        self.backend.transaction_count(account, BlockTag::Pending).await
    }

    pub async fn send_raw(&self, raw: Bytes) -> RpcResult<TxHash> {
        self.limiter.acquire(self.acquire_timeout).await?;
        self.backend.send_raw_transaction(raw).await
    }
}

impl std::fmt::Debug for SafeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeClient")
            .field("address", &self.address)
            .field("url", &self.url)
            .finish()
    }
}
