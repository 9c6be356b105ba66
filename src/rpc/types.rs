//! RPC-level types and error definitions.

use std::time::Duration;

use alloy::network::ReceiptResponse;
use alloy::primitives::{Address, TxHash};
use alloy::rpc::types::TransactionReceipt;
use serde::Serialize;
use thiserror::Error;

/// Errors produced by RPC backends and the facade.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// Endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// JSON-RPC error object or transport failure.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// RPC request timed out.
    #[error("RPC timeout after {0} seconds")]
    Timeout(u64),

    /// The per-chain rate limiter could not hand out a token in time.
    #[error("rate limiter acquisition timed out after {0:?}")]
    RateLimitTimeout(Duration),

    /// Quota of an ephemeral test network is used up.
    #[error("RPC quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Pool has no usable endpoint.
    #[error("no RPC endpoint available for chain {0}")]
    NoEndpoint(u64),

    /// Endpoint URL could not be turned into a backend.
    #[error("invalid RPC URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Receipt did not show up within the polling window.
    #[error("receipt for {0} not found after {1} seconds")]
    ReceiptTimeout(TxHash, u64),
}

impl RpcError {
    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            RpcError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Block tag used for nonce queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

/// Transaction receipt reduced to what submission logic needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    /// `true` when the transaction executed successfully.
    pub status: bool,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub from: Address,
    pub to: Option<Address>,
    #[serde(skip)]
    pub logs: Vec<alloy::primitives::Log>,
}

impl Receipt {
    /// Gas cost paid in wei.
    pub fn gas_cost(&self) -> u128 {
        self.gas_used as u128 * self.effective_gas_price
    }
}

impl From<TransactionReceipt> for Receipt {
    fn from(receipt: TransactionReceipt) -> Self {
        Self {
            tx_hash: ReceiptResponse::transaction_hash(&receipt),
            status: ReceiptResponse::status(&receipt),
            block_number: ReceiptResponse::block_number(&receipt),
            gas_used: ReceiptResponse::gas_used(&receipt),
            effective_gas_price: ReceiptResponse::effective_gas_price(&receipt),
            from: receipt.from,
            to: receipt.to,
            logs: receipt
                .inner
                .logs()
                .iter()
                .map(|log| log.inner.clone())
                .collect(),
        }
    }
}

/// Fee fields to put on an outgoing transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeSuggestion {
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
    Legacy {
        gas_price: u128,
    },
}
