//! Capabilities the submitters consume but do not own: key custody,
//! account lookup and transaction history.

use alloy::primitives::{Address, Bytes, TxHash, B256, U256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::Signature;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Failure inside a collaborator.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("no key for account {0}")]
    UnknownKey(Address),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("sink error: {0}")]
    Sink(String),
}

/// A resolved signing account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub address: Address,
    pub tag: Option<String>,
}

/// Maps a tag or hex address to an account.
pub trait AccountResolver: Send + Sync {
    fn resolve_account(&self, tag_or_address: &str) -> Option<Account>;
}

/// Key custody. Implementations never hand out key material.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Sign a fully populated request and return the EIP-2718 encoding.
    async fn sign_transaction(
        &self,
        tx: TransactionRequest,
        account: &Account,
    ) -> Result<Bytes, CollaboratorError>;

    /// Sign a raw 32-byte digest.
    async fn sign_hash(&self, hash: B256, signer: Address) -> Result<Signature, CollaboratorError>;
}

/// History entry written after a confirmed transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TxRecord {
    pub tx_hash: TxHash,
    pub from: Address,
    pub to: Option<Address>,
    pub token: String,
    pub amount: U256,
    pub chain: String,
    pub from_tag: Option<String>,
    pub gas_used: u64,
    /// Wei paid for gas.
    pub gas_cost: u128,
}

/// Native or ERC-20 value movement observed in a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEvent {
    /// `None` for the native currency.
    pub token: Option<Address>,
    pub symbol: String,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// Transaction history sink. Failures here never fail a submission.
#[async_trait]
pub trait TxEventSink: Send + Sync {
    async fn log_transaction(&self, record: &TxRecord) -> Result<(), CollaboratorError>;
    async fn label_transfers(
        &self,
        tx_hash: TxHash,
        transfers: &[TransferEvent],
    ) -> Result<(), CollaboratorError>;
}

/// Writes history to the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTxSink;

#[async_trait]
impl TxEventSink for TracingTxSink {
    async fn log_transaction(&self, record: &TxRecord) -> Result<(), CollaboratorError> {
        tracing::info!(
            tx_hash = %record.tx_hash,
            from = %record.from,
            from_tag = record.from_tag.as_deref().unwrap_or("-"),
            to = ?record.to,
            token = %record.token,
            amount = %record.amount,
            chain = %record.chain,
            gas_used = record.gas_used,
            gas_cost = record.gas_cost,
            "Transaction recorded"
        );
        Ok(())
    }

    async fn label_transfers(
        &self,
        tx_hash: TxHash,
        transfers: &[TransferEvent],
    ) -> Result<(), CollaboratorError> {
        for transfer in transfers {
            tracing::info!(
                tx_hash = %tx_hash,
                symbol = %transfer.symbol,
                from = %transfer.from,
                to = %transfer.to,
                amount = %transfer.amount,
                "Transfer"
            );
        }
        Ok(())
    }
}
