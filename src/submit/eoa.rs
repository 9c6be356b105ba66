//! EOA transaction submission.
//!
//! ```text
//! BUILD ─► FILL(nonce, chainId, fees, gas) ─► SIGN ─► SEND ─► WAIT_RECEIPT
//!                     ▲                                         │
//!                     └──────────── RETRY (bounded) ◄───────────┤
//!                                                               ├─► SUCCESS
//!                                                               └─► REVERTED
//! ```
//!
//! The nonce is fetched once and reused by every attempt, so at most one of
//! the attempts can ever be mined.

use std::sync::Arc;

use alloy::primitives::{keccak256, TxHash, U256};
use alloy::rpc::types::TransactionRequest;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ChainConfig, SubmissionConfig};
use crate::observability::metrics::{NoopMetrics, TxCounter, TxMetrics};
use crate::resilience::calculate_backoff;
use crate::resilience::policy::{GasPolicy, DEFAULT_CONTRACT_GAS, DEFAULT_TRANSFER_GAS, ESTIMATE_MARGIN};
use crate::rpc::{BlockTag, ErrorKind, FeeSuggestion, Receipt, RpcError, RpcFacade};
use crate::submit::collaborators::{
    Account, AccountResolver, CollaboratorError, TransactionSigner, TxEventSink, TxRecord,
};
use crate::submit::events::collect_transfers;

/// Final result of a submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// Mined with status 1.
    Confirmed(Receipt),
    /// Mined with status 0. Never retried.
    Reverted(Receipt),
    /// Gave up.
    Failed {
        attempts: u32,
        kind: ErrorKind,
        error: RpcError,
    },
}

impl SubmitOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, SubmitOutcome::Confirmed(_))
    }

    pub fn tx_hash(&self) -> Option<TxHash> {
        match self {
            SubmitOutcome::Confirmed(r) | SubmitOutcome::Reverted(r) => Some(r.tx_hash),
            SubmitOutcome::Failed { .. } => None,
        }
    }
}

/// Errors that stop a submission before or outside the retry loop.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("cannot resolve signer '{0}'")]
    UnknownSigner(String),

    #[error(transparent)]
    Signer(#[from] CollaboratorError),
}

/// Bundle of the collaborators a submitter needs.
#[derive(Clone)]
pub struct Collaborators {
    pub resolver: Arc<dyn AccountResolver>,
    pub signer: Arc<dyn TransactionSigner>,
    pub sink: Arc<dyn TxEventSink>,
}

/// Submits plain transactions from an externally owned account.
pub struct EoaSubmitter {
    facade: Arc<RpcFacade>,
    chain: ChainConfig,
    collaborators: Collaborators,
    settings: SubmissionConfig,
    metrics: Arc<dyn TxMetrics>,
}

struct AttemptState {
    nonce: Option<u64>,
    gas: Option<u64>,
    original_gas: u64,
    fees_filled: bool,
    last_hash: Option<TxHash>,
}

impl EoaSubmitter {
    pub fn new(
        facade: Arc<RpcFacade>,
        chain: ChainConfig,
        collaborators: Collaborators,
        settings: SubmissionConfig,
    ) -> Self {
        Self {
            facade,
            chain,
            collaborators,
            settings,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TxMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    fn gas_policy(&self) -> GasPolicy {
        GasPolicy {
            buffer: self.settings.gas_bump,
            cap_multiplier: self.settings.gas_cap_multiplier,
        }
    }

    /// Sign and broadcast `tx` from `signer` (tag or address), retrying
    /// recoverable failures.
    pub async fn submit(
        &self,
        tx: TransactionRequest,
        signer: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        let account = self
            .collaborators
            .resolver
            .resolve_account(signer)
            .ok_or_else(|| SubmitError::UnknownSigner(signer.to_string()))?;

        let span = tracing::info_span!(
            "submit",
            submission_id = %Uuid::new_v4(),
            chain = %self.chain.name,
            from = %account.address,
        );
        self.run(tx, account).instrument(span).await
    }

    async fn run(
        &self,
        mut tx: TransactionRequest,
        account: Account,
    ) -> Result<SubmitOutcome, SubmitError> {
        tx.from = Some(account.address);
        tx.chain_id = Some(self.chain.chain_id);

        let mut state = AttemptState {
            nonce: tx.nonce,
            gas: tx.gas,
            original_gas: tx.gas.unwrap_or(0),
            fees_filled: tx.gas_price.is_some() || tx.max_fee_per_gas.is_some(),
            last_hash: None,
        };
        let max_attempts = self.settings.max_attempts.max(1);
        let mut last_failure = (ErrorKind::Fatal, RpcError::NoEndpoint(self.chain.chain_id));

        for attempt in 1..=max_attempts {
            self.metrics.increment(TxCounter::Attempt);

            // a previous broadcast may have landed despite the error we saw
            if let Some(hash) = state.last_hash {
                if let Ok(Some(receipt)) = self.facade.transaction_receipt(hash).await {
                    tracing::info!(tx_hash = %hash, attempt, "Earlier broadcast was mined");
                    return Ok(self.finish(receipt, &tx, &account).await);
                }
            }

            let err = match self.attempt(&mut tx, &account, &mut state).await {
                Ok(receipt) => return Ok(self.finish(receipt, &tx, &account).await),
                Err(AttemptError::Signer(e)) => return Err(e.into()),
                Err(AttemptError::Rpc(e)) => e,
            };

            let decision = self.facade.handle_error(&err);
            tracing::warn!(
                attempt,
                max_attempts,
                kind = %decision.kind,
                rotated = decision.rotated,
                error = %err,
                "Submission attempt failed"
            );

            match decision.kind {
                ErrorKind::GasTooLow => {
                    let current = state.gas.unwrap_or(DEFAULT_TRANSFER_GAS);
                    let next = self.gas_policy().bump(current, state.original_gas);
                    tracing::info!(from_gas = current, to_gas = next, "Raising gas limit");
                    state.gas = Some(next);
                    self.metrics.increment(TxCounter::GasRetry);
                }
                ErrorKind::NonceConflict => {
                    // our own earlier broadcast may be the one holding the nonce
                    if let Some(hash) = state.last_hash {
                        if let Ok(receipt) = self.facade.wait_for_receipt(hash).await {
                            return Ok(self.finish(receipt, &tx, &account).await);
                        }
                    }
                    self.metrics.increment(TxCounter::Failure);
                    return Ok(SubmitOutcome::Failed { attempts: attempt, kind: decision.kind, error: err });
                }
                _ if decision.should_retry => {}
                _ => {
                    self.metrics.increment(TxCounter::Failure);
                    return Ok(SubmitOutcome::Failed { attempts: attempt, kind: decision.kind, error: err });
                }
            }

            last_failure = (decision.kind, err);
            if attempt < max_attempts {
                let delay = calculate_backoff(
                    attempt,
                    self.settings.backoff_base_ms,
                    self.settings.backoff_max_ms,
                );
                tokio::time::sleep(delay).await;
            }
        }

        self.metrics.increment(TxCounter::Failure);
        let (kind, error) = last_failure;
        tracing::error!(attempts = max_attempts, kind = %kind, error = %error, "Submission gave up");
        Ok(SubmitOutcome::Failed {
            attempts: max_attempts,
            kind,
            error,
        })
    }

    async fn attempt(
        &self,
        tx: &mut TransactionRequest,
        account: &Account,
        state: &mut AttemptState,
    ) -> Result<Receipt, AttemptError> {
        if state.nonce.is_none() {
            state.nonce = Some(
                self.facade
                    .transaction_count(account.address, BlockTag::Pending)
                    .await?,
            );
        }
        tx.nonce = state.nonce;

        if !state.fees_filled {
            match self.facade.suggested_fees().await? {
                FeeSuggestion::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas,
                } => {
                    tx.max_fee_per_gas = Some(max_fee_per_gas);
                    tx.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
                }
                FeeSuggestion::Legacy { gas_price } => tx.gas_price = Some(gas_price),
            }
            state.fees_filled = true;
        }

        if state.gas.is_none() {
            let gas = self.estimate(tx).await;
            state.gas = Some(gas);
            state.original_gas = gas;
        }
        if state.original_gas == 0 {
            state.original_gas = state.gas.unwrap_or(DEFAULT_TRANSFER_GAS);
        }
        tx.gas = state.gas;

        let raw = self
            .collaborators
            .signer
            .sign_transaction(tx.clone(), account)
            .await
            .map_err(AttemptError::Signer)?;
        let local_hash = keccak256(&raw);
        state.last_hash = Some(local_hash);

        let hash = self.facade.send_raw_transaction(&raw).await?;
        tracing::info!(tx_hash = %hash, nonce = ?tx.nonce, gas = ?tx.gas, "Transaction broadcast");

        Ok(self.facade.wait_for_receipt(hash).await?)
    }

    async fn estimate(&self, tx: &TransactionRequest) -> u64 {
        let mut probe = tx.clone();
        probe.gas = None;
        match self.facade.estimate_gas(&probe).await {
            Ok(estimate) => (estimate as f64 * ESTIMATE_MARGIN).round() as u64,
            Err(e) => {
                let has_data = tx.input.input().map(|d| !d.is_empty()).unwrap_or(false);
                let fallback = if has_data { DEFAULT_CONTRACT_GAS } else { DEFAULT_TRANSFER_GAS };
                tracing::warn!(error = %e, fallback, "Gas estimation failed, using fallback");
                fallback
            }
        }
    }

    async fn finish(&self, receipt: Receipt, tx: &TransactionRequest, account: &Account) -> SubmitOutcome {
        if !receipt.status {
            tracing::error!(tx_hash = %receipt.tx_hash, "Transaction reverted on-chain");
            self.metrics.increment(TxCounter::Failure);
            return SubmitOutcome::Reverted(receipt);
        }
        self.metrics.increment(TxCounter::Success);
        tracing::info!(
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );

        self.facade.wait_for_no_pending(account.address).await;

        let value = tx.value.unwrap_or(U256::ZERO);
        let record = TxRecord {
            tx_hash: receipt.tx_hash,
            from: account.address,
            to: tx.to.and_then(|kind| kind.to().copied()),
            token: "NATIVE".to_string(),
            amount: value,
            chain: self.chain.name.clone(),
            from_tag: account.tag.clone(),
            gas_used: receipt.gas_used,
            gas_cost: receipt.gas_cost(),
        };
        if let Err(e) = self.collaborators.sink.log_transaction(&record).await {
            tracing::warn!(tx_hash = %receipt.tx_hash, error = %e, "Failed to record transaction");
        }

        let transfers = collect_transfers(&receipt, value, &self.chain);
        if !transfers.is_empty() {
            if let Err(e) = self
                .collaborators
                .sink
                .label_transfers(receipt.tx_hash, &transfers)
                .await
            {
                tracing::warn!(tx_hash = %receipt.tx_hash, error = %e, "Failed to label transfers");
            }
        }

        SubmitOutcome::Confirmed(receipt)
    }
}

enum AttemptError {
    Rpc(RpcError),
    Signer(CollaboratorError),
}

impl From<RpcError> for AttemptError {
    fn from(err: RpcError) -> Self {
        AttemptError::Rpc(err)
    }
}
