//! Safe transaction executor with retry, gas handling and RPC rotation.
//!
//! # Attempt
//! ```text
//! bind client ─► (re)estimate safeTxGas ─► re-sign if changed ─► simulate ─► execute ─► receipt
//!                                                                   │
//!                                              revert w/o nonce ────┴─► abort, decoded reason
//! ```
//!
//! # Recovery
//! - Nonce signal: read the Safe nonce, rebuild at that nonce, re-sign
//! - Rotation-worthy RPC error: the facade rotates; stop if it cannot
//! - Anything else: retry; the next attempt re-estimates gas
//! - `GS020` / `GS021` / `GS024`: signatures are unusable, stop at once

use std::sync::Arc;

use alloy::primitives::{keccak256, Address, TxHash};
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use crate::abi::RevertDecoder;
use crate::observability::metrics::{NoopMetrics, TxCounter, TxMetrics};
use crate::resilience::policy::{DEFAULT_CONTRACT_GAS, ESTIMATE_MARGIN};
use crate::resilience::RetryPolicy;
use crate::rpc::classify::has_nonce_signal;
use crate::rpc::{ErrorKind, FeeSuggestion, Receipt, RpcError, RpcFacade};
use crate::safe::client::SafeClient;
use crate::safe::transaction::{SafeTransaction, MIN_SIGNATURE_LENGTH};
use crate::submit::collaborators::{Account, CollaboratorError, TransactionSigner};

/// Outer gas added on top of `safeTxGas` when the exec estimate fails.
const EXEC_OVERHEAD_GAS: u64 = 100_000;

/// Safe revert codes that mean the signatures themselves are bad.
const SIGNATURE_ERROR_CODES: [&str; 3] = ["gs020", "gs021", "gs024"];

pub fn is_signature_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    SIGNATURE_ERROR_CODES.iter().any(|code| lower.contains(code))
}

fn is_revert(message: &str) -> bool {
    message.to_lowercase().contains("revert")
}

/// A Safe transaction that made it on-chain with status 1.
#[derive(Debug, Clone)]
pub struct SafeExecution {
    pub tx_hash: TxHash,
    pub receipt: Receipt,
    pub attempts: u32,
    pub safe_nonce: u64,
}

#[derive(Debug, Error)]
pub enum SafeError {
    #[error("No valid signatures: no signer keys supplied")]
    NoSigners,

    #[error("No valid signatures: {0} bytes, need at least {MIN_SIGNATURE_LENGTH}")]
    InvalidSignatures(usize),

    #[error("Signatures rejected by Safe: {0}")]
    SignatureRejected(String),

    #[error("Reverted: {0}")]
    Reverted(String),

    #[error(transparent)]
    Signer(#[from] CollaboratorError),

    #[error("{operation} failed after {attempts} attempts: {error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        error: RpcError,
    },

    #[error("{operation} aborted on attempt {attempt}: {error}")]
    Aborted {
        operation: String,
        attempt: u32,
        error: RpcError,
    },
}

enum AttemptError {
    Rpc(RpcError),
    Abort(SafeError),
}

impl From<RpcError> for AttemptError {
    fn from(err: RpcError) -> Self {
        AttemptError::Rpc(err)
    }
}

impl From<CollaboratorError> for AttemptError {
    fn from(err: CollaboratorError) -> Self {
        AttemptError::Abort(SafeError::Signer(err))
    }
}

/// Executes signed Safe transactions for one chain.
pub struct SafeExecutor {
    facade: Arc<RpcFacade>,
    signer: Arc<dyn TransactionSigner>,
    decoder: Arc<RevertDecoder>,
    policy: RetryPolicy,
    metrics: Arc<dyn TxMetrics>,
}

struct ExecState {
    tx: SafeTransaction,
    base_estimate: u64,
    needs_signing: bool,
    last_hash: Option<TxHash>,
}

impl SafeExecutor {
    pub fn new(facade: Arc<RpcFacade>, signer: Arc<dyn TransactionSigner>, policy: RetryPolicy) -> Self {
        Self {
            facade,
            signer,
            decoder: Arc::new(RevertDecoder::new()),
            policy,
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<RevertDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn TxMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Execute `tx` on `safe`, signing and paying with `signer_keys[0]`.
    pub async fn execute_with_retry(
        &self,
        safe: Address,
        tx: SafeTransaction,
        signer_keys: &[Account],
        operation: &str,
    ) -> Result<SafeExecution, SafeError> {
        self.execute_for_contract(safe, tx, signer_keys, operation, None)
            .await
    }

    /// Like [`execute_with_retry`], decoding simulation reverts against the
    /// ABI of `contract` first.
    ///
    /// [`execute_with_retry`]: SafeExecutor::execute_with_retry
    pub async fn execute_for_contract(
        &self,
        safe: Address,
        tx: SafeTransaction,
        signer_keys: &[Account],
        operation: &str,
        contract: Option<&str>,
    ) -> Result<SafeExecution, SafeError> {
        if signer_keys.is_empty() {
            return Err(SafeError::NoSigners);
        }
        if tx.signatures.len() < MIN_SIGNATURE_LENGTH {
            return Err(SafeError::InvalidSignatures(tx.signatures.len()));
        }

        let span = tracing::info_span!(
            "safe_exec",
            execution_id = %Uuid::new_v4(),
            operation,
            safe = %safe,
            chain_id = self.facade.chain_id(),
        );
        self.run(safe, tx, signer_keys, operation, contract)
            .instrument(span)
            .await
    }

    async fn run(
        &self,
        safe: Address,
        tx: SafeTransaction,
        signer_keys: &[Account],
        operation: &str,
        contract: Option<&str>,
    ) -> Result<SafeExecution, SafeError> {
        let mut state = ExecState {
            base_estimate: tx.safe_tx_gas,
            tx,
            needs_signing: false,
            last_hash: None,
        };
        let max_retries = self.policy.max_retries;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            self.metrics.increment(TxCounter::Attempt);
            let client = SafeClient::bind(&self.facade, safe);

            // an earlier broadcast may have been mined after we gave up on it
            if let Some(hash) = state.last_hash {
                if let Ok(Some(receipt)) = self.facade.transaction_receipt(hash).await {
                    if receipt.status {
                        return Ok(self.succeeded(hash, receipt, attempt, &state));
                    }
                }
            }

            let err = match self
                .attempt(&client, &mut state, signer_keys, attempt, contract)
                .await
            {
                Ok((hash, receipt)) => return Ok(self.succeeded(hash, receipt, attempt + 1, &state)),
                Err(AttemptError::Abort(e)) => {
                    self.metrics.increment(TxCounter::Failure);
                    return Err(e);
                }
                Err(AttemptError::Rpc(e)) => e,
            };

            let message = err.to_string();
            if is_signature_error(&message) {
                self.metrics.increment(TxCounter::Failure);
                return Err(SafeError::SignatureRejected(message));
            }
            if attempt >= max_retries {
                last_error = Some(err);
                break;
            }

            let strategy = if has_nonce_signal(&message) {
                self.metrics.increment(TxCounter::NonceRetry);
                self.refresh_nonce(&client, &mut state).await;
                "nonce refresh"
            } else {
                let decision = self.facade.handle_error(&err);
                match decision.kind {
                    ErrorKind::RotationWorthy => {
                        if decision.rotated && !self.facade.reports_to(&self.metrics) {
                            self.metrics.increment(TxCounter::RpcRotation);
                        }
                        if !decision.should_retry {
                            self.metrics.increment(TxCounter::Failure);
                            return Err(SafeError::Aborted {
                                operation: operation.to_string(),
                                attempt: attempt + 1,
                                error: err,
                            });
                        }
                        "RPC rotation"
                    }
                    ErrorKind::QuotaExhausted => {
                        self.metrics.increment(TxCounter::Failure);
                        return Err(SafeError::Aborted {
                            operation: operation.to_string(),
                            attempt: attempt + 1,
                            error: err,
                        });
                    }
                    ErrorKind::GasTooLow | ErrorKind::Revert => "gas increase",
                    _ => "retry",
                }
            };

            tracing::warn!(
                attempt = attempt + 1,
                strategy,
                error = %err,
                "Safe transaction attempt failed"
            );
            tokio::time::sleep(self.policy.delay(attempt)).await;
        }

        self.metrics.increment(TxCounter::Failure);
        let error = last_error.unwrap_or(RpcError::NoEndpoint(self.facade.chain_id()));
        tracing::error!(attempts = max_retries + 1, error = %error, "Safe transaction failed");
        Err(SafeError::Exhausted {
            operation: operation.to_string(),
            attempts: max_retries + 1,
            error,
        })
    }

    async fn attempt(
        &self,
        client: &SafeClient,
        state: &mut ExecState,
        signer_keys: &[Account],
        attempt: u32,
        contract: Option<&str>,
    ) -> Result<(TxHash, Receipt), AttemptError> {
        let chain_id = self.facade.chain_id();
        let executor = &signer_keys[0];

        if attempt > 0 || state.tx.safe_tx_gas == 0 {
            let (raw, gas) = self.estimate_safe_tx_gas(client, &state.tx, state.base_estimate).await;
            // the cap is measured against the unbuffered first estimate
            if state.base_estimate == 0 {
                state.base_estimate = raw;
            }
            if attempt > 0 {
                self.metrics.increment(TxCounter::GasRetry);
            }
            if gas != state.tx.safe_tx_gas {
                state.tx = state.tx.with_safe_tx_gas(gas);
                state.needs_signing = true;
            }
        }

        if state.needs_signing {
            let owners: Vec<Address> = signer_keys.iter().map(|a| a.address).collect();
            state.tx = state
                .tx
                .sign(self.signer.as_ref(), &owners, chain_id, client.address())
                .await?;
            state.needs_signing = false;
        }

        match client.simulate(&state.tx, executor.address).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(AttemptError::Abort(SafeError::Reverted(
                    "execTransaction returned false".to_string(),
                )))
            }
            Err(e) => {
                let message = e.to_string();
                if is_revert(&message) && !has_nonce_signal(&message) && !is_signature_error(&message) {
                    let reason = self.decoder.explain(&message, contract).unwrap_or(message);
                    tracing::error!(reason = %reason, "Safe simulation reverted");
                    return Err(AttemptError::Abort(SafeError::Reverted(reason)));
                }
                return Err(e.into());
            }
        }

        let mut request = client.build_exec(&state.tx, executor.address, chain_id);
        request.nonce = Some(client.pending_nonce(executor.address).await?);
        match self.facade.suggested_fees().await? {
            FeeSuggestion::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                request.max_fee_per_gas = Some(max_fee_per_gas);
                request.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
            }
            FeeSuggestion::Legacy { gas_price } => request.gas_price = Some(gas_price),
        }
        request.gas = Some(match client.estimate_exec_gas(&request).await {
            Ok(estimate) => (estimate as f64 * ESTIMATE_MARGIN).round() as u64,
            Err(e) => {
                let fallback = state.tx.safe_tx_gas + state.tx.base_gas + EXEC_OVERHEAD_GAS;
                tracing::warn!(error = %e, fallback, "Exec gas estimation failed, using fallback");
                fallback
            }
        });

        let raw = self.signer.sign_transaction(request, executor).await?;
        state.last_hash = Some(keccak256(&raw));
        let hash = client.send_raw(raw).await?;
        tracing::info!(tx_hash = %hash, safe_nonce = state.tx.safe_nonce, url = %client.url(), "Safe transaction broadcast");

        let receipt = self.facade.wait_for_receipt(hash).await?;
        if !receipt.status {
            tracing::error!(tx_hash = %hash, "Safe transaction mined but reverted");
            return Err(AttemptError::Rpc(RpcError::Rpc(format!(
                "transaction {} reverted on-chain",
                hash
            ))));
        }
        Ok((hash, receipt))
    }

    /// Raw estimate and the buffered, capped gas limit derived from it.
    async fn estimate_safe_tx_gas(&self, client: &SafeClient, tx: &SafeTransaction, base_estimate: u64) -> (u64, u64) {
        match client.estimate_tx_gas(tx).await {
            Ok(estimate) => {
                let original = if base_estimate == 0 { estimate } else { base_estimate };
                let gas = self.policy.gas.buffered(estimate, original);
                tracing::debug!(estimate, gas, base_estimate = original, "Estimated safeTxGas");
                (estimate, gas)
            }
            Err(e) => {
                tracing::warn!(error = %e, fallback = DEFAULT_CONTRACT_GAS, "safeTxGas estimation failed, using fallback");
                (DEFAULT_CONTRACT_GAS, DEFAULT_CONTRACT_GAS)
            }
        }
    }

    async fn refresh_nonce(&self, client: &SafeClient, state: &mut ExecState) {
        match client.nonce().await {
            Ok(nonce) => {
                tracing::info!(from = state.tx.safe_nonce, to = nonce, "Refreshing Safe nonce");
                state.tx = state.tx.with_nonce(nonce);
                state.needs_signing = true;
            }
            Err(e) => tracing::warn!(error = %e, "Cannot read Safe nonce, retrying as is"),
        }
    }

    fn succeeded(&self, hash: TxHash, receipt: Receipt, attempts: u32, state: &ExecState) -> SafeExecution {
        self.metrics.increment(TxCounter::Success);
        tracing::info!(tx_hash = %hash, attempts, "Safe transaction executed");
        SafeExecution {
            tx_hash: hash,
            receipt,
            attempts,
            safe_nonce: state.tx.safe_nonce,
        }
    }
}
