//! Immutable Safe transaction values.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{Eip712Domain, SolCall, SolStruct};
use serde::Serialize;

use crate::safe::contracts::{ISafe, SafeTx};
use crate::submit::collaborators::{CollaboratorError, TransactionSigner};

/// One ECDSA signature: r (32) + s (32) + v (1).
pub const MIN_SIGNATURE_LENGTH: usize = 65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

impl Operation {
    pub fn as_u8(self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

/// A Safe transaction plus its owner signatures.
///
/// Never mutated in place: nonce and gas changes produce a new value, and
/// signatures made over the old value stay attached until [`sign`] replaces
/// them.
///
/// [`sign`]: SafeTransaction::sign
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafeTransaction {
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub operation: Operation,
    pub safe_tx_gas: u64,
    pub base_gas: u64,
    pub gas_price: u128,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub signatures: Bytes,
    pub safe_nonce: u64,
}

impl SafeTransaction {
    pub fn new(to: Address, value: U256, data: Bytes, safe_nonce: u64) -> Self {
        Self {
            to,
            value,
            data,
            operation: Operation::Call,
            safe_tx_gas: 0,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            signatures: Bytes::new(),
            safe_nonce,
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_signatures(mut self, signatures: Bytes) -> Self {
        self.signatures = signatures;
        self
    }

    /// Same transaction at another Safe nonce.
    pub fn with_nonce(&self, safe_nonce: u64) -> Self {
        Self {
            safe_nonce,
            ..self.clone()
        }
    }

    /// Same transaction with another inner gas limit.
    pub fn with_safe_tx_gas(&self, safe_tx_gas: u64) -> Self {
        Self {
            safe_tx_gas,
            ..self.clone()
        }
    }

    pub fn has_signatures(&self) -> bool {
        self.signatures.len() >= MIN_SIGNATURE_LENGTH
    }

    pub fn eip712_message(&self) -> SafeTx {
        SafeTx {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.as_u8(),
            safeTxGas: U256::from(self.safe_tx_gas),
            baseGas: U256::from(self.base_gas),
            gasPrice: U256::from(self.gas_price),
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            nonce: U256::from(self.safe_nonce),
        }
    }

    /// EIP-712 digest owners sign (domain: chain id + Safe address).
    pub fn signing_hash(&self, chain_id: u64, safe: Address) -> B256 {
        let domain = Eip712Domain::new(None, None, Some(U256::from(chain_id)), Some(safe), None);
        self.eip712_message().eip712_signing_hash(&domain)
    }

    /// Calldata of `execTransaction` carrying the current signatures.
    pub fn exec_calldata(&self) -> Bytes {
        ISafe::execTransactionCall {
            to: self.to,
            value: self.value,
            data: self.data.clone(),
            operation: self.operation.as_u8(),
            safeTxGas: U256::from(self.safe_tx_gas),
            baseGas: U256::from(self.base_gas),
            gasPrice: U256::from(self.gas_price),
            gasToken: self.gas_token,
            refundReceiver: self.refund_receiver,
            signatures: self.signatures.clone(),
        }
        .abi_encode()
        .into()
    }

    /// Sign with every owner in `owners` and return the signed copy.
    /// Signatures are concatenated in ascending owner order, as the Safe
    /// contract requires.
    pub async fn sign(
        &self,
        signer: &dyn TransactionSigner,
        owners: &[Address],
        chain_id: u64,
        safe: Address,
    ) -> Result<Self, CollaboratorError> {
        let hash = self.signing_hash(chain_id, safe);
        let mut owners = owners.to_vec();
        owners.sort();
        owners.dedup();

        let mut packed = Vec::with_capacity(owners.len() * MIN_SIGNATURE_LENGTH);
        for owner in owners {
            let signature = signer.sign_hash(hash, owner).await?;
            packed.extend_from_slice(&signature.as_bytes());
        }
        Ok(self.clone().with_signatures(packed.into()))
    }
}
