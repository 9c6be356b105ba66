//! Local keyring: in-memory keys loaded from the environment.
//!
//! # Security
//! - Private keys are loaded ONLY from environment variables
//! - Keys are never logged or serialized

use std::collections::HashMap;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::{Signature, Signer};
use async_trait::async_trait;

use crate::submit::collaborators::{
    Account, AccountResolver, CollaboratorError, TransactionSigner,
};

/// Environment variable holding comma-separated private keys.
pub const PRIVATE_KEYS_ENV_VAR: &str = "RELAY_PRIVATE_KEYS";

/// Parse a hex private key (with or without 0x prefix).
pub fn parse_private_key(private_key_hex: &str) -> Result<PrivateKeySigner, CollaboratorError> {
    let key_hex = private_key_hex.trim();
    let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
    key_hex
        .parse()
        .map_err(|e| CollaboratorError::Signing(format!("Invalid private key format: {}", e)))
}

/// Keys held in process memory, addressable by address or tag.
#[derive(Default, Clone)]
pub struct LocalKeyring {
    signers: HashMap<Address, PrivateKeySigner>,
    tags: HashMap<String, Address>,
}

impl LocalKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key and return its address.
    pub fn add_key(&mut self, private_key_hex: &str) -> Result<Address, CollaboratorError> {
        let signer = parse_private_key(private_key_hex)?;
        let address = signer.address();
        tracing::info!(address = %address, "Key loaded");
        self.signers.insert(address, signer);
        Ok(address)
    }

    /// Name an address. Tags are matched case-insensitively.
    pub fn with_tag(mut self, tag: &str, address: Address) -> Self {
        self.tags.insert(tag.to_lowercase(), address);
        self
    }

    /// Load keys from `RELAY_PRIVATE_KEYS`.
    pub fn from_env() -> Result<Self, CollaboratorError> {
        let keys = std::env::var(PRIVATE_KEYS_ENV_VAR).map_err(|_| {
            CollaboratorError::Signing(format!(
                "Environment variable {} not set",
                PRIVATE_KEYS_ENV_VAR
            ))
        })?;
        let mut keyring = Self::new();
        for key in keys.split(',').filter(|k| !k.trim().is_empty()) {
            keyring.add_key(key)?;
        }
        Ok(keyring)
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<_> = self.signers.keys().copied().collect();
        addresses.sort();
        addresses
    }

    fn signer(&self, address: Address) -> Result<&PrivateKeySigner, CollaboratorError> {
        self.signers
            .get(&address)
            .ok_or(CollaboratorError::UnknownKey(address))
    }
}

impl AccountResolver for LocalKeyring {
    fn resolve_account(&self, tag_or_address: &str) -> Option<Account> {
        if let Some(address) = self.tags.get(&tag_or_address.to_lowercase()) {
            return Some(Account {
                address: *address,
                tag: Some(tag_or_address.to_string()),
            });
        }
        let address: Address = tag_or_address.trim().parse().ok()?;
        self.signers.contains_key(&address).then(|| Account {
            address,
            tag: self
                .tags
                .iter()
                .find(|(_, a)| **a == address)
                .map(|(t, _)| t.clone()),
        })
    }
}

#[async_trait]
impl TransactionSigner for LocalKeyring {
    async fn sign_transaction(
        &self,
        mut tx: TransactionRequest,
        account: &Account,
    ) -> Result<Bytes, CollaboratorError> {
        let wallet = EthereumWallet::from(self.signer(account.address)?.clone());
        tx.from = Some(account.address);
        let envelope = tx
            .build(&wallet)
            .await
            .map_err(|e| CollaboratorError::Signing(e.to_string()))?;
        Ok(Bytes::from(envelope.encoded_2718()))
    }

    async fn sign_hash(&self, hash: B256, signer: Address) -> Result<Signature, CollaboratorError> {
        self.signer(signer)?
            .sign_hash(&hash)
            .await
            .map_err(|e| CollaboratorError::Signing(format!("Signing failed: {}", e)))
    }
}

impl std::fmt::Debug for LocalKeyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKeyring")
            .field("addresses", &self.addresses())
            .field("tags", &self.tags.keys().collect::<Vec<_>>())
            .finish()
    }
}
