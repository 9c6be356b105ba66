//! Reference key custody.
//!
//! The submitters only see the [`TransactionSigner`] and [`AccountResolver`]
//! traits; this keyring is what the CLI and tests plug in.
//!
//! [`TransactionSigner`]: crate::submit::TransactionSigner
//! [`AccountResolver`]: crate::submit::AccountResolver

pub mod wallet;

pub use wallet::{LocalKeyring, PRIVATE_KEYS_ENV_VAR};
