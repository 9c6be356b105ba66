//! Safe multisig execution.
//!
//! [`SafeExecutor`] drives a signed [`SafeTransaction`] on-chain through the
//! chain's [`RpcFacade`](crate::rpc::RpcFacade), rebuilding and re-signing it
//! when the Safe nonce or gas limit has to change.

pub mod client;
pub mod contracts;
pub mod executor;
pub mod transaction;

pub use client::SafeClient;
pub use executor::{SafeError, SafeExecution, SafeExecutor};
pub use transaction::{Operation, SafeTransaction, MIN_SIGNATURE_LENGTH};
