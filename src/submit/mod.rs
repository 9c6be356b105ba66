//! Transaction submission subsystem.
//!
//! # Data Flow
//! ```text
//! caller (tx + signer tag)
//!     → collaborators.rs (resolve account, sign)
//!     → eoa.rs (fill, send, await receipt, bounded retry)
//!         → rpc::RpcFacade (every RPC call, rotation hook)
//!     → events.rs (native + ERC-20 transfers from the receipt)
//!     → collaborators.rs (history sink; failures only logged)
//! ```
//!
//! # Design Decisions
//! - Outcomes are explicit values; only setup mistakes are `Err`
//! - A signed hash is remembered so an accepted broadcast is never re-sent

pub mod collaborators;
pub mod eoa;
pub mod events;

pub use collaborators::{
    Account, AccountResolver, CollaboratorError, TracingTxSink, TransactionSigner, TransferEvent,
    TxEventSink, TxRecord,
};
pub use eoa::{Collaborators, EoaSubmitter, SubmitError, SubmitOutcome};
