//! Resilient transaction submission and RPC failover for EVM chains.

pub mod abi;
pub mod chain;
pub mod config;
pub mod discovery;
pub mod lifecycle;
pub mod observability;
pub mod pool;
pub mod resilience;
pub mod rpc;
pub mod safe;
pub mod signing;
pub mod submit;

pub use chain::ChainInterface;
pub use config::schema::RelayConfig;
pub use lifecycle::Shutdown;
pub use rpc::RpcFacade;
