//! RPC subsystem.
//!
//! # Data Flow
//! ```text
//! submit / safe
//!     → facade.rs (rate limit, classify, rotate, hot-swap backend)
//!         → rate_limit.rs (per-chain token bucket)
//!         → classify.rs (error → recovery kind)
//!         → backend.rs (one endpoint, alloy provider, per-call timeout)
//! ```
//!
//! # Design Decisions
//! - Backends are trait objects so tests script them without a node
//! - Classification is a pure function over status and text

pub mod backend;
pub mod classify;
pub mod facade;
pub mod rate_limit;
pub mod types;

pub use backend::{AlloyBackend, BackendFactory, HttpBackendFactory, RpcBackend};
pub use classify::{classify, ErrorKind};
pub use facade::{FacadeSettings, RecoveryDecision, RpcFacade};
pub use rate_limit::{RateLimiter, RateLimiterRegistry};
pub use types::{BlockTag, FeeSuggestion, Receipt, RpcError, RpcResult};
