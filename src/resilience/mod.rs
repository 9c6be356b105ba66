//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Submission attempt fails:
//!     → rpc::classify (what kind of failure)
//!     → policy.rs (gas bump / retry budget / precedence of settings)
//!     → backoff.rs (how long to wait before the next attempt)
//! ```
//!
//! # Design Decisions
//! - Every retry loop is bounded; there is no "retry forever"
//! - Jittered backoff prevents thundering herd on a recovering endpoint
//! - Gas never grows past a fixed multiple of the first estimate

pub mod backoff;
pub mod policy;

pub use backoff::calculate_backoff;
pub use policy::{GasPolicy, RetryOverrides, RetryPolicy};
