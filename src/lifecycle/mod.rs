//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Ctrl-C (signals.rs) ──► Shutdown::trigger (shutdown.rs) ──► background tasks exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Submissions in flight are not cancelled; only background loops listen

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_on_ctrl_c;
