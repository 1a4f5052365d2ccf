//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every upstream concurrently, wait for all
//!     → Update state.rs on change
//!
//! Passive health checks (passive.rs):
//!     Forwarding failure observed
//!     → Mark upstream dead immediately
//!
//! State (state.rs):
//!     Alive ←→ Dead
//!     Edge-triggered, last writer wins
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary; only active checks revive an upstream
//! - No thresholds: one failed probe or forward takes an upstream out of rotation
//! - Health state is per-upstream

pub mod active;
pub mod passive;
pub mod state;

pub use active::{HealthMonitor, ProbeOutcome};
pub use state::{LivenessFlag, Transition};
