//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Request admitted by the rate limiter
//!     → balancer.rs (Balancer::next)
//!     → round_robin.rs (advance cursor, skip dead upstreams, at most N attempts)
//!     → upstream.rs (forward through the selected upstream)
//!     → Response, or 502 and the upstream marked dead
//! ```
//!
//! # Design Decisions
//! - The upstream list is fixed at construction; no dynamic add/remove
//! - Selection is lock-free: one atomic cursor, atomic liveness flags
//! - Dead upstreams are skipped, never removed

pub mod balancer;
pub mod round_robin;
pub mod upstream;

use thiserror::Error;

pub use balancer::Balancer;
pub use round_robin::RoundRobin;
pub use upstream::Upstream;

/// Errors raised while building a balancer or selecting an upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalancerError {
    /// The registry has no members.
    #[error("no upstreams configured")]
    NoUpstreams,

    /// Every registered upstream is currently dead.
    #[error("no alive upstreams")]
    NoAliveUpstreams,

    /// An upstream address could not be used.
    #[error("invalid upstream address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}
