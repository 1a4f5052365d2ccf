//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client_id.rs (X-Client-ID, X-Real-IP, X-Forwarded-For, peer address)
//!     → rate_limit.rs (look up or create the client's bucket)
//!     → bucket.rs (lazy refill, then take one token)
//!     → Pass to proxy handler, or 429
//!
//! Background:
//!     → rate_limit.rs refill sweep (every second, all buckets, idle eviction)
//! ```
//!
//! # Design Decisions
//! - Token counts are atomics; the hot path never blocks on a bucket
//! - The bucket map is behind a reader/writer lock; creation double-checks
//! - Denial is normal control flow, not an error

pub mod bucket;
pub mod client_id;
pub mod rate_limit;

pub use bucket::Bucket;
pub use client_id::resolve_client_id;
pub use rate_limit::{rate_limit_middleware, RateLimiter};
