//! Passive health checking (failure detection on the request path).
//!
//! A transport failure while forwarding marks the upstream dead at once,
//! without waiting for the next probe round. Only the alive → dead edge is
//! logged as a warning; every failed request is logged as an error.

use std::fmt::Display;

use crate::load_balancer::upstream::Upstream;
use crate::observability::metrics;

/// Record a failed forward to `upstream`.
///
/// Returns `true` if this call took the upstream out of rotation.
pub fn record_forward_failure(upstream: &Upstream, error: &impl Display) -> bool {
    tracing::error!(upstream = %upstream.url(), error = %error, "Upstream request failed");

    let died = upstream.liveness().mark_dead();
    if died {
        tracing::warn!(
            upstream = %upstream.url(),
            error = %error,
            "Upstream marked dead after forwarding failure"
        );
        metrics::record_upstream_health(upstream.url().as_str(), false);
    }
    died
}
