//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{upstream::Upstream, BalancerError};

/// Round-robin selector.
/// Stores an internal counter to rotate through upstreams.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next alive upstream.
    ///
    /// Every attempt advances the shared counter by one, and at most
    /// `upstreams.len()` attempts are made, so a fully dead set fails after
    /// one sweep instead of spinning. Concurrent callers interleave freely;
    /// wraparound of the counter is tolerated.
    pub fn select(&self, upstreams: &[Arc<Upstream>]) -> Result<Arc<Upstream>, BalancerError> {
        let len = upstreams.len();
        if len == 0 {
            return Err(BalancerError::NoUpstreams);
        }

        for _ in 0..len {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % len;
            let candidate = &upstreams[index];
            if candidate.is_alive() {
                return Ok(candidate.clone());
            }
        }
        Err(BalancerError::NoAliveUpstreams)
    }

    /// Number of attempts made so far (wrapping).
    pub fn position(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}
