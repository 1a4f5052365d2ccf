//! Upstream liveness state.
//!
//! # States
//! - Alive: upstream receives traffic
//! - Dead: upstream skipped by the balancer
//!
//! # State Transitions
//! ```text
//! Alive → Dead:  failed probe (active.rs) or failed forward (passive.rs)
//! Dead → Alive:  successful probe (active.rs)
//! ```
//!
//! Two writers share one flag with no coordination between them; whichever
//! stores last wins. Transitions are edge-triggered: only the caller whose
//! compare-exchange actually flips the flag observes a [`Transition`].

use std::sync::atomic::{AtomicBool, Ordering};

/// A state change of a liveness flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Alive → Dead.
    Died,
    /// Dead → Alive.
    Recovered,
}

/// Atomic alive/dead flag shared between the request path and the health monitor.
#[derive(Debug)]
pub struct LivenessFlag {
    alive: AtomicBool,
}

impl LivenessFlag {
    /// Create a flag in the given state.
    pub fn new(alive: bool) -> Self {
        Self {
            alive: AtomicBool::new(alive),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Flip alive → dead. Returns `true` only for the caller that performed the flip.
    pub fn mark_dead(&self) -> bool {
        self.alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Flip dead → alive. Returns `true` only for the caller that performed the flip.
    pub fn mark_alive(&self) -> bool {
        self.alive
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Apply a health classification, reporting a transition only on a state change.
    pub fn observe(&self, healthy: bool) -> Option<Transition> {
        if healthy {
            self.mark_alive().then_some(Transition::Recovered)
        } else {
            self.mark_dead().then_some(Transition::Died)
        }
    }
}

impl Default for LivenessFlag {
    fn default() -> Self {
        Self::new(true)
    }
}
