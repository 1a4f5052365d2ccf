//! Lock-free token bucket.
//!
//! Token count and timestamps are atomics so the admission hot path never
//! blocks. Timestamps are stored as nanoseconds since the bucket's creation.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A token bucket holding at most `capacity` tokens, refilled at
/// `refill_rate` tokens per whole elapsed second.
#[derive(Debug)]
pub struct Bucket {
    tokens: AtomicU32,
    capacity: u32,
    refill_rate: u32,
    origin: Instant,
    last_refill: AtomicU64,
    last_seen: AtomicU64,
}

impl Bucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: u32) -> Self {
        Self {
            tokens: AtomicU32::new(capacity),
            capacity,
            refill_rate,
            origin: Instant::now(),
            last_refill: AtomicU64::new(0),
            last_seen: AtomicU64::new(0),
        }
    }

    pub fn tokens(&self) -> u32 {
        self.tokens.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u32 {
        self.refill_rate
    }

    /// Take one token if any are left.
    ///
    /// Retries only while the observed count is positive; a zero count denies immediately.
    pub fn try_take(&self) -> bool {
        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Credit whole seconds elapsed since the last refill, capped at capacity.
    ///
    /// Sub-second calls leave the timestamp alone so fractions accumulate.
    /// The timestamp moves with a compare-exchange and only the winner adds
    /// tokens, so concurrent refills never credit the same interval twice.
    /// Returns the number of tokens actually added.
    pub fn refill_if_needed(&self, now: Instant) -> u32 {
        let now_nanos = self.offset(now);
        let last = self.last_refill.load(Ordering::Acquire);
        if now_nanos <= last {
            return 0;
        }

        let elapsed_secs = (now_nanos - last) / NANOS_PER_SEC;
        let to_add = elapsed_secs.saturating_mul(u64::from(self.refill_rate));
        if to_add == 0 {
            return 0;
        }

        if self
            .last_refill
            .compare_exchange(last, now_nanos, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }

        let to_add = to_add.min(u64::from(self.capacity)) as u32;
        let previous = self
            .tokens
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| {
                Some(t.saturating_add(to_add).min(self.capacity))
            })
            .unwrap_or_else(|t| t);

        previous.saturating_add(to_add).min(self.capacity) - previous
    }

    /// Record activity at `now`.
    pub fn touch(&self, now: Instant) {
        self.last_seen.fetch_max(self.offset(now), Ordering::AcqRel);
    }

    /// When this bucket was last used (its creation time if never touched).
    pub fn last_seen(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_seen.load(Ordering::Acquire))
    }

    /// When tokens were last credited (its creation time if never refilled).
    pub fn last_refill(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_refill.load(Ordering::Acquire))
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen())
    }

    fn offset(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.origin).as_nanos() as u64
    }
}
