//! Per-principal token bucket rate limiting.
//!
//! Refill is stepwise, not fractional: tokens are reset to full capacity
//! whenever the *entire* window has elapsed since the last refill, rather
//! than topping up proportionally to elapsed time. This matches the
//! behavior of the bucket actually wired into the dispatcher upstream (as
//! opposed to an earlier, unused continuous-refill variant) and is simpler
//! to reason about at the boundary values §8 tests.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a [`RateLimiter::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Denied { retry_after_secs: u64 },
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// Keyed token buckets, lazily created on first check. Never closed over a
/// lock for longer than a single entry access — each principal's bucket is
/// an independent [`DashMap`] shard.
pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Check and consume one token for `principal`. `capacity` and `window`
    /// are supplied per-call so callers (tests, the dispatcher) can vary
    /// them without re-instantiating the limiter.
    pub fn check(&self, principal: &str, capacity: u32, window: Duration) -> RateDecision {
        self.check_at(principal, capacity, window, Instant::now())
    }

    fn check_at(
        &self,
        principal: &str,
        capacity: u32,
        window: Duration,
        now: Instant,
    ) -> RateDecision {
        let mut entry = self
            .buckets
            .entry(principal.to_string())
            .or_insert_with(|| Bucket {
                tokens: capacity,
                last_refill: now,
            });

        if now.duration_since(entry.last_refill) >= window {
            entry.tokens = capacity;
            entry.last_refill = now;
        }

        if entry.tokens > 0 {
            entry.tokens -= 1;
            RateDecision::Allowed {
                remaining: entry.tokens,
            }
        } else {
            let elapsed = now.duration_since(entry.last_refill);
            let retry_after = window.saturating_sub(elapsed);
            RateDecision::Denied {
                retry_after_secs: retry_after.as_secs().max(1),
            }
        }
    }

    /// Release a principal's bucket on disconnect.
    pub fn remove(&self, principal: &str) {
        self.buckets.remove(principal);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_capacity_then_denies() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..10 {
            assert!(matches!(
                limiter.check_at("alice", 10, window, now),
                RateDecision::Allowed { .. }
            ));
        }

        match limiter.check_at("alice", 10, window, now) {
            RateDecision::Denied { retry_after_secs } => assert!(retry_after_secs > 0),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn denial_is_non_destructive_and_repeatable() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..10 {
            limiter.check_at("bob", 10, window, now);
        }
        for _ in 0..5 {
            assert!(matches!(
                limiter.check_at("bob", 10, window, now),
                RateDecision::Denied { .. }
            ));
        }
    }

    #[test]
    fn refill_is_stepwise_not_fractional() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        let t0 = Instant::now();

        for _ in 0..10 {
            limiter.check_at("carol", 10, window, t0);
        }
        assert!(matches!(
            limiter.check_at("carol", 10, window, t0 + Duration::from_secs(30)),
            RateDecision::Denied { .. }
        ));

        assert!(matches!(
            limiter.check_at("carol", 10, window, t0 + Duration::from_secs(61)),
            RateDecision::Allowed { remaining: 9 }
        ));
    }

    #[test]
    fn remove_releases_the_bucket() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(60);
        let now = Instant::now();
        for _ in 0..10 {
            limiter.check_at("dave", 10, window, now);
        }
        limiter.remove("dave");
        assert!(matches!(
            limiter.check_at("dave", 10, window, now),
            RateDecision::Allowed { .. }
        ));
    }
}
