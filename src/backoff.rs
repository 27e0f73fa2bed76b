//! Capped exponential backoff.
//!
//! Backoff never sleeps: it only computes the instant before which the next
//! attempt must not start, and the caller checks that instant on later ticks.

use embassy_time::{Duration, Instant};

use crate::config::BackoffPolicy;

/// Retry gate shared by the link driver and the session manager.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    next_delay: Duration,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            next_delay: policy.initial,
            failures: 0,
            retry_at: None,
        }
    }

    /// Whether an attempt may start at `now`.
    pub fn ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    /// Records a failed attempt and returns the instant of the next allowed one.
    pub fn record_failure(&mut self, now: Instant) -> Instant {
        let delay = self.next_delay;
        let doubled = Duration::from_ticks(delay.as_ticks().saturating_mul(2));
        self.next_delay = doubled.min(self.policy.cap);
        self.failures = self.failures.saturating_add(1);
        let at = now + delay;
        self.retry_at = Some(at);
        at
    }

    /// Clears the failure history after a success.
    pub fn reset(&mut self) {
        self.next_delay = self.policy.initial;
        self.failures = 0;
        self.retry_at = None;
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Earliest instant of the next attempt, if one is gated.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(BackoffPolicy::new(
            Duration::from_secs(2),
            Duration::from_secs(10),
        ))
    }

    #[test]
    fn delays_double_up_to_the_cap() {
        let mut backoff = backoff();
        let t0 = Instant::from_secs(100);
        let mut delays = [0u64; 5];
        for delay in delays.iter_mut() {
            *delay = (backoff.record_failure(t0) - t0).as_secs();
        }
        assert_eq!(delays, [2, 4, 8, 10, 10]);
        assert_eq!(backoff.failures(), 5);
    }

    #[test]
    fn gate_opens_when_delay_elapses() {
        let mut backoff = backoff();
        let t0 = Instant::from_secs(100);
        assert!(backoff.ready(t0));
        backoff.record_failure(t0);
        assert!(!backoff.ready(t0 + Duration::from_secs(1)));
        assert!(backoff.ready(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn reset_restarts_the_progression() {
        let mut backoff = backoff();
        let t0 = Instant::from_secs(0);
        backoff.record_failure(t0);
        backoff.record_failure(t0);
        backoff.reset();
        assert!(backoff.ready(t0));
        assert_eq!((backoff.record_failure(t0) - t0).as_secs(), 2);
    }
}
