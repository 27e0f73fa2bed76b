//! # Wall-Clock Synchronisation
//!
//! Keeps an absolute time reference captured from a time server, and derives the
//! current epoch from the monotonic clock in between refreshes. Refreshing is
//! best effort: a failure keeps whatever reference is cached (possibly none).

use embassy_time::{Duration, Instant, with_timeout};

use crate::config::TimeSyncPolicy;
use crate::error::TimeSyncError;

/// Epoch seconds observed at a monotonic instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeReference {
    pub epoch_secs: u64,
    pub captured_at: Instant,
}

impl TimeReference {
    pub const fn new(epoch_secs: u64, captured_at: Instant) -> Self {
        Self {
            epoch_secs,
            captured_at,
        }
    }

    /// Epoch seconds at `now`, derived from the monotonic clock.
    pub fn epoch_at(&self, now: Instant) -> u64 {
        self.epoch_secs + now.saturating_duration_since(self.captured_at).as_secs()
    }

    /// Time elapsed since the reference was captured.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.captured_at)
    }
}

/// Something that can tell the current epoch time, e.g. an SNTP server.
#[allow(async_fn_in_trait)]
pub trait TimeSource {
    /// Queries the current time in seconds since the Unix epoch.
    async fn fetch_epoch(&mut self) -> Result<u64, TimeSyncError>;
}

/// Caches a [`TimeReference`] and refreshes it on its own, slower cadence.
pub struct TimeSyncClient<S> {
    source: S,
    policy: TimeSyncPolicy,
    reference: Option<TimeReference>,
    next_due: Option<Instant>,
    stale_reported: bool,
}

impl<S: TimeSource> TimeSyncClient<S> {
    pub fn new(source: S, policy: TimeSyncPolicy) -> Self {
        Self {
            source,
            policy,
            reference: None,
            next_due: None,
            stale_reported: false,
        }
    }

    /// Whether a refresh should be attempted at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_none_or(|due| now >= due)
    }

    /// Queries the time source once, bounded by the policy timeout.
    pub async fn refresh(&mut self, now: Instant) -> Result<TimeReference, TimeSyncError> {
        let result = match with_timeout(self.policy.timeout, self.source.fetch_epoch()).await {
            Ok(result) => result,
            Err(_) => Err(TimeSyncError::Timeout),
        };

        match result {
            Ok(epoch_secs) => {
                let reference = TimeReference::new(epoch_secs, now);
                if let Some(previous) = self.reference {
                    let drift = previous.epoch_at(now) as i64 - epoch_secs as i64;
                    debug!("time sync: epoch {} (drift {} s)", epoch_secs, drift);
                } else {
                    info!("time sync: epoch {}", epoch_secs);
                }
                self.reference = Some(reference);
                self.next_due = Some(now + self.policy.interval);
                self.stale_reported = false;
                Ok(reference)
            }
            Err(e) => {
                warn!("time sync failed: {}", e);
                self.next_due = Some(now + self.policy.retry_interval);
                if let Some(reference) = self.reference
                    && !self.stale_reported
                    && reference.age(now) >= self.policy.stale_after
                {
                    warn!(
                        "time reference is {} s old",
                        reference.age(now).as_secs()
                    );
                    self.stale_reported = true;
                }
                Err(e)
            }
        }
    }

    /// Refreshes only when due. Returns `None` when nothing was attempted.
    pub async fn refresh_if_due(
        &mut self,
        now: Instant,
    ) -> Option<Result<TimeReference, TimeSyncError>> {
        if self.is_due(now) {
            Some(self.refresh(now).await)
        } else {
            None
        }
    }

    /// The cached reference, if any was ever captured.
    pub fn reference(&self) -> Option<TimeReference> {
        self.reference
    }

    /// Epoch seconds at `now` with the configured offset, if a reference exists.
    pub fn epoch_at(&self, now: Instant) -> Option<u64> {
        let epoch = self.reference?.epoch_at(now);
        Some(epoch.saturating_add_signed(self.policy.utc_offset_secs as i64))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
