//! # Wireless Link Driver
//!
//! Owns the radio and keeps the link state machine:
//!
//! ```text
//! Down --(bring_up)--> Connecting --(associated)--> Up
//! Connecting --(failure / timeout)--> Down      // retried after backoff
//! Up --(radio reports loss)--> Down
//! Down --(radio rejoined by itself)--> Up
//! ```
//!
//! A rejected password is fatal: the driver holds `CredentialsRejected` and does
//! not touch the radio again until [`LinkDriver::reset`].

use embassy_time::{Duration, Instant, with_timeout};

use crate::backoff::Backoff;
use crate::config::{BackoffPolicy, NetworkCredentials};
use crate::error::LinkError;

/// State of the wireless link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    Down,
    Connecting,
    Up,
}

/// Why a single association attempt failed, as reported by the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioFailure {
    /// The configured network was not found.
    NoSsidAvailable,
    /// The access point rejected the password.
    AuthFailed,
    /// Association started but did not complete.
    ConnectFailed,
    /// The association was lost while in progress.
    ConnectionLost,
    /// The radio gave up waiting.
    Timeout,
}

impl From<RadioFailure> for LinkError {
    fn from(failure: RadioFailure) -> Self {
        match failure {
            RadioFailure::AuthFailed => LinkError::CredentialsRejected,
            RadioFailure::Timeout => LinkError::Timeout,
            RadioFailure::NoSsidAvailable
            | RadioFailure::ConnectFailed
            | RadioFailure::ConnectionLost => LinkError::NoSignal,
        }
    }
}

/// The radio hardware as seen by the link driver.
#[allow(async_fn_in_trait)]
pub trait Radio {
    /// Performs one association attempt.
    async fn associate(&mut self, credentials: &NetworkCredentials<'_>) -> Result<(), RadioFailure>;

    /// Current association status. Must not block.
    fn is_associated(&self) -> bool;

    /// Leaves the network.
    async fn disassociate(&mut self);
}

/// Brings the wireless link up and keeps track of it.
pub struct LinkDriver<R> {
    radio: R,
    state: LinkState,
    backoff: Backoff,
    attempt_timeout: Duration,
    fault: Option<LinkError>,
    attempts: u32,
}

impl<R: Radio> LinkDriver<R> {
    pub fn new(radio: R, backoff: BackoffPolicy, attempt_timeout: Duration) -> Self {
        Self {
            radio,
            state: LinkState::Down,
            backoff: Backoff::new(backoff),
            attempt_timeout,
            fault: None,
            attempts: 0,
        }
    }

    /// Polls the radio and returns the current state without blocking.
    pub fn status(&mut self) -> LinkState {
        match (self.state, self.radio.is_associated()) {
            (LinkState::Up, false) => {
                warn!("link lost");
                self.state = LinkState::Down;
                // First reconnect right away; failures after that back off.
                self.backoff.reset();
            }
            (LinkState::Down, true) if self.fault.is_none() => {
                info!("link restored by radio");
                self.state = LinkState::Up;
                self.backoff.reset();
            }
            _ => {}
        }
        self.state
    }

    /// Makes one association attempt unless the link is up, faulted or backing off.
    pub async fn bring_up(
        &mut self,
        credentials: &NetworkCredentials<'_>,
        now: Instant,
    ) -> Result<(), LinkError> {
        if self.status() == LinkState::Up {
            return Ok(());
        }
        if let Some(fault) = self.fault {
            return Err(fault);
        }
        if !self.backoff.ready(now) {
            return Err(LinkError::RetryPending);
        }

        self.state = LinkState::Connecting;
        self.attempts = self.attempts.saturating_add(1);
        debug!("associating with '{}' (attempt {})", credentials.ssid, self.attempts);

        let result = match with_timeout(self.attempt_timeout, self.radio.associate(credentials)).await {
            Ok(result) => result.map_err(LinkError::from),
            Err(_) => Err(LinkError::Timeout),
        };

        match result {
            Ok(()) => {
                info!("link up after {} attempt(s)", self.backoff.failures() + 1);
                self.state = LinkState::Up;
                self.backoff.reset();
                Ok(())
            }
            Err(LinkError::CredentialsRejected) => {
                error!("link: network '{}' rejected credentials", credentials.ssid);
                self.state = LinkState::Down;
                self.fault = Some(LinkError::CredentialsRejected);
                Err(LinkError::CredentialsRejected)
            }
            Err(e) => {
                self.state = LinkState::Down;
                let retry_at = self.backoff.record_failure(now);
                warn!(
                    "link: {}, retry in {} ms",
                    e,
                    retry_at.saturating_duration_since(now).as_millis()
                );
                Err(e)
            }
        }
    }

    /// Leaves the network.
    pub async fn teardown(&mut self) {
        self.radio.disassociate().await;
        self.state = LinkState::Down;
        info!("link torn down");
    }

    /// Clears a held credentials fault so association is attempted again.
    pub fn reset(&mut self) {
        if self.fault.take().is_some() {
            info!("link fault cleared");
        }
        self.backoff.reset();
    }

    pub fn fault(&self) -> Option<LinkError> {
        self.fault
    }

    /// Association attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Earliest instant of the next attempt while backing off.
    pub fn retry_at(&self) -> Option<Instant> {
        self.backoff.retry_at()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }
}
