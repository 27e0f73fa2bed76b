//! # Device Configuration
//!
//! Everything a telemetry node needs to know at startup: network and broker
//! addresses, the session identity (with optional credentials and last-will),
//! timing policy and topic layout. Values are borrowed, so on a device they are
//! usually `'static` constants or strings parked in a `StaticCell`.

use embassy_time::Duration;

use crate::error::ConfigError;
use crate::packet::QoS;
use crate::topics::TopicLayout;

/// Default MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Credentials for joining the wireless network.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkCredentials<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

impl<'a> NetworkCredentials<'a> {
    pub const fn new(ssid: &'a str, password: &'a str) -> Self {
        Self { ssid, password }
    }
}

impl core::fmt::Debug for NetworkCredentials<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetworkCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// IPv4 address and port of the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BrokerAddress {
    pub ip: [u8; 4],
    pub port: u16,
}

impl BrokerAddress {
    pub const fn new(ip: [u8; 4], port: u16) -> Self {
        Self { ip, port }
    }
}

impl core::fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let [a, b, c, d] = self.ip;
        write!(f, "{}.{}.{}.{}:{}", a, b, c, d, self.port)
    }
}

/// Broker login.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: Option<&'a [u8]>,
}

impl core::fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.map(|_| "<redacted>"))
            .finish()
    }
}

/// Message the broker publishes on the client's behalf after an unclean disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> LastWill<'a> {
    /// A will with QoS 0 and no retain flag.
    pub const fn new(topic: &'a str, payload: &'a [u8]) -> Self {
        Self {
            topic,
            payload,
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub const fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub const fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// Who the device is to the broker. Immutable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity<'a> {
    pub client_id: &'a str,
    pub credentials: Option<Credentials<'a>>,
    pub will: Option<LastWill<'a>>,
}

impl<'a> SessionIdentity<'a> {
    pub const fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            credentials: None,
            will: None,
        }
    }

    pub const fn with_credentials(mut self, username: &'a str, password: &'a [u8]) -> Self {
        self.credentials = Some(Credentials {
            username,
            password: Some(password),
        });
        self
    }

    pub const fn with_will(mut self, will: LastWill<'a>) -> Self {
        self.will = Some(will);
        self
    }
}

/// Capped exponential backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound for any delay.
    pub cap: Duration,
}

impl BackoffPolicy {
    pub const fn new(initial: Duration, cap: Duration) -> Self {
        Self { initial, cap }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial.as_ticks() == 0 || self.initial > self.cap {
            return Err(ConfigError::InvalidBackoff);
        }
        Ok(())
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(60))
    }
}

/// When and how to refresh the wall-clock reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPolicy {
    /// Period between successful refreshes.
    pub interval: Duration,
    /// Delay before retrying after a failed refresh.
    pub retry_interval: Duration,
    /// Bound on a single query.
    pub timeout: Duration,
    /// Age after which the cached reference is reported as stale.
    pub stale_after: Duration,
    /// Fixed offset added to reported epoch seconds.
    pub utc_offset_secs: i32,
}

impl Default for TimeSyncPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            retry_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            stale_after: Duration::from_secs(3600),
            utc_offset_secs: 0,
        }
    }
}

/// Complete configuration of a telemetry node.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConfig<'a> {
    pub network: NetworkCredentials<'a>,
    pub broker: BrokerAddress,
    pub identity: SessionIdentity<'a>,
    pub topics: TopicLayout<'a>,
    /// Maximum silence the broker tolerates before firing the will.
    pub keepalive: Duration,
    /// Scheduler period.
    pub tick_interval: Duration,
    /// Largest payload the session accepts.
    pub max_payload: usize,
    /// Backoff between link and broker reconnect attempts.
    pub backoff: BackoffPolicy,
    /// Bound on a single association attempt.
    pub attempt_timeout: Duration,
    /// Bound on opening the stream and completing the handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for PUBACK / PINGRESP.
    pub response_timeout: Duration,
    pub clean_session: bool,
    /// Treat "server unavailable" refusals as transient instead of fatal.
    pub retry_server_unavailable: bool,
    /// Register a will (`"0"` on the device will topic) when the identity has none.
    pub default_will: bool,
    pub telemetry_qos: QoS,
    pub telemetry_retain: bool,
    pub time_sync: TimeSyncPolicy,
}

impl<'a> DeviceConfig<'a> {
    /// Creates a configuration with default timing.
    pub fn new(
        network: NetworkCredentials<'a>,
        broker: BrokerAddress,
        identity: SessionIdentity<'a>,
        topics: TopicLayout<'a>,
    ) -> Self {
        Self {
            network,
            broker,
            identity,
            topics,
            keepalive: Duration::from_secs(15),
            tick_interval: Duration::from_secs(5),
            max_payload: 200,
            backoff: BackoffPolicy::default(),
            attempt_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(3),
            clean_session: true,
            retry_server_unavailable: false,
            default_will: true,
            telemetry_qos: QoS::AtMostOnce,
            telemetry_retain: false,
            time_sync: TimeSyncPolicy::default(),
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_timeouts(mut self, attempt: Duration, connect: Duration, response: Duration) -> Self {
        self.attempt_timeout = attempt;
        self.connect_timeout = connect;
        self.response_timeout = response;
        self
    }

    pub fn with_telemetry(mut self, qos: QoS, retain: bool) -> Self {
        self.telemetry_qos = qos;
        self.telemetry_retain = retain;
        self
    }

    pub fn with_time_sync(mut self, policy: TimeSyncPolicy) -> Self {
        self.time_sync = policy;
        self
    }

    pub fn with_retry_server_unavailable(mut self, retry: bool) -> Self {
        self.retry_server_unavailable = retry;
        self
    }

    pub fn with_default_will(mut self, enabled: bool) -> Self {
        self.default_will = enabled;
        self
    }

    /// Keepalive in whole seconds as sent in CONNECT.
    pub fn keepalive_secs(&self) -> u16 {
        self.keepalive.as_secs().min(u16::MAX as u64) as u16
    }

    /// Checks the invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.identity.client_id.is_empty() {
            return Err(ConfigError::EmptyClientId);
        }
        let keepalive_secs = self.keepalive.as_secs();
        if keepalive_secs == 0 || keepalive_secs > u16::MAX as u64 {
            return Err(ConfigError::KeepaliveOutOfRange);
        }
        if self.tick_interval.as_ticks() == 0 {
            return Err(ConfigError::ZeroTickInterval);
        }
        // The broker sees whole seconds, so compare against what goes on the wire.
        let wire_keepalive = Duration::from_secs(keepalive_secs);
        if self.tick_interval >= wire_keepalive {
            return Err(ConfigError::TickNotShorterThanKeepalive);
        }
        if self.max_payload == 0 {
            return Err(ConfigError::ZeroPayloadCeiling);
        }
        self.backoff.validate()?;
        self.topics.validate()
    }
}
