//! # Broker Session Manager
//!
//! Drives the broker session through its states on behalf of the scheduler:
//!
//! ```text
//! Disconnected --(link Up & ensure_connected)--> Connecting
//! Connecting   --(CONNACK accepted)-------------> Connected
//! Connecting   --(CONNACK refused / malformed)--> Faulted
//! Connecting   --(timeout / unreachable)-------> Disconnected   // backoff
//! Connected    --(link down, keepalive silence,
//!                 malformed frame, I/O error)---> Disconnected
//! Faulted      --(reset)-----------------------> Disconnected
//! ```
//!
//! Every wire operation is a single attempt bounded by a timeout. Nothing is
//! retried within a call; a failed attempt is retried on a later tick once the
//! session backoff allows it.
//!
//! A session only counts as established once the broker has answered something
//! after CONNACK (a PINGRESP or PUBACK). A session dropped before that counts as
//! a failed connect, so a broker that accepts the handshake and then kicks the
//! client is retried with backoff instead of on every tick.

use embassy_time::{Duration, Instant, with_timeout};

use crate::backoff::Backoff;
use crate::client::MqttClient;
use crate::config::{BrokerAddress, DeviceConfig, LastWill, SessionIdentity};
use crate::error::{ConnectReasonCode, MqttError, ProtocolError, SessionError, SessionFault};
use crate::link::LinkState;
use crate::packet::{Connect, QoS};
use crate::topics::Topic;
use crate::transport::MqttTransport;

/// Payload of the default will: the device is gone.
pub const WILL_PAYLOAD: &[u8] = b"0";

/// State of the broker session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

/// Keepalive agreed at handshake time.
///
/// MQTT 3.1.1 brokers do not echo a keepalive back, so the contract is the
/// interval the client requested and the broker accepted with its CONNACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveContract {
    pub interval: Duration,
}

/// Owns the MQTT client and the session state machine.
pub struct SessionManager<'a, T, const BUF_SIZE: usize> {
    client: MqttClient<T, BUF_SIZE>,
    broker: BrokerAddress,
    identity: SessionIdentity<'a>,
    /// Used when the identity carries no will of its own.
    default_will_topic: Option<Topic>,
    requested_keepalive: Duration,
    max_payload: usize,
    connect_timeout: Duration,
    response_timeout: Duration,
    clean_session: bool,
    retry_server_unavailable: bool,
    state: SessionState,
    keepalive: Option<KeepaliveContract>,
    fault: Option<SessionFault>,
    backoff: Backoff,
    /// The broker answered after the handshake.
    established: bool,
    last_tx: Option<Instant>,
    last_rx: Option<Instant>,
    sent_this_cycle: bool,
    connect_attempts: u32,
}

impl<'a, T, const BUF_SIZE: usize> SessionManager<'a, T, BUF_SIZE>
where
    T: MqttTransport,
{
    pub fn new(transport: T, config: &DeviceConfig<'a>) -> Self {
        let default_will_topic = if config.default_will {
            config.topics.will_topic().ok()
        } else {
            None
        };
        Self {
            client: MqttClient::new(transport),
            broker: config.broker,
            identity: config.identity,
            default_will_topic,
            requested_keepalive: Duration::from_secs(config.keepalive_secs() as u64),
            max_payload: config.max_payload,
            connect_timeout: config.connect_timeout,
            response_timeout: config.response_timeout,
            clean_session: config.clean_session,
            retry_server_unavailable: config.retry_server_unavailable,
            state: SessionState::Disconnected,
            keepalive: None,
            fault: None,
            backoff: Backoff::new(config.backoff),
            established: false,
            last_tx: None,
            last_rx: None,
            sent_this_cycle: false,
            connect_attempts: 0,
        }
    }

    /// Makes sure a session is up, performing at most one connect cycle.
    ///
    /// A faulted session returns [`SessionError::Faulted`] without any I/O until
    /// [`reset`](Self::reset) is called.
    pub async fn ensure_connected(&mut self, link: LinkState, now: Instant) -> Result<(), SessionError> {
        match self.state {
            SessionState::Faulted => {
                return Err(self
                    .fault
                    .map_or(SessionError::NotConnected, SessionError::Faulted));
            }
            SessionState::Connected if link == LinkState::Up => return Ok(()),
            SessionState::Connected => {
                warn!("session: link went down, dropping session");
                // The broker is not to blame; only a settled session clears the backoff.
                if self.established {
                    self.backoff.reset();
                }
                self.close_session();
                return Err(SessionError::LinkDown);
            }
            SessionState::Disconnected | SessionState::Connecting => {}
        }

        if link != LinkState::Up {
            return Err(SessionError::LinkDown);
        }
        if !self.backoff.ready(now) {
            return Err(SessionError::RetryPending);
        }

        self.state = SessionState::Connecting;
        self.connect_attempts = self.connect_attempts.saturating_add(1);
        debug!(
            "session: connecting to {} as '{}' (attempt {})",
            self.broker, self.identity.client_id, self.connect_attempts
        );

        let connect = Connect {
            clean_session: self.clean_session,
            keep_alive: self.requested_keepalive.as_secs() as u16,
            client_id: self.identity.client_id,
            credentials: self.identity.credentials,
            will: self.identity.will.or_else(|| {
                self.default_will_topic
                    .as_ref()
                    .map(|topic| LastWill::new(topic.as_str(), WILL_PAYLOAD))
            }),
        };
        let result = with_timeout(self.connect_timeout, self.client.connect(&self.broker, &connect)).await;

        match result {
            Ok(Ok(ack)) => {
                info!(
                    "session: connected to {} (session present: {})",
                    self.broker, ack.session_present
                );
                self.state = SessionState::Connected;
                self.keepalive = Some(KeepaliveContract {
                    interval: self.requested_keepalive,
                });
                self.established = false;
                self.last_tx = Some(now);
                self.last_rx = Some(now);
                self.sent_this_cycle = true;
                Ok(())
            }
            Ok(Err(MqttError::ConnectionRefused(code))) => {
                self.client.abort();
                if code == ConnectReasonCode::ServerUnavailable && self.retry_server_unavailable {
                    self.connect_failed(SessionError::Unreachable, now)
                } else {
                    self.enter_fault(SessionFault::Rejected(code))
                }
            }
            Ok(Err(MqttError::Protocol(ProtocolError::InvalidTopic))) => {
                self.client.abort();
                error!("session: will topic '{:?}' is invalid", self.identity.will.map(|w| w.topic));
                self.connect_failed(SessionError::InvalidTopic, now)
            }
            Ok(Err(MqttError::Protocol(ProtocolError::ConnectionClosed))) => {
                self.client.abort();
                self.connect_failed(SessionError::Unreachable, now)
            }
            Ok(Err(MqttError::Protocol(p))) => {
                self.client.abort();
                self.enter_fault(SessionFault::MalformedReply(p))
            }
            Ok(Err(MqttError::BufferTooSmall)) => {
                self.client.abort();
                error!("session: CONNECT does not fit the {} byte buffer", BUF_SIZE);
                self.connect_failed(SessionError::Protocol(ProtocolError::PayloadTooLarge), now)
            }
            Ok(Err(MqttError::Transport(e))) => {
                self.client.abort();
                debug!("session: transport error during handshake: {:?}", e);
                self.connect_failed(SessionError::Unreachable, now)
            }
            Ok(Err(MqttError::NotConnected | MqttError::Timeout)) | Err(_) => {
                self.client.abort();
                self.connect_failed(SessionError::Timeout, now)
            }
        }
    }

    /// Publishes one message on a connected session.
    ///
    /// Oversized payloads and invalid topics are rejected before anything is
    /// written, leaving the session untouched.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if payload.len() > self.max_payload {
            warn!(
                "session: payload of {} bytes for '{}' exceeds limit of {}",
                payload.len(),
                topic,
                self.max_payload
            );
            return Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_payload,
            });
        }

        let result = with_timeout(
            self.response_timeout,
            self.client.publish(topic, payload, qos, retain),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                self.last_tx = Some(now);
                if qos == QoS::AtLeastOnce {
                    self.last_rx = Some(now);
                    self.mark_established();
                }
                self.sent_this_cycle = true;
                Ok(())
            }
            Ok(Err(MqttError::BufferTooSmall)) => Err(SessionError::PayloadTooLarge {
                size: payload.len(),
                limit: BUF_SIZE,
            }),
            Ok(Err(MqttError::Protocol(ProtocolError::InvalidTopic))) => Err(SessionError::InvalidTopic),
            Ok(Err(MqttError::Protocol(p))) => {
                warn!("session: protocol error while publishing: {}", p);
                self.drop_session(now);
                Err(SessionError::Protocol(p))
            }
            Ok(Err(e)) => {
                warn!("session: publish to '{}' failed: {:?}", topic, e);
                self.drop_session(now);
                Err(SessionError::Unreachable)
            }
            Err(_) => {
                warn!("session: publish to '{}' timed out", topic);
                self.drop_session(now);
                Err(SessionError::Timeout)
            }
        }
    }

    /// Sends PINGREQ when this cycle was silent or nothing was heard from the
    /// broker for a whole keepalive interval. Returns whether a ping was sent.
    ///
    /// A missing PINGRESP drops the session; the broker then fires the will.
    pub async fn ping_or_publish_within_keepalive(&mut self, now: Instant) -> Result<bool, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        let interval = self
            .keepalive
            .map_or(self.requested_keepalive, |contract| contract.interval);
        let broker_silent = self
            .last_rx
            .is_none_or(|rx| now.saturating_duration_since(rx) >= interval);
        if self.sent_this_cycle && !broker_silent {
            return Ok(false);
        }

        trace!("session: PINGREQ");
        match with_timeout(self.response_timeout, self.client.ping()).await {
            Ok(Ok(())) => {
                self.last_tx = Some(now);
                self.last_rx = Some(now);
                self.sent_this_cycle = true;
                self.mark_established();
                Ok(true)
            }
            Ok(Err(e)) => {
                warn!("session: keepalive failed: {:?}", e);
                self.drop_session(now);
                Err(SessionError::KeepaliveExpired)
            }
            Err(_) => {
                warn!("session: no PINGRESP within {} ms", self.response_timeout.as_millis());
                self.drop_session(now);
                Err(SessionError::KeepaliveExpired)
            }
        }
    }

    /// Marks the start of a scheduler cycle.
    pub fn begin_cycle(&mut self) {
        self.sent_this_cycle = false;
    }

    /// Leaves `Faulted`. Has no effect in any other state.
    pub fn reset(&mut self) {
        if self.state == SessionState::Faulted {
            info!("session: fault cleared");
            self.state = SessionState::Disconnected;
            self.fault = None;
            self.backoff.reset();
        }
    }

    /// Ends the session with DISCONNECT so the broker discards the will.
    pub async fn disconnect(&mut self) {
        if self.state == SessionState::Connected {
            if with_timeout(self.response_timeout, self.client.disconnect())
                .await
                .is_err()
            {
                self.client.abort();
            }
            info!("session: disconnected from {}", self.broker);
            self.state = SessionState::Disconnected;
            self.keepalive = None;
            self.backoff.reset();
        }
    }

    /// Ends the current session gracefully and uses `identity` from the next
    /// handshake on. A held fault stays held.
    pub async fn replace_identity(&mut self, identity: SessionIdentity<'a>) {
        self.disconnect().await;
        info!("session: identity replaced ('{}')", identity.client_id);
        self.identity = identity;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn fault(&self) -> Option<SessionFault> {
        self.fault
    }

    pub fn keepalive(&self) -> Option<KeepaliveContract> {
        self.keepalive
    }

    pub fn identity(&self) -> &SessionIdentity<'a> {
        &self.identity
    }

    /// Handshakes started so far.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }

    /// Instant of the last frame written, if any.
    pub fn last_tx(&self) -> Option<Instant> {
        self.last_tx
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.backoff.retry_at()
    }

    pub fn transport(&self) -> &T {
        self.client.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.client.transport_mut()
    }

    fn connect_failed(&mut self, err: SessionError, now: Instant) -> Result<(), SessionError> {
        self.state = SessionState::Disconnected;
        let retry_at = self.backoff.record_failure(now);
        warn!(
            "session: {}, retry in {} ms",
            err,
            retry_at.saturating_duration_since(now).as_millis()
        );
        Err(err)
    }

    fn enter_fault(&mut self, fault: SessionFault) -> Result<(), SessionError> {
        error!("session: {}; holding until reset", fault);
        self.state = SessionState::Faulted;
        self.fault = Some(fault);
        Err(SessionError::Faulted(fault))
    }

    fn mark_established(&mut self) {
        if !self.established {
            debug!("session: established after {} failure(s)", self.backoff.failures());
            self.established = true;
            self.backoff.reset();
        }
    }

    /// Unclean drop after a wire failure: the broker is left to publish the will.
    ///
    /// The first reconnect after an established session is immediate. A session
    /// that never got an answer counts as a failed connect.
    fn drop_session(&mut self, now: Instant) {
        if self.established {
            self.backoff.reset();
        } else {
            let retry_at = self.backoff.record_failure(now);
            warn!(
                "session: dropped before the broker answered, retry in {} ms",
                retry_at.saturating_duration_since(now).as_millis()
            );
        }
        self.close_session();
    }

    fn close_session(&mut self) {
        self.client.abort();
        self.state = SessionState::Disconnected;
        self.keepalive = None;
        self.established = false;
    }
}
