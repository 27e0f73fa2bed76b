//! # Error Types
//!
//! This module defines the error types used throughout the crate, from wire-level
//! codec failures up to the link, session and time-sync layers. Each layer has its
//! own enum so callers can tell transient failures (retried on a later tick) from
//! fatal ones (held until an explicit reset).

use core::fmt;

/// Errors produced while encoding or decoding MQTT packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PacketError {
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// The bytes violate the MQTT specification.
    Protocol(ProtocolError),
}

impl From<ProtocolError> for PacketError {
    fn from(err: ProtocolError) -> Self {
        PacketError::Protocol(err)
    }
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::BufferTooSmall => write!(f, "buffer too small"),
            PacketError::Protocol(p) => write!(f, "protocol error: {}", p),
        }
    }
}

impl core::error::Error for PacketError {}

/// The primary error enum for the MQTT client.
///
/// It is generic over the transport error type `T`, allowing it to wrap
/// specific errors from the underlying network transport (e.g., TCP, UART).
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// A protocol-level error occurred, indicating a violation of the MQTT specification.
    Protocol(ProtocolError),
    /// The connection was refused by the broker. The enclosed code provides the reason.
    ConnectionRefused(ConnectReasonCode),
    /// The client is not currently connected to the broker.
    NotConnected,
    /// The buffer provided for an operation was too small.
    BufferTooSmall,
    /// An operation timed out.
    Timeout,
}

impl<T> From<PacketError> for MqttError<T> {
    fn from(err: PacketError) -> Self {
        match err {
            PacketError::BufferTooSmall => MqttError::BufferTooSmall,
            PacketError::Protocol(p) => MqttError::Protocol(p),
        }
    }
}

/// Represents the reason codes for a connection refusal (`CONNACK`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReasonCode {
    /// The connection was accepted.
    Success,
    /// The broker does not support the requested MQTT protocol version.
    UnacceptableProtocolVersion,
    /// The client identifier is not valid.
    IdentifierRejected,
    /// The broker is unavailable.
    ServerUnavailable,
    /// The username or password is not valid.
    BadUserNameOrPassword,
    /// The client is not authorized to connect.
    NotAuthorized,
    /// An unknown or unspecified error occurred.
    Other(u8),
}

impl ConnectReasonCode {
    /// Raw CONNACK return code.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::UnacceptableProtocolVersion => 1,
            Self::IdentifierRejected => 2,
            Self::ServerUnavailable => 3,
            Self::BadUserNameOrPassword => 4,
            Self::NotAuthorized => 5,
            Self::Other(val) => val,
        }
    }
}

impl From<u8> for ConnectReasonCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Success,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

impl fmt::Display for ConnectReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "accepted",
            Self::UnacceptableProtocolVersion => "unacceptable protocol version",
            Self::IdentifierRejected => "identifier rejected",
            Self::ServerUnavailable => "server unavailable",
            Self::BadUserNameOrPassword => "bad user name or password",
            Self::NotAuthorized => "not authorized",
            Self::Other(_) => "unknown reason",
        };
        write!(f, "{} (code {})", label, self.code())
    }
}

/// Enumerates specific MQTT protocol errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// An invalid packet type was received.
    InvalidPacketType(u8),
    /// The server sent an invalid or unexpected response.
    InvalidResponse,
    /// The connection was closed by the broker.
    ConnectionClosed,
    /// A packet was received that was not correctly formed.
    MalformedPacket,
    /// The payload of a message exceeds the maximum allowable size.
    PayloadTooLarge,
    /// A string was not valid UTF-8.
    InvalidUtf8String,
    /// A topic name was empty or contained wildcard characters.
    InvalidTopic,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPacketType(t) => write!(f, "invalid packet type {}", t),
            Self::InvalidResponse => write!(f, "unexpected response"),
            Self::ConnectionClosed => write!(f, "connection closed by peer"),
            Self::MalformedPacket => write!(f, "malformed packet"),
            Self::PayloadTooLarge => write!(f, "payload too large"),
            Self::InvalidUtf8String => write!(f, "invalid UTF-8 string"),
            Self::InvalidTopic => write!(f, "invalid topic name"),
        }
    }
}

/// Failures of the wireless link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// The access point refused the network credentials. Not retried until reset.
    CredentialsRejected,
    /// No access point answered, or association failed for a non-auth reason.
    NoSignal,
    /// The association attempt did not complete within its timeout.
    Timeout,
    /// A previous attempt failed and the backoff delay has not elapsed yet.
    RetryPending,
}

impl LinkError {
    /// Fatal link errors are held until an explicit reset.
    pub fn is_fatal(self) -> bool {
        matches!(self, LinkError::CredentialsRejected)
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CredentialsRejected => write!(f, "network credentials rejected"),
            Self::NoSignal => write!(f, "no signal"),
            Self::Timeout => write!(f, "association timed out"),
            Self::RetryPending => write!(f, "waiting for backoff"),
        }
    }
}

impl core::error::Error for LinkError {}

/// Why a broker session entered the `Faulted` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionFault {
    /// The broker refused the handshake.
    Rejected(ConnectReasonCode),
    /// The broker answered the handshake with a frame we could not accept.
    MalformedReply(ProtocolError),
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(code) => write!(f, "broker rejected session: {}", code),
            Self::MalformedReply(p) => write!(f, "malformed broker reply: {}", p),
        }
    }
}

/// Errors reported by the broker session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The session is not connected; the operation was skipped without I/O.
    NotConnected,
    /// The wireless link is not up.
    LinkDown,
    /// The payload exceeds the configured ceiling or the frame buffer.
    PayloadTooLarge { size: usize, limit: usize },
    /// The topic is empty or contains wildcards.
    InvalidTopic,
    /// The session is faulted and waits for an explicit reset.
    Faulted(SessionFault),
    /// A bounded operation did not complete in time.
    Timeout,
    /// The broker could not be reached or the stream failed.
    Unreachable,
    /// The broker broke the protocol while the session was up.
    Protocol(ProtocolError),
    /// No traffic was received for the whole keepalive interval.
    KeepaliveExpired,
    /// A previous attempt failed and the backoff delay has not elapsed yet.
    RetryPending,
}

impl SessionError {
    /// Fatal errors need operator attention; everything else heals on a later tick.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            SessionError::Faulted(_) | SessionError::PayloadTooLarge { .. }
        )
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::LinkDown => write!(f, "link down"),
            Self::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", size, limit)
            }
            Self::InvalidTopic => write!(f, "invalid topic"),
            Self::Faulted(fault) => write!(f, "session faulted: {}", fault),
            Self::Timeout => write!(f, "broker did not answer in time"),
            Self::Unreachable => write!(f, "broker unreachable"),
            Self::Protocol(p) => write!(f, "protocol error: {}", p),
            Self::KeepaliveExpired => write!(f, "keepalive expired"),
            Self::RetryPending => write!(f, "waiting for backoff"),
        }
    }
}

impl core::error::Error for SessionError {}

/// Errors reported by the time synchronisation client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimeSyncError {
    /// The time server could not be reached.
    Unreachable,
    /// The time server did not answer in time.
    Timeout,
    /// The answer was not a usable time reference.
    InvalidResponse,
}

impl fmt::Display for TimeSyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable => write!(f, "time server unreachable"),
            Self::Timeout => write!(f, "time server timed out"),
            Self::InvalidResponse => write!(f, "invalid time server response"),
        }
    }
}

impl core::error::Error for TimeSyncError {}

/// Configuration rejected by [`DeviceConfig::validate`](crate::config::DeviceConfig::validate).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The tick interval must be strictly shorter than the keepalive interval.
    TickNotShorterThanKeepalive,
    /// The keepalive must be between 1 and 65535 seconds.
    KeepaliveOutOfRange,
    /// The tick interval must be non-zero.
    ZeroTickInterval,
    /// Backoff delays must be non-zero and the initial delay must not exceed the cap.
    InvalidBackoff,
    /// The client identifier must not be empty.
    EmptyClientId,
    /// The payload ceiling must be non-zero.
    ZeroPayloadCeiling,
    /// Tenant and device class must not be empty or contain topic separators.
    InvalidTopicLayout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::TickNotShorterThanKeepalive => "tick interval must be shorter than keepalive",
            Self::KeepaliveOutOfRange => "keepalive must be 1..=65535 seconds",
            Self::ZeroTickInterval => "tick interval must be non-zero",
            Self::InvalidBackoff => "backoff must satisfy 0 < initial <= cap",
            Self::EmptyClientId => "client identifier must not be empty",
            Self::ZeroPayloadCeiling => "payload ceiling must be non-zero",
            Self::InvalidTopicLayout => "tenant and device class must be plain topic levels",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for ConfigError {}
