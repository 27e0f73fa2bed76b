//! # Resilient MQTT Telemetry for Embedded Systems
//!
//! `myrtio-telemetry` is a `no_std`, `no_alloc` runtime for a battery of sensors that
//! publishes readings to an MQTT broker over a flaky wireless link, built upon the
//! [Embassy](https://embassy.dev/) async ecosystem.
//!
//! ## Core Features
//!
//! - **Explicit state machines:** the wireless link ([`LinkState`]) and the broker
//!   session ([`SessionState`]) are owned by their components and advanced one bounded
//!   step per tick. Nothing blocks waiting for a peer.
//! - **Backoff, not storms:** transient failures are retried on later ticks with capped
//!   exponential backoff; rejected credentials are held as faults until an operator
//!   reset.
//! - **Keepalive guarantee:** while connected, some frame reaches the broker on every
//!   tick, so the last-will only fires when the device is really gone.
//! - **Degraded output over no output:** a failed sensor read drops that metric only,
//!   and without a time reference the `time` field is simply omitted.
//! - **Transport Agnostic:** the [`MqttTransport`](transport::MqttTransport) trait
//!   abstracts the stream; an `embassy-net` TCP implementation is included, as is an
//!   SNTP [`TimeSource`](time_sync::TimeSource) over UDP.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ──tick──> LinkDriver ──> SessionManager ──> MqttClient ──> MqttTransport
//!      │                                  ^
//!      ├──> TimeSyncClient ──> TimeSource │
//!      └──> Sensor ──> Publisher ─────────┘
//! ```
//!
//! A node is assembled once at startup and then ticked forever:
//!
//! ```ignore
//! let config = DeviceConfig::new(network, broker, identity, TopicLayout::new("a1b2c3", "esp32"))
//!     .with_keepalive(Duration::from_secs(30));
//!
//! let mut node: Scheduler<'_, _, _, _, _, 512> =
//!     Scheduler::new(&config, radio, TcpTransport::new(socket, timeout), sntp, sensor)?
//!         .with_control(CONTROL.receiver());
//! node.run().await
//! ```

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod link;
pub mod packet;
pub mod payload;
pub mod publisher;
pub mod scheduler;
pub mod sensor;
pub mod session;
pub mod sntp;
pub mod time_sync;
pub mod topics;
pub mod transport;
pub mod util;

#[cfg(test)]
mod testing;

// Re-export key types for easier access at the crate root.
pub use client::MqttClient;
pub use config::{BrokerAddress, DeviceConfig, LastWill, NetworkCredentials, SessionIdentity};
pub use link::{LinkDriver, LinkState, Radio};
pub use packet::QoS;
pub use publisher::{PublishAttempt, PublishOutcome, Publisher};
pub use scheduler::{Command, ControlChannel, Scheduler};
pub use sensor::{Metric, Reading, Sensor};
pub use session::{SessionManager, SessionState};
pub use sntp::SntpClient;
pub use time_sync::{TimeReference, TimeSyncClient};
pub use topics::TopicLayout;
pub use transport::TcpTransport;
