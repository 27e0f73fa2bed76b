//! Telemetry publishing.
//!
//! A [`Publisher`] turns one cycle of sensor readings into MQTT messages: one per
//! valid reading on its metric topic, followed by the liveness message on the
//! device-status topic. Every message is tried exactly once per cycle; failures
//! are recorded in the [`CycleReport`] and left to the session's own recovery.

use embassy_time::Instant;
use heapless::Vec;

use crate::config::DeviceConfig;
use crate::error::SessionError;
use crate::packet::QoS;
use crate::payload::{self, Payload};
use crate::sensor::{Metric, Reading};
use crate::session::SessionManager;
use crate::topics::{Topic, TopicLayout};
use crate::transport::MqttTransport;

/// Most metrics a sensor may report per cycle.
pub const MAX_METRICS: usize = 7;

/// Metric messages plus the liveness message.
pub const MAX_ATTEMPTS: usize = MAX_METRICS + 1;

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishOutcome {
    Sent,
    /// The session was not connected; nothing went on the wire.
    SkippedNotConnected,
    Failed(SessionError),
}

/// One message of a cycle. `payload` is `None` when it was never built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAttempt {
    pub topic: Topic,
    pub payload: Option<Payload>,
    pub outcome: PublishOutcome,
}

pub type CycleReport = Vec<PublishAttempt, MAX_ATTEMPTS>;

/// Formats and publishes telemetry for one device.
#[derive(Debug, Clone, Copy)]
pub struct Publisher<'a> {
    topics: TopicLayout<'a>,
    qos: QoS,
    retain: bool,
}

impl<'a> Publisher<'a> {
    pub const fn new(topics: TopicLayout<'a>, qos: QoS, retain: bool) -> Self {
        Self { topics, qos, retain }
    }

    pub fn from_config(config: &DeviceConfig<'a>) -> Self {
        Self::new(config.topics, config.telemetry_qos, config.telemetry_retain)
    }

    pub fn topics(&self) -> &TopicLayout<'a> {
        &self.topics
    }

    /// Publishes every valid reading and then the liveness message.
    ///
    /// A missing or non-finite reading is skipped on its own; its siblings and
    /// the liveness message are still published.
    pub async fn run_cycle<T, const BUF_SIZE: usize>(
        &self,
        readings: &[Reading],
        epoch: Option<u64>,
        session: &mut SessionManager<'_, T, BUF_SIZE>,
        now: Instant,
    ) -> CycleReport
    where
        T: MqttTransport,
    {
        let mut report = CycleReport::new();

        for reading in readings {
            let name = reading.metric.name;
            let Some(value) = reading.valid_value() else {
                warn!("no valid reading for '{}', skipping", name);
                continue;
            };
            let topic = match self.topics.metric_topic(name) {
                Ok(topic) => topic,
                Err(e) => {
                    warn!("no topic for '{}': {}", name, e);
                    continue;
                }
            };
            let attempt = match payload::metric_payload(name, value, epoch) {
                Ok(body) => self.publish(session, topic, body, now).await,
                Err(e) => PublishAttempt {
                    topic,
                    payload: None,
                    outcome: PublishOutcome::Failed(e),
                },
            };
            record(&mut report, attempt);
        }

        match (
            self.topics.status_topic(),
            payload::status_payload(self.topics.device_class),
        ) {
            (Ok(topic), Ok(body)) => {
                let attempt = self.publish(session, topic, body, now).await;
                record(&mut report, attempt);
            }
            (Err(e), _) | (_, Err(e)) => warn!("cannot build liveness message: {}", e),
        }

        report
    }

    /// Reports every message of a cycle as skipped without building payloads.
    pub fn skip_cycle(&self, metrics: &[Metric]) -> CycleReport {
        let mut report = CycleReport::new();
        let topics = metrics
            .iter()
            .map(|metric| self.topics.metric_topic(metric.name))
            .chain(core::iter::once(self.topics.status_topic()));
        for topic in topics.flatten() {
            record(
                &mut report,
                PublishAttempt {
                    topic,
                    payload: None,
                    outcome: PublishOutcome::SkippedNotConnected,
                },
            );
        }
        report
    }

    async fn publish<T, const BUF_SIZE: usize>(
        &self,
        session: &mut SessionManager<'_, T, BUF_SIZE>,
        topic: Topic,
        body: Payload,
        now: Instant,
    ) -> PublishAttempt
    where
        T: MqttTransport,
    {
        let outcome = match session
            .publish(&topic, body.as_bytes(), self.qos, self.retain, now)
            .await
        {
            Ok(()) => {
                info!("{}: {}", topic.as_str(), body.as_str());
                PublishOutcome::Sent
            }
            Err(SessionError::NotConnected) => PublishOutcome::SkippedNotConnected,
            Err(e) => {
                if e.is_fatal() {
                    error!("{}: {}", topic.as_str(), e);
                }
                PublishOutcome::Failed(e)
            }
        };
        PublishAttempt {
            topic,
            payload: Some(body),
            outcome,
        }
    }
}

fn record(report: &mut CycleReport, attempt: PublishAttempt) {
    if report.push(attempt).is_err() {
        debug!("cycle report full, dropping entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerAddress, NetworkCredentials, SessionIdentity};
    use crate::link::LinkState;
    use crate::testing::{FakeBroker, publish_payload};
    use embassy_futures::block_on;
    use embassy_time::Duration;

    fn config() -> DeviceConfig<'static> {
        DeviceConfig::new(
            NetworkCredentials::new("lab", "secret"),
            BrokerAddress::new([10, 0, 0, 1], 1883),
            SessionIdentity::new("esp32-lab"),
            TopicLayout::new("t", "esp32"),
        )
        .with_timeouts(
            Duration::from_millis(50),
            Duration::from_millis(50),
            Duration::from_millis(50),
        )
    }

    fn connected() -> SessionManager<'static, FakeBroker, 256> {
        let mut session = SessionManager::new(FakeBroker::new(), &config());
        block_on(session.ensure_connected(LinkState::Up, Instant::from_secs(0))).unwrap();
        session
    }

    fn outcomes(report: &CycleReport) -> std::vec::Vec<(&str, PublishOutcome)> {
        report.iter().map(|a| (a.topic.as_str(), a.outcome)).collect()
    }

    #[test]
    fn publishes_each_metric_then_liveness() {
        let publisher = Publisher::from_config(&config());
        let mut session = connected();
        let readings = [
            Reading::new(Metric::TEMPERATURE, Some(21.5)),
            Reading::new(Metric::HUMIDITY, Some(40.0)),
        ];

        let report = block_on(publisher.run_cycle(
            &readings,
            Some(1_700_000_000),
            &mut session,
            Instant::from_secs(5),
        ));
        assert_eq!(
            outcomes(&report),
            [
                ("in/t/esp32/temperature", PublishOutcome::Sent),
                ("in/t/esp32/humidity", PublishOutcome::Sent),
                ("in/t/devicestatus", PublishOutcome::Sent),
            ]
        );

        let frames = &session.transport().frames;
        assert_eq!(
            publish_payload(&frames[1]),
            br#"{"temperature":21.50,"time":1700000000}"#
        );
        assert_eq!(publish_payload(&frames[3]), br#"{"esp32":1}"#);
    }

    #[test]
    fn nan_reading_does_not_suppress_siblings_or_liveness() {
        let publisher = Publisher::from_config(&config());
        let mut session = connected();
        let readings = [
            Reading::new(Metric::TEMPERATURE, Some(f32::NAN)),
            Reading::new(Metric::HUMIDITY, Some(55.0)),
        ];

        let report = block_on(publisher.run_cycle(&readings, None, &mut session, Instant::from_secs(5)));
        assert_eq!(
            outcomes(&report),
            [
                ("in/t/esp32/humidity", PublishOutcome::Sent),
                ("in/t/devicestatus", PublishOutcome::Sent),
            ]
        );
        assert_eq!(
            session.transport().published_topics(),
            ["in/t/esp32/humidity", "in/t/devicestatus"]
        );
        assert_eq!(
            report[0].payload.as_ref().map(|p| p.as_str()),
            Some(r#"{"humidity":55.00}"#)
        );
    }

    #[test]
    fn disconnected_session_yields_skipped_attempts() {
        let publisher = Publisher::from_config(&config());
        let mut session: SessionManager<'_, _, 256> = SessionManager::new(FakeBroker::new(), &config());
        let readings = [Reading::new(Metric::TEMPERATURE, Some(20.0))];

        let report = block_on(publisher.run_cycle(&readings, None, &mut session, Instant::from_secs(0)));
        assert!(report
            .iter()
            .all(|a| a.outcome == PublishOutcome::SkippedNotConnected));
        assert!(session.transport().frames.is_empty());
    }

    #[test]
    fn failed_publish_is_not_retried_within_the_cycle() {
        let publisher = Publisher::from_config(&config());
        let mut session = connected();
        session.transport_mut().online = false;
        let readings = [
            Reading::new(Metric::TEMPERATURE, Some(20.0)),
            Reading::new(Metric::HUMIDITY, Some(50.0)),
        ];

        let report = block_on(publisher.run_cycle(&readings, None, &mut session, Instant::from_secs(5)));
        assert_eq!(
            outcomes(&report),
            [
                (
                    "in/t/esp32/temperature",
                    PublishOutcome::Failed(SessionError::Unreachable)
                ),
                ("in/t/esp32/humidity", PublishOutcome::SkippedNotConnected),
                ("in/t/devicestatus", PublishOutcome::SkippedNotConnected),
            ]
        );
    }

    #[test]
    fn oversized_payload_fails_only_that_metric() {
        let publisher = Publisher::from_config(&config());
        let mut session: SessionManager<'_, _, 256> =
            SessionManager::new(FakeBroker::new(), &config().with_max_payload(16));
        block_on(session.ensure_connected(LinkState::Up, Instant::from_secs(0))).unwrap();
        let readings = [Reading::new(Metric::TEMPERATURE, Some(20.0))];

        let report = block_on(publisher.run_cycle(
            &readings,
            Some(1_700_000_000),
            &mut session,
            Instant::from_secs(5),
        ));
        assert!(matches!(
            report[0].outcome,
            PublishOutcome::Failed(SessionError::PayloadTooLarge { limit: 16, .. })
        ));
        assert_eq!(report[1].outcome, PublishOutcome::Sent);
        assert!(session.is_connected());
    }

    #[test]
    fn skip_cycle_lists_every_topic_without_payloads() {
        let publisher = Publisher::from_config(&config());
        let report = publisher.skip_cycle(&[Metric::TEMPERATURE, Metric::HUMIDITY]);
        assert_eq!(
            outcomes(&report),
            [
                ("in/t/esp32/temperature", PublishOutcome::SkippedNotConnected),
                ("in/t/esp32/humidity", PublishOutcome::SkippedNotConnected),
                ("in/t/devicestatus", PublishOutcome::SkippedNotConnected),
            ]
        );
        assert!(report.iter().all(|a| a.payload.is_none()));
    }
}
