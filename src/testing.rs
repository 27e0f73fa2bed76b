//! Test doubles for the broker, the radio, the time server and the sensor.

use std::collections::VecDeque;
use std::vec::Vec;

use crate::config::{BrokerAddress, NetworkCredentials};
use crate::error::TimeSyncError;
use crate::link::{Radio, RadioFailure};
use crate::sensor::{Metric, Sensor};
use crate::time_sync::TimeSource;
use crate::transport::{MqttTransport, TransportError};
use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeError {
    Refused,
    Reset,
    Timeout,
}

impl TransportError for FakeError {}

/// A scripted broker that answers CONNECT, PINGREQ and QoS 1 PUBLISH.
pub struct FakeBroker {
    /// When false, opening and sending fail.
    pub online: bool,
    /// CONNACK return code.
    pub connack_code: u8,
    /// Raw reply to CONNECT instead of a well-formed CONNACK.
    pub connect_reply: Option<Vec<u8>>,
    /// When false, CONNECT is swallowed and the handshake times out.
    pub answer_connect: bool,
    pub answer_pings: bool,
    /// Accepts the handshake but tears the connection down on any PUBLISH.
    pub reset_on_publish: bool,
    /// Maximum bytes handed out per `recv`.
    pub chunk: usize,
    pub is_open: bool,
    pub opens: u32,
    pub pubacks_sent: u32,
    /// Every frame the client sent, in order.
    pub frames: Vec<Vec<u8>>,
    inbound: VecDeque<u8>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self {
            online: true,
            connack_code: 0,
            connect_reply: None,
            answer_connect: true,
            answer_pings: true,
            reset_on_publish: false,
            chunk: usize::MAX,
            is_open: false,
            opens: 0,
            pubacks_sent: 0,
            frames: Vec::new(),
            inbound: VecDeque::new(),
        }
    }

    /// Queues raw bytes for the client to read.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Topics of all PUBLISH frames sent so far.
    pub fn published_topics(&self) -> Vec<&str> {
        self.frames
            .iter()
            .filter(|f| packet_type(f) == 3)
            .map(|f| publish_topic(f))
            .collect()
    }

    pub fn count(&self, kind: u8) -> usize {
        self.frames.iter().filter(|f| packet_type(f) == kind).count()
    }
}

impl MqttTransport for FakeBroker {
    type Error = FakeError;

    async fn open(&mut self, _broker: &BrokerAddress) -> Result<(), FakeError> {
        if !self.online {
            return Err(FakeError::Refused);
        }
        self.opens += 1;
        self.is_open = true;
        self.inbound.clear();
        Ok(())
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), FakeError> {
        if !self.online || !self.is_open {
            return Err(FakeError::Reset);
        }
        self.frames.push(buf.to_vec());
        if self.reset_on_publish && packet_type(buf) == 3 {
            self.close();
            return Err(FakeError::Reset);
        }
        match packet_type(buf) {
            1 if self.answer_connect => match self.connect_reply.clone() {
                Some(reply) => self.inject(&reply),
                None => self.inject(&[0x20, 0x02, 0x00, self.connack_code]),
            },
            3 if (buf[0] >> 1) & 0x03 == 1 => {
                let (id_hi, id_lo) = publish_packet_id(buf);
                self.pubacks_sent += 1;
                self.inject(&[0x40, 0x02, id_hi, id_lo]);
            }
            12 if self.answer_pings => self.inject(&[0xD0, 0x00]),
            _ => {}
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, FakeError> {
        if self.inbound.is_empty() {
            return Err(FakeError::Timeout);
        }
        let n = buf.len().min(self.inbound.len()).min(self.chunk);
        for slot in buf.iter_mut().take(n) {
            *slot = self.inbound.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.is_open = false;
        self.inbound.clear();
    }
}

pub fn packet_type(frame: &[u8]) -> u8 {
    frame[0] >> 4
}

fn publish_body(frame: &[u8]) -> (&str, usize) {
    let mut cursor = 1;
    util::read_variable_byte_integer(&mut cursor, frame).unwrap();
    let topic = util::read_utf8_string(&mut cursor, frame).unwrap();
    (topic, cursor)
}

pub fn publish_topic(frame: &[u8]) -> &str {
    publish_body(frame).0
}

pub fn publish_payload(frame: &[u8]) -> &[u8] {
    let (_, mut cursor) = publish_body(frame);
    if (frame[0] >> 1) & 0x03 != 0 {
        cursor += 2;
    }
    &frame[cursor..]
}

fn publish_packet_id(frame: &[u8]) -> (u8, u8) {
    let (_, cursor) = publish_body(frame);
    (frame[cursor], frame[cursor + 1])
}

/// A radio whose access point can vanish and come back.
pub struct FakeRadio {
    /// The access point is in range.
    pub available: bool,
    /// The access point refuses the password.
    pub reject_auth: bool,
    /// Association attempts never finish on their own.
    pub hang: bool,
    pub associated: bool,
    pub attempts: u32,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self {
            available: true,
            reject_auth: false,
            hang: false,
            associated: false,
            attempts: 0,
        }
    }

    /// Access point disappears; the association is lost.
    pub fn drop_signal(&mut self) {
        self.available = false;
        self.associated = false;
    }

    /// Access point comes back and the radio rejoins on its own.
    pub fn restore_signal(&mut self) {
        self.available = true;
        self.associated = true;
    }
}

impl Radio for FakeRadio {
    async fn associate(&mut self, _credentials: &NetworkCredentials<'_>) -> Result<(), RadioFailure> {
        self.attempts += 1;
        if self.hang {
            return core::future::pending().await;
        }
        if self.reject_auth {
            return Err(RadioFailure::AuthFailed);
        }
        if !self.available {
            return Err(RadioFailure::NoSsidAvailable);
        }
        self.associated = true;
        Ok(())
    }

    fn is_associated(&self) -> bool {
        self.associated
    }

    async fn disassociate(&mut self) {
        self.associated = false;
    }
}

/// A time server returning scripted answers.
pub struct FakeTimeSource {
    pub answers: VecDeque<Result<u64, TimeSyncError>>,
    pub queries: u32,
}

impl FakeTimeSource {
    pub fn new() -> Self {
        Self {
            answers: VecDeque::new(),
            queries: 0,
        }
    }

    pub fn always(epoch: u64) -> Self {
        let mut source = Self::new();
        source.answers.extend(core::iter::repeat_n(Ok(epoch), 64));
        source
    }
}

impl TimeSource for FakeTimeSource {
    async fn fetch_epoch(&mut self) -> Result<u64, TimeSyncError> {
        self.queries += 1;
        self.answers
            .pop_front()
            .unwrap_or(Err(TimeSyncError::Unreachable))
    }
}

/// A sensor returning fixed values; `None` or NaN simulate a failed read.
pub struct ScriptedSensor {
    pub metrics: Vec<Metric>,
    pub values: Vec<Option<f32>>,
    pub reads: u32,
}

impl ScriptedSensor {
    pub fn new(metrics: &[(Metric, Option<f32>)]) -> Self {
        Self {
            metrics: metrics.iter().map(|(m, _)| *m).collect(),
            values: metrics.iter().map(|(_, v)| *v).collect(),
            reads: 0,
        }
    }
}

impl Sensor for ScriptedSensor {
    fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    fn read(&mut self, metric: Metric) -> Option<f32> {
        self.reads += 1;
        let index = self.metrics.iter().position(|m| *m == metric)?;
        self.values[index]
    }
}
