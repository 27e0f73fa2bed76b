//! # MQTT Packet Structures and Serialization
//!
//! This module defines the MQTT 3.1.1 packets a telemetry client exchanges with a
//! broker and the traits for encoding and decoding them. The client only ever
//! sends CONNECT, PUBLISH, PINGREQ and DISCONNECT, and only ever expects
//! CONNACK, PUBACK and PINGRESP in return.

use crate::config::{Credentials, LastWill};
use crate::error::{PacketError, ProtocolError};
use crate::util::{self, write_binary, write_bytes, write_u16, write_utf8_string};

/// Protocol name sent in CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Writes the complete packet and returns the number of bytes used.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError>;
}

/// A trait for packets that can be decoded from a complete frame.
pub trait DecodePacket: Sized {
    fn decode(frame: &[u8]) -> Result<Self, PacketError>;
}

/// Writes the fixed header for a packet with `remaining_len` bytes after it,
/// after checking the whole packet fits into `buf`.
fn write_fixed_header(
    cursor: &mut usize,
    buf: &mut [u8],
    first_byte: u8,
    remaining_len: usize,
) -> Result<(), PacketError> {
    let total = 1 + util::variable_byte_integer_len(remaining_len) + remaining_len;
    if total > buf.len() {
        return Err(PacketError::BufferTooSmall);
    }
    buf[*cursor] = first_byte;
    *cursor += 1;
    util::write_variable_byte_integer(cursor, buf, remaining_len)
}

/// Splits a complete frame into its type nibble, flags nibble and body.
fn split_frame(frame: &[u8]) -> Result<(u8, u8, &[u8]), PacketError> {
    let (header_len, remaining) =
        util::read_fixed_header(frame)?.ok_or(ProtocolError::MalformedPacket)?;
    if frame.len() != header_len + remaining {
        return Err(ProtocolError::MalformedPacket.into());
    }
    Ok((frame[0] >> 4, frame[0] & 0x0F, &frame[header_len..]))
}

fn validate_topic(topic: &str) -> Result<(), PacketError> {
    if topic.is_empty() || topic.contains(['+', '#', '\0']) {
        return Err(ProtocolError::InvalidTopic.into());
    }
    Ok(())
}

// --- CONNECT Packet ---
#[derive(Debug, Clone, Copy)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub credentials: Option<Credentials<'a>>,
    pub will: Option<LastWill<'a>>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            credentials: None,
            will: None,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0x02;
        }
        if let Some(will) = &self.will {
            flags |= 0x04 | ((will.qos as u8) << 3);
            if will.retain {
                flags |= 0x20;
            }
        }
        if let Some(credentials) = &self.credentials {
            flags |= 0x80;
            if credentials.password.is_some() {
                flags |= 0x40;
            }
        }
        flags
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut remaining_len = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2 + 2 + self.client_id.len();
        if let Some(will) = &self.will {
            validate_topic(will.topic)?;
            remaining_len += 2 + will.topic.len() + 2 + will.payload.len();
        }
        if let Some(credentials) = &self.credentials {
            remaining_len += 2 + credentials.username.len();
            if let Some(password) = credentials.password {
                remaining_len += 2 + password.len();
            }
        }

        let mut cursor = 0;
        write_fixed_header(&mut cursor, buf, 0x10, remaining_len)?;
        write_utf8_string(&mut cursor, buf, PROTOCOL_NAME)?;
        write_bytes(&mut cursor, buf, &[PROTOCOL_LEVEL, self.flags()])?;
        write_u16(&mut cursor, buf, self.keep_alive)?;
        write_utf8_string(&mut cursor, buf, self.client_id)?;
        if let Some(will) = &self.will {
            write_utf8_string(&mut cursor, buf, will.topic)?;
            write_binary(&mut cursor, buf, will.payload)?;
        }
        if let Some(credentials) = &self.credentials {
            write_utf8_string(&mut cursor, buf, credentials.username)?;
            if let Some(password) = credentials.password {
                write_binary(&mut cursor, buf, password)?;
            }
        }
        Ok(cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    pub session_present: bool,
    pub reason_code: u8,
}

impl DecodePacket for ConnAck {
    fn decode(frame: &[u8]) -> Result<Self, PacketError> {
        let (packet_type, flags, body) = split_frame(frame)?;
        if packet_type != 2 {
            return Err(ProtocolError::InvalidPacketType(packet_type).into());
        }
        if flags != 0 || body.len() != 2 || body[0] & 0xFE != 0 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        Ok(Self {
            session_present: body[0] & 0x01 != 0,
            reason_code: body[1],
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug, Clone, Copy)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub retain: bool,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        validate_topic(self.topic)?;
        let packet_id = match (self.qos, self.packet_id) {
            (QoS::AtMostOnce, _) => None,
            (QoS::AtLeastOnce, Some(id)) if id != 0 => Some(id),
            (QoS::AtLeastOnce, _) => return Err(ProtocolError::MalformedPacket.into()),
        };

        let mut remaining_len = 2 + self.topic.len() + self.payload.len();
        if packet_id.is_some() {
            remaining_len += 2;
        }

        // Fixed header: PUBLISH packet type (3) with QoS and retain flags
        let mut first_byte = 0x30 | ((self.qos as u8) << 1);
        if self.retain {
            first_byte |= 0x01;
        }

        let mut cursor = 0;
        write_fixed_header(&mut cursor, buf, first_byte, remaining_len)?;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        if let Some(id) = packet_id {
            write_u16(&mut cursor, buf, id)?;
        }
        write_bytes(&mut cursor, buf, self.payload)?;
        Ok(cursor)
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PubAck {
    pub packet_id: u16,
}

impl DecodePacket for PubAck {
    fn decode(frame: &[u8]) -> Result<Self, PacketError> {
        let (packet_type, flags, body) = split_frame(frame)?;
        if packet_type != 4 {
            return Err(ProtocolError::InvalidPacketType(packet_type).into());
        }
        if flags != 0 || body.len() != 2 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        let mut cursor = 0;
        Ok(Self {
            packet_id: util::read_u16(&mut cursor, body)?,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = 0;
        write_fixed_header(&mut cursor, buf, 0xC0, 0)?;
        Ok(cursor)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, PacketError> {
        let mut cursor = 0;
        write_fixed_header(&mut cursor, buf, 0xE0, 0)?;
        Ok(cursor)
    }
}

/// Packets a broker may send to a publish-only client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Inbound {
    ConnAck(ConnAck),
    PubAck(PubAck),
    PingResp,
}

impl DecodePacket for Inbound {
    fn decode(frame: &[u8]) -> Result<Self, PacketError> {
        let packet_type = *frame.first().ok_or(ProtocolError::MalformedPacket)? >> 4;
        match packet_type {
            2 => Ok(Inbound::ConnAck(ConnAck::decode(frame)?)),
            4 => Ok(Inbound::PubAck(PubAck::decode(frame)?)),
            13 => {
                let (_, flags, body) = split_frame(frame)?;
                if flags != 0 || !body.is_empty() {
                    return Err(ProtocolError::MalformedPacket.into());
                }
                Ok(Inbound::PingResp)
            }
            other => Err(ProtocolError::InvalidPacketType(other).into()),
        }
    }
}
