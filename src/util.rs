//! # MQTT Serialization Utilities
//!
//! This module provides helper functions for reading and writing MQTT-specific data types
//! from and to byte buffers, such as variable-byte integers and length-prefixed strings.

use crate::error::{PacketError, ProtocolError};

/// Largest value a 4-byte variable-byte integer can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Reads a variable-byte integer from the buffer, advancing the cursor.
///
/// This is a common encoding scheme in MQTT for packet lengths.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, PacketError> {
    match try_read_variable_byte_integer(&buf[(*cursor).min(buf.len())..])? {
        Some((value, used)) => {
            *cursor += used;
            Ok(value)
        }
        None => Err(ProtocolError::MalformedPacket.into()),
    }
}

/// Like [`read_variable_byte_integer`], but reports `None` when the buffer ends
/// before the integer does. Used for framing a partially received stream.
fn try_read_variable_byte_integer(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    let mut multiplier = 1;
    let mut value = 0;
    for (i, encoded_byte) in buf.iter().enumerate() {
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            return Ok(Some((value, i + 1)));
        }
        if i == 3 {
            return Err(ProtocolError::MalformedPacket.into());
        }
        multiplier *= 128;
    }
    Ok(None)
}

/// Parses the fixed header at the start of `buf`.
///
/// Returns the header length and the remaining length, or `None` if more bytes
/// are needed to tell.
pub fn read_fixed_header(buf: &[u8]) -> Result<Option<(usize, usize)>, PacketError> {
    if buf.is_empty() {
        return Ok(None);
    }
    Ok(try_read_variable_byte_integer(&buf[1..])?.map(|(remaining, used)| (1 + used, remaining)))
}

/// Number of bytes needed to encode `val` as a variable-byte integer.
pub fn variable_byte_integer_len(val: usize) -> usize {
    match val {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Writes a variable-byte integer to the buffer, advancing the cursor.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    mut val: usize,
) -> Result<(), PacketError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PayloadTooLarge.into());
    }
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(*cursor).ok_or(PacketError::BufferTooSmall)? = encoded_byte;
        *cursor += 1;
        if val == 0 {
            break;
        }
    }
    Ok(())
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, PacketError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a big-endian `u16`, advancing the cursor.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), PacketError> {
    buf.get_mut(*cursor..*cursor + 2)
        .ok_or(PacketError::BufferTooSmall)?
        .copy_from_slice(&val.to_be_bytes());
    *cursor += 2;
    Ok(())
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, PacketError> {
    let len = read_u16(cursor, buf)? as usize;
    let s = core::str::from_utf8(
        buf.get(*cursor..*cursor + len)
            .ok_or(ProtocolError::MalformedPacket)?,
    )
    .map_err(|_| ProtocolError::InvalidUtf8String)?;
    *cursor += len;
    Ok(s)
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length), advancing the cursor.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), PacketError> {
    write_binary(cursor, buf, s.as_bytes())
}

/// Writes binary data (prefixed with a 2-byte length), advancing the cursor.
pub fn write_binary(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> Result<(), PacketError> {
    if data.len() > u16::MAX as usize {
        return Err(ProtocolError::PayloadTooLarge.into());
    }
    write_u16(cursor, buf, data.len() as u16)?;
    write_bytes(cursor, buf, data)
}

/// Writes raw bytes without a length prefix, advancing the cursor.
pub fn write_bytes(cursor: &mut usize, buf: &mut [u8], data: &[u8]) -> Result<(), PacketError> {
    buf.get_mut(*cursor..*cursor + data.len())
        .ok_or(PacketError::BufferTooSmall)?
        .copy_from_slice(data);
    *cursor += data.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_byte_integer_boundaries() {
        for (value, len) in [(0, 1), (127, 1), (128, 2), (16_383, 2), (16_384, 3), (2_097_152, 4)] {
            let mut buf = [0u8; 4];
            let mut cursor = 0;
            write_variable_byte_integer(&mut cursor, &mut buf, value).unwrap();
            assert_eq!(cursor, len);
            assert_eq!(variable_byte_integer_len(value), len);

            let mut read_cursor = 0;
            assert_eq!(read_variable_byte_integer(&mut read_cursor, &buf).unwrap(), value);
            assert_eq!(read_cursor, len);
        }
    }

    #[test]
    fn five_byte_length_is_malformed() {
        let buf = [0x30, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert_eq!(
            read_fixed_header(&buf),
            Err(PacketError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn fixed_header_waits_for_more_bytes() {
        assert_eq!(read_fixed_header(&[]), Ok(None));
        assert_eq!(read_fixed_header(&[0x30]), Ok(None));
        assert_eq!(read_fixed_header(&[0x30, 0x80]), Ok(None));
        assert_eq!(read_fixed_header(&[0x30, 0x80, 0x01]), Ok(Some((3, 128))));
        assert_eq!(read_fixed_header(&[0xD0, 0x00]), Ok(Some((2, 0))));
    }

    #[test]
    fn string_overrun_is_malformed() {
        let buf = [0x00, 0x05, b'a', b'b'];
        let mut cursor = 0;
        assert_eq!(
            read_utf8_string(&mut cursor, &buf),
            Err(PacketError::Protocol(ProtocolError::MalformedPacket))
        );
    }

    #[test]
    fn write_reports_small_buffer() {
        let mut buf = [0u8; 4];
        let mut cursor = 0;
        assert_eq!(
            write_utf8_string(&mut cursor, &mut buf, "topic"),
            Err(PacketError::BufferTooSmall)
        );
    }
}
