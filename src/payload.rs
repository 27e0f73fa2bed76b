//! JSON payloads published by the device.
//!
//! ```text
//! {"temperature":21.50,"time":1700000000}   metric with a time reference
//! {"temperature":21.50}                     metric without one
//! {"esp32":1}                               liveness on the device-status topic
//! ```

use core::fmt::Write;
use heapless::String;

use crate::error::SessionError;

/// Capacity of a formatted payload.
pub const MAX_PAYLOAD_LEN: usize = 128;

pub type Payload = String<MAX_PAYLOAD_LEN>;

/// Formats one reading with two decimals, adding `time` only when an epoch is known.
pub fn metric_payload(name: &str, value: f32, epoch: Option<u64>) -> Result<Payload, SessionError> {
    let mut out = Payload::new();
    let result = match epoch {
        Some(epoch) => write!(out, "{{\"{}\":{:.2},\"time\":{}}}", name, value, epoch),
        None => write!(out, "{{\"{}\":{:.2}}}", name, value),
    };
    result.map_err(|_| overflow(name.len()))?;
    Ok(out)
}

/// Liveness indicator keyed by device class.
pub fn status_payload(device_class: &str) -> Result<Payload, SessionError> {
    let mut out = Payload::new();
    write!(out, "{{\"{}\":1}}", device_class).map_err(|_| overflow(device_class.len()))?;
    Ok(out)
}

fn overflow(key_len: usize) -> SessionError {
    SessionError::PayloadTooLarge {
        size: key_len + 8,
        limit: MAX_PAYLOAD_LEN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_with_time() {
        let p = metric_payload("temperature", 21.5, Some(1_700_000_000)).unwrap();
        assert_eq!(p.as_str(), r#"{"temperature":21.50,"time":1700000000}"#);
    }

    #[test]
    fn metric_without_time_omits_the_field() {
        let p = metric_payload("humidity", 40.256, None).unwrap();
        assert_eq!(p.as_str(), r#"{"humidity":40.26}"#);
    }

    #[test]
    fn negative_values_keep_two_decimals() {
        let p = metric_payload("temperature", -3.0, None).unwrap();
        assert_eq!(p.as_str(), r#"{"temperature":-3.00}"#);
    }

    #[test]
    fn status_is_keyed_by_device_class() {
        assert_eq!(status_payload("esp32").unwrap().as_str(), r#"{"esp32":1}"#);
    }

    #[test]
    fn oversized_key_is_reported() {
        let name = [b'm'; 200];
        let name = core::str::from_utf8(&name).unwrap();
        assert!(matches!(
            metric_payload(name, 1.0, None),
            Err(SessionError::PayloadTooLarge { .. })
        ));
    }
}
