//! # SNTP Time Source
//!
//! A tiny SNTPv3 client: one 48-byte request, one reply, seconds only. The
//! fractional part of the timestamp is ignored since telemetry is stamped with
//! whole epoch seconds.
//!
//! Each request carries a fresh nonce in its transmit timestamp. A server copies
//! it into the originate timestamp of its reply, so a late answer to an earlier
//! request is told apart from the answer to the current one.

use embassy_net::udp::UdpSocket;
use embassy_net::{IpAddress, IpEndpoint};
use embassy_time::Instant;

use crate::error::TimeSyncError;
use crate::time_sync::TimeSource;

/// Well-known SNTP port.
pub const SNTP_PORT: u16 = 123;

/// Local port the client binds to.
pub const LOCAL_PORT: u16 = 12_300;

/// Size of an SNTP packet without extensions.
pub const PACKET_LEN: usize = 48;

/// Seconds between the NTP era (1900) and the Unix epoch (1970).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Length of an NTP era: the 32-bit seconds field wraps in 2036.
pub const NTP_ERA_SECS: u64 = 1 << 32;

const LI_VN_MODE_CLIENT: u8 = 0b00_011_011;
const MODE_SERVER: u8 = 4;
const ORIGINATE: usize = 24;
const TRANSMIT_SECS: usize = 40;

/// Builds a client request (version 3, mode 3) carrying `nonce` as its
/// transmit timestamp.
pub fn encode_request(buf: &mut [u8; PACKET_LEN], nonce: u64) {
    buf.fill(0);
    buf[0] = LI_VN_MODE_CLIENT;
    buf[TRANSMIT_SECS..].copy_from_slice(&nonce.to_be_bytes());
}

/// Whether `buf` answers the request sent with `nonce`.
pub fn answers(buf: &[u8], nonce: u64) -> bool {
    buf.get(ORIGINATE..ORIGINATE + 8)
        .is_some_and(|originate| originate == nonce.to_be_bytes())
}

/// Extracts Unix seconds from a server reply.
pub fn decode_response(buf: &[u8]) -> Result<u64, TimeSyncError> {
    if buf.len() < PACKET_LEN {
        return Err(TimeSyncError::InvalidResponse);
    }
    let mode = buf[0] & 0x07;
    let stratum = buf[1];
    if mode != MODE_SERVER || stratum == 0 {
        // Stratum 0 is a kiss-o'-death packet.
        return Err(TimeSyncError::InvalidResponse);
    }

    let secs = u32::from_be_bytes([
        buf[TRANSMIT_SECS],
        buf[TRANSMIT_SECS + 1],
        buf[TRANSMIT_SECS + 2],
        buf[TRANSMIT_SECS + 3],
    ]) as u64;
    if secs == 0 {
        // Server has not synchronized yet.
        return Err(TimeSyncError::InvalidResponse);
    }
    // Timestamps below the 1970 offset belong to era 1 (from February 2036).
    Ok(match secs.checked_sub(NTP_UNIX_OFFSET) {
        Some(unix) => unix,
        None => secs + NTP_ERA_SECS - NTP_UNIX_OFFSET,
    })
}

/// [`TimeSource`] backed by an `embassy-net` UDP socket.
///
/// The socket is bound lazily on the first query. Bounding the query in time is
/// left to the [`TimeSyncClient`](crate::time_sync::TimeSyncClient).
pub struct SntpClient<'a> {
    socket: UdpSocket<'a>,
    server: IpEndpoint,
    next_nonce: u64,
}

impl<'a> SntpClient<'a> {
    pub fn new(socket: UdpSocket<'a>, server: [u8; 4]) -> Self {
        let [a, b, c, d] = server;
        Self {
            socket,
            server: IpEndpoint::new(IpAddress::v4(a, b, c, d), SNTP_PORT),
            next_nonce: Instant::now().as_ticks().max(1),
        }
    }

    fn take_nonce(&mut self) -> u64 {
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1).max(1);
        nonce
    }
}

impl TimeSource for SntpClient<'_> {
    async fn fetch_epoch(&mut self) -> Result<u64, TimeSyncError> {
        if !self.socket.is_open() {
            self.socket.bind(LOCAL_PORT).map_err(|e| {
                warn!("sntp: bind failed: {:?}", e);
                TimeSyncError::Unreachable
            })?;
        }

        let nonce = self.take_nonce();
        let mut buf = [0u8; PACKET_LEN];
        encode_request(&mut buf, nonce);
        self.socket
            .send_to(&buf, self.server)
            .await
            .map_err(|e| {
                debug!("sntp: send failed: {:?}", e);
                TimeSyncError::Unreachable
            })?;

        loop {
            let (n, meta) = self.socket.recv_from(&mut buf).await.map_err(|e| {
                debug!("sntp: receive failed: {:?}", e);
                TimeSyncError::Unreachable
            })?;
            if meta.endpoint != self.server {
                trace!("sntp: ignoring datagram from {:?}", meta.endpoint);
                continue;
            }
            if !answers(&buf[..n], nonce) {
                debug!("sntp: ignoring stale reply");
                continue;
            }
            return decode_response(&buf[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(mode: u8, stratum: u8, ntp_secs: u32) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0] = 0b00_011_000 | mode;
        buf[1] = stratum;
        buf[TRANSMIT_SECS..TRANSMIT_SECS + 4].copy_from_slice(&ntp_secs.to_be_bytes());
        buf
    }

    #[test]
    fn request_is_version_3_client_mode() {
        let mut buf = [0xFFu8; PACKET_LEN];
        encode_request(&mut buf, 0x0102_0304_0506_0708);
        assert_eq!(buf[0], 0x1B);
        assert!(buf[1..TRANSMIT_SECS].iter().all(|b| *b == 0));
        assert_eq!(buf[TRANSMIT_SECS..], [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn only_the_reply_echoing_the_current_nonce_is_accepted() {
        let ntp = (1_700_000_000u64 + NTP_UNIX_OFFSET) as u32;
        let mut current = reply(4, 2, ntp);
        current[ORIGINATE..ORIGINATE + 8].copy_from_slice(&42u64.to_be_bytes());
        let mut stale = reply(4, 2, ntp - 60);
        stale[ORIGINATE..ORIGINATE + 8].copy_from_slice(&41u64.to_be_bytes());

        assert!(answers(&current, 42));
        assert!(!answers(&stale, 42));
        assert!(!answers(&current[..20], 42));
    }

    #[test]
    fn transmit_timestamp_is_converted_to_unix_seconds() {
        let ntp = (1_700_000_000u64 + NTP_UNIX_OFFSET) as u32;
        assert_eq!(decode_response(&reply(4, 2, ntp)), Ok(1_700_000_000));
    }

    #[test]
    fn kiss_of_death_and_wrong_mode_are_rejected() {
        let ntp = (1_700_000_000u64 + NTP_UNIX_OFFSET) as u32;
        assert_eq!(
            decode_response(&reply(4, 0, ntp)),
            Err(TimeSyncError::InvalidResponse)
        );
        assert_eq!(
            decode_response(&reply(3, 2, ntp)),
            Err(TimeSyncError::InvalidResponse)
        );
    }

    #[test]
    fn short_or_unsynchronized_replies_are_rejected() {
        assert_eq!(
            decode_response(&[0x1C; 20]),
            Err(TimeSyncError::InvalidResponse)
        );
        assert_eq!(
            decode_response(&reply(4, 1, 0)),
            Err(TimeSyncError::InvalidResponse)
        );
    }

    #[test]
    fn timestamps_after_the_2036_wrap_are_in_the_next_era() {
        assert_eq!(
            decode_response(&reply(4, 1, 1_000)),
            Ok(1_000 + NTP_ERA_SECS - NTP_UNIX_OFFSET)
        );
        // One second past 2036-02-07T06:28:16Z, where era 1 begins.
        assert_eq!(decode_response(&reply(4, 1, 1)), Ok(2_085_978_497));
        // Last second of era 0 still decodes as before.
        assert_eq!(decode_response(&reply(4, 1, u32::MAX)), Ok(2_085_978_495));
    }
}
