//! # MQTT Transport Abstraction
//!
//! This module defines the `MqttTransport` trait, which abstracts the stream the
//! client talks to the broker over, allowing the session logic to be hardware and
//! network-stack agnostic.
//!
//! Unlike a plain byte pipe, a transport can be (re)opened: the session manager
//! closes it whenever a session drops and opens it again on the next connect cycle.
//!
//! With the Rust 2024 Edition, this trait uses native `async fn`, removing the
//! need for the `#[async_trait]` macro.

use crate::config::BrokerAddress;
use embassy_net::tcp::{ConnectError, Error as TcpError, TcpSocket};
use embassy_net::{IpAddress, IpEndpoint};
use embassy_time::{Duration, Timer, with_timeout};
use embedded_io_async::Write;

/// A trait representing a reconnectable transport for MQTT packets.
#[allow(async_fn_in_trait)]
pub trait MqttTransport {
    /// The error type returned by the transport.
    type Error: TransportError;

    /// Opens a fresh stream to the broker, discarding any previous one.
    async fn open(&mut self, broker: &BrokerAddress) -> Result<(), Self::Error>;

    /// Sends a buffer of data over the transport.
    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Receives data from the transport into a buffer.
    ///
    /// Returns the number of bytes read. Implementations must not wait forever.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Drops the stream without any further I/O.
    fn close(&mut self);
}

/// A marker trait for transport-related errors.
pub trait TransportError: core::fmt::Debug {}

/// Errors of the `embassy-net` TCP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpTransportError {
    /// The TCP handshake failed.
    Connect(ConnectError),
    /// Reading or writing the socket failed.
    Io(TcpError),
    /// The peer did not answer within the transport timeout.
    Timeout,
    /// The peer closed the connection.
    Closed,
}

impl TransportError for TcpTransportError {}

/// TCP transport implementation using `embassy-net`.
pub struct TcpTransport<'a> {
    socket: TcpSocket<'a>,
    timeout: Duration,
}

impl<'a> TcpTransport<'a> {
    /// Creates a new `TcpTransport` with the given socket and timeout.
    ///
    /// The timeout bounds connecting and every single read.
    pub fn new(socket: TcpSocket<'a>, timeout: Duration) -> Self {
        Self { socket, timeout }
    }

    /// A helper function to perform a read with a timeout.
    async fn read_with_timeout(&mut self, buf: &mut [u8]) -> Result<usize, TcpTransportError> {
        // Use `select` to race the read operation against a timer.
        let read_fut = self.socket.read(buf);
        let timer = Timer::after(self.timeout);

        match futures::future::select(core::pin::pin!(read_fut), core::pin::pin!(timer)).await {
            futures::future::Either::Left((Ok(0), _)) => {
                // If the peer closes the connection, read returns 0.
                debug!("TCP connection closed by peer");
                Err(TcpTransportError::Closed)
            }
            futures::future::Either::Left((Ok(n), _)) => {
                trace!("TCP read: {} bytes", n);
                Ok(n)
            }
            futures::future::Either::Left((Err(e), _)) => {
                debug!("TCP read error: {:?}", e);
                Err(TcpTransportError::Io(e))
            }
            futures::future::Either::Right(((), _)) => {
                trace!("TCP read timeout");
                Err(TcpTransportError::Timeout)
            }
        }
    }
}

impl<'a> MqttTransport for TcpTransport<'a> {
    type Error = TcpTransportError;

    async fn open(&mut self, broker: &BrokerAddress) -> Result<(), Self::Error> {
        // abort() moves the socket straight to Closed so it can connect again.
        self.socket.abort();
        self.socket.set_timeout(Some(self.timeout));

        let [a, b, c, d] = broker.ip;
        let endpoint = IpEndpoint::new(IpAddress::v4(a, b, c, d), broker.port);
        match with_timeout(self.timeout, self.socket.connect(endpoint)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!("TCP connect to {} failed: {:?}", broker, e);
                Err(TcpTransportError::Connect(e))
            }
            Err(_) => Err(TcpTransportError::Timeout),
        }
    }

    async fn send(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        trace!("TCP TX ({} bytes): {:02X?}", buf.len(), buf);

        self.socket.write_all(buf).await.map_err(|e| {
            debug!("TCP write error: {:?}", e);
            TcpTransportError::Io(e)
        })?;

        // Flush to ensure data is actually sent to the network
        self.socket.flush().await.map_err(TcpTransportError::Io)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.read_with_timeout(buf).await
    }

    fn close(&mut self) {
        self.socket.abort();
    }
}
