//! # MQTT Client
//!
//! A minimal publish-only MQTT 3.1.1 client over any [`MqttTransport`]. It owns the
//! transport and two fixed-size buffers and performs exactly one request/response
//! exchange per call. It keeps no connection state of its own; the
//! [`SessionManager`](crate::session::SessionManager) decides when to call what.

use crate::config::BrokerAddress;
use crate::error::{ConnectReasonCode, MqttError, ProtocolError};
use crate::packet::{
    ConnAck, Connect, DecodePacket, Disconnect, EncodePacket, Inbound, PingReq, Publish, QoS,
};
use crate::transport::MqttTransport;
use crate::util;

/// An MQTT client with `BUF_SIZE` bytes for each direction.
pub struct MqttClient<T, const BUF_SIZE: usize> {
    transport: T,
    tx_buf: [u8; BUF_SIZE],
    rx_buf: [u8; BUF_SIZE],
    rx_len: usize,
    next_packet_id: u16,
}

impl<T, const BUF_SIZE: usize> MqttClient<T, BUF_SIZE>
where
    T: MqttTransport,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            tx_buf: [0; BUF_SIZE],
            rx_buf: [0; BUF_SIZE],
            rx_len: 0,
            next_packet_id: 1,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Opens the transport, sends CONNECT and waits for CONNACK.
    ///
    /// A refused CONNACK is returned as [`MqttError::ConnectionRefused`].
    pub async fn connect(
        &mut self,
        broker: &BrokerAddress,
        connect: &Connect<'_>,
    ) -> Result<ConnAck, MqttError<T::Error>> {
        self.abort();
        self.transport
            .open(broker)
            .await
            .map_err(MqttError::Transport)?;
        self.send_packet(connect).await?;

        match self.read_packet().await? {
            Inbound::ConnAck(ack) if ack.reason_code == 0 => Ok(ack),
            Inbound::ConnAck(ack) => Err(MqttError::ConnectionRefused(ConnectReasonCode::from(
                ack.reason_code,
            ))),
            _ => Err(MqttError::Protocol(ProtocolError::InvalidResponse)),
        }
    }

    /// Publishes a message. With QoS 1 this waits for the matching PUBACK.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), MqttError<T::Error>> {
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.take_packet_id()),
        };
        let publish = Publish {
            topic,
            qos,
            retain,
            payload,
            packet_id,
        };
        self.send_packet(&publish).await?;

        if let Some(id) = packet_id {
            loop {
                match self.read_packet().await? {
                    Inbound::PubAck(ack) if ack.packet_id == id => break,
                    Inbound::ConnAck(_) => {
                        return Err(MqttError::Protocol(ProtocolError::InvalidResponse));
                    }
                    // Stale acknowledgements and ping responses are harmless here.
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Sends PINGREQ and waits for PINGRESP.
    pub async fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        self.send_packet(&PingReq).await?;
        loop {
            match self.read_packet().await? {
                Inbound::PingResp => return Ok(()),
                Inbound::ConnAck(_) => {
                    return Err(MqttError::Protocol(ProtocolError::InvalidResponse));
                }
                Inbound::PubAck(_) => {}
            }
        }
    }

    /// Sends DISCONNECT, which tells the broker to discard the will, then closes
    /// the transport. Send failures are ignored because the stream is going away.
    pub async fn disconnect(&mut self) {
        if let Err(e) = self.send_packet(&Disconnect).await {
            debug!("DISCONNECT not delivered: {:?}", e);
        }
        self.abort();
    }

    /// Closes the transport and forgets any partially received data.
    pub fn abort(&mut self) {
        self.transport.close();
        self.rx_len = 0;
    }

    fn take_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.checked_add(1).unwrap_or(1);
        id
    }

    async fn send_packet<P: EncodePacket>(&mut self, packet: &P) -> Result<(), MqttError<T::Error>> {
        let len = packet.encode(&mut self.tx_buf)?;
        self.transport
            .send(&self.tx_buf[..len])
            .await
            .map_err(MqttError::Transport)
    }

    /// Reads exactly one packet, buffering partial frames and any bytes that
    /// arrive after it.
    async fn read_packet(&mut self) -> Result<Inbound, MqttError<T::Error>> {
        loop {
            if let Some((header_len, remaining)) = util::read_fixed_header(&self.rx_buf[..self.rx_len])? {
                let total = header_len + remaining;
                if total > BUF_SIZE {
                    return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
                }
                if self.rx_len >= total {
                    let packet = Inbound::decode(&self.rx_buf[..total]);
                    self.rx_buf.copy_within(total..self.rx_len, 0);
                    self.rx_len -= total;
                    return Ok(packet?);
                }
            }

            let n = self
                .transport
                .recv(&mut self.rx_buf[self.rx_len..])
                .await
                .map_err(MqttError::Transport)?;
            if n == 0 {
                return Err(MqttError::Protocol(ProtocolError::ConnectionClosed));
            }
            self.rx_len += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBroker, FakeError, packet_type};
    use embassy_futures::block_on;

    const BROKER: BrokerAddress = BrokerAddress::new([10, 0, 0, 1], 1883);

    fn client(broker: FakeBroker) -> MqttClient<FakeBroker, 256> {
        MqttClient::new(broker)
    }

    #[test]
    fn connect_succeeds_on_accepting_broker() {
        let mut client = client(FakeBroker::new());
        let ack = block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap();
        assert_eq!(ack.reason_code, 0);
        assert_eq!(client.transport().opens, 1);
        assert_eq!(packet_type(&client.transport().frames[0]), 1);
    }

    #[test]
    fn refused_connack_maps_reason_code() {
        let mut broker = FakeBroker::new();
        broker.connack_code = 4;
        let mut client = client(broker);
        let err = block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap_err();
        assert!(matches!(
            err,
            MqttError::ConnectionRefused(ConnectReasonCode::BadUserNameOrPassword)
        ));
    }

    #[test]
    fn open_failure_is_a_transport_error() {
        let mut broker = FakeBroker::new();
        broker.online = false;
        let mut client = client(broker);
        let err = block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap_err();
        assert!(matches!(err, MqttError::Transport(FakeError::Refused)));
    }

    #[test]
    fn split_and_coalesced_frames_are_reassembled() {
        let mut broker = FakeBroker::new();
        broker.chunk = 1;
        broker.answer_pings = false;
        let mut client = client(broker);
        block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap();

        // Two PINGRESPs arriving in one burst, read one byte at a time.
        client.transport_mut().inject(&[0xD0, 0x00, 0xD0, 0x00]);
        block_on(client.ping()).unwrap();
        block_on(client.ping()).unwrap();
        assert!(matches!(
            block_on(client.ping()),
            Err(MqttError::Transport(FakeError::Timeout))
        ));
    }

    #[test]
    fn qos1_publish_waits_for_matching_puback() {
        let mut client = client(FakeBroker::new());
        block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap();
        block_on(client.publish("in/t/esp32/temperature", b"{}", QoS::AtLeastOnce, false)).unwrap();
        block_on(client.publish("in/t/esp32/temperature", b"{}", QoS::AtLeastOnce, false)).unwrap();
        assert_eq!(client.transport().pubacks_sent, 2);
    }

    #[test]
    fn oversized_frame_is_rejected_before_sending() {
        let mut client = MqttClient::<_, 32>::new(FakeBroker::new());
        block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap();
        let payload = [b'x'; 64];
        let err = block_on(client.publish("t", &payload, QoS::AtMostOnce, false)).unwrap_err();
        assert!(matches!(err, MqttError::BufferTooSmall));
        assert_eq!(client.transport().frames.len(), 1);
    }

    #[test]
    fn disconnect_sends_packet_and_closes() {
        let mut client = client(FakeBroker::new());
        block_on(client.connect(&BROKER, &Connect::new("dev", 15, true))).unwrap();
        block_on(client.disconnect());
        assert_eq!(packet_type(client.transport().frames.last().unwrap()), 14);
        assert!(!client.transport().is_open);
    }
}
