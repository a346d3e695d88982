//! Non-blocking MQTT 3.1.1 broker session.
//!
//! A [`Session`] wraps an open [`Connection`] and never waits for the broker.
//! [`Session::open`] only sends CONNECT; the CONNACK shows up later as an
//! [`Event`] like every other inbound packet. Each call to [`Session::poll`]
//! performs exactly one read, and [`Session::next_event`] only parses bytes
//! that are already buffered, so a caller can bound the work done per tick.
//!
//! # Examples
//!
//! ```rust
//! use iotlink::network::application::mqtt::{Event, Options, Session};
//! # use iotlink::network::{Close, Connection, Read, Write};
//! # struct Loopback;
//! # impl Connection for Loopback {}
//! # impl Read for Loopback {
//! #     type Error = ();
//! #     fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
//! #         buf[..4].copy_from_slice(&[0x20, 2, 0, 0]);
//! #         Ok(4)
//! #     }
//! # }
//! # impl Write for Loopback {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! # impl Close for Loopback {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), Self::Error> { Ok(()) }
//! # }
//!
//! let options = Options {
//!     client_id: "sensor_node_1",
//!     keep_alive_seconds: 60,
//!     clean_session: true,
//! };
//! let mut session = Session::open(Loopback, &options, 0).unwrap();
//! session.poll().unwrap();
//! let event = session.next_event(0).unwrap();
//! assert!(matches!(event, Some(Event::Connected { .. })));
//! assert!(session.is_connected());
//! ```

use super::packet::{self, ConnectReturnCode, Options, Packet, QoS};
use crate::network::error::Error;
use crate::network::Connection;
use heapless::{String, Vec};

/// Longest topic name accepted on inbound messages.
pub const MAX_TOPIC_LEN: usize = 128;
/// Largest inbound message payload.
pub const MAX_MESSAGE_LEN: usize = 768;
/// Receive buffer capacity. Must hold the largest inbound packet.
pub const RX_BUFFER_SIZE: usize = 1024;
/// Transmit buffer capacity. Bounds the largest outbound packet.
pub const TX_BUFFER_SIZE: usize = 512;

/// An incoming MQTT publish message.
///
/// # Examples
///
/// ```rust
/// use iotlink::network::application::mqtt::{PublishPacket, QoS};
/// use heapless::{String, Vec};
///
/// let packet = PublishPacket {
///     topic: String::try_from("devices/lab-01/commands").unwrap(),
///     payload: Vec::from_slice(br#"{"message":"hi"}"#).unwrap(),
///     qos: QoS::AtMostOnce,
/// };
///
/// assert_eq!(packet.topic.as_str(), "devices/lab-01/commands");
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PublishPacket {
    /// The topic on which the message was published.
    pub topic: String<MAX_TOPIC_LEN>,
    /// The message payload data.
    pub payload: Vec<u8, MAX_MESSAGE_LEN>,
    /// Delivery QoS the broker used.
    pub qos: QoS,
}

/// Something the broker told us.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Event {
    /// CONNACK accepted the session.
    Connected {
        /// Whether the broker resumed stored session state.
        session_present: bool,
    },
    /// CONNACK refused the session.
    Refused(ConnectReturnCode),
    /// An application message arrived. QoS 1 messages are already acknowledged.
    Message(PublishPacket),
    /// SUBACK for one of our subscriptions.
    Subscribed {
        /// Identifier returned by [`Session::subscribe`].
        packet_id: u16,
        /// Granted QoS, `None` when the broker refused the filter.
        granted: Option<QoS>,
    },
    /// PUBACK for one of our QoS 1 publishes.
    Acknowledged {
        /// Identifier of the acknowledged publish.
        packet_id: u16,
    },
    /// PINGRESP arrived.
    Pong,
    /// A message too large to hand over was dropped. QoS 1 messages are
    /// still acknowledged.
    Discarded {
        /// Topic of the dropped message, empty when it does not fit either.
        topic: String<MAX_TOPIC_LEN>,
        /// Size of what was dropped, in bytes.
        len: usize,
    },
}

/// An MQTT 3.1.1 session over an open connection.
pub struct Session<C: Connection> {
    connection: C,
    rx: Vec<u8, RX_BUFFER_SIZE>,
    tx: Vec<u8, TX_BUFFER_SIZE>,
    is_connected: bool,
    keep_alive_ms: u64,
    last_outbound_ms: u64,
    ping_sent_ms: Option<u64>,
    next_packet_id: u16,
    /// Bytes of an oversized packet still to be skipped.
    discard: usize,
}

impl<C: Connection> core::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("is_connected", &self.is_connected)
            .field("buffered", &self.rx.len())
            .field("ping_outstanding", &self.ping_sent_ms.is_some())
            .field("discarding", &self.discard)
            .finish()
    }
}

impl<C: Connection> Session<C> {
    /// Start an MQTT session by sending CONNECT.
    ///
    /// The session is not usable for publishing until an
    /// [`Event::Connected`] has been returned by [`next_event`](Self::next_event).
    ///
    /// # Errors
    ///
    /// * [`Error::BufferOverflow`] - The client identifier does not fit
    /// * [`Error::WriteError`] - The CONNECT packet could not be sent
    pub fn open(connection: C, options: &Options, now_ms: u64) -> Result<Self, Error> {
        let mut session = Self {
            connection,
            rx: Vec::new(),
            tx: Vec::new(),
            is_connected: false,
            keep_alive_ms: u64::from(options.keep_alive_seconds) * 1000,
            last_outbound_ms: now_ms,
            ping_sent_ms: None,
            next_packet_id: 1,
            discard: 0,
        };
        packet::encode_connect(&mut session.tx, options)?;
        session.flush_tx(now_ms)?;
        Ok(session)
    }

    /// Whether the broker accepted the session.
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Perform one non-blocking read into the receive buffer.
    ///
    /// Returns the number of bytes received, zero when nothing was pending.
    /// Bytes belonging to a message that is being discarded are read and
    /// dropped here.
    ///
    /// # Errors
    ///
    /// * [`Error::ReadError`] - The connection failed or was closed
    /// * [`Error::BufferOverflow`] - The buffer is full of an incomplete packet
    pub fn poll(&mut self) -> Result<usize, Error> {
        let start = self.rx.len();
        if start == RX_BUFFER_SIZE {
            return Err(Error::BufferOverflow);
        }
        // `resize` only fails past capacity, which was ruled out above
        self.rx
            .resize(RX_BUFFER_SIZE, 0)
            .map_err(|_| Error::BufferOverflow)?;
        let result = self.connection.read(&mut self.rx[start..]);
        let n = match result {
            Ok(n) => n.min(RX_BUFFER_SIZE - start),
            Err(_) => {
                self.rx.truncate(start);
                return Err(Error::ReadError);
            }
        };
        self.rx.truncate(start + n);
        if self.discard > 0 {
            let skip = self.discard.min(self.rx.len());
            self.consume(skip);
            self.discard -= skip;
        }
        Ok(n)
    }

    /// Take the next complete packet out of the receive buffer.
    ///
    /// Performs no reads. Packets the device does not care about are skipped.
    /// Inbound QoS 1 messages are acknowledged before they are returned.
    /// Messages too large for [`PublishPacket`], or for the receive buffer,
    /// are acknowledged, dropped and reported as [`Event::Discarded`].
    pub fn next_event(&mut self, now_ms: u64) -> Result<Option<Event>, Error> {
        loop {
            let (event, used, ack) = match packet::decode(&self.rx)? {
                None => return self.discard_oversized(now_ms),
                Some((packet, used)) => {
                    let (event, ack) = convert(packet)?;
                    (event, used, ack)
                }
            };
            self.consume(used);

            if let Some(packet_id) = ack {
                packet::encode_puback(&mut self.tx, packet_id)?;
                self.flush_tx(now_ms)?;
            }

            match &event {
                Some(Event::Connected { .. }) => self.is_connected = true,
                Some(Event::Refused(_)) => self.is_connected = false,
                Some(Event::Pong) => self.ping_sent_ms = None,
                Some(_) => {}
                None => continue,
            }
            return Ok(event);
        }
    }

    /// Publish a message to `topic`.
    ///
    /// QoS 1 publishes get a fresh packet identifier, which is returned; the
    /// matching PUBACK arrives as [`Event::Acknowledged`]. Nothing is stored
    /// for retransmission.
    ///
    /// # Errors
    ///
    /// * [`Error::NotOpen`] - CONNACK has not been received
    /// * [`Error::BufferOverflow`] - The packet does not fit the transmit buffer
    /// * [`Error::WriteError`] - The connection failed
    pub fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        now_ms: u64,
    ) -> Result<Option<u16>, Error> {
        if !self.is_connected {
            return Err(Error::NotOpen);
        }
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.allocate_packet_id()),
        };
        if let Err(e) = packet::encode_publish(&mut self.tx, topic, payload, qos, packet_id) {
            self.tx.clear();
            return Err(e);
        }
        self.flush_tx(now_ms)?;
        Ok(packet_id)
    }

    /// Subscribe to a topic filter.
    ///
    /// Returns the packet identifier that the SUBACK will carry.
    pub fn subscribe(&mut self, filter: &str, qos: QoS, now_ms: u64) -> Result<u16, Error> {
        if !self.is_connected {
            return Err(Error::NotOpen);
        }
        let packet_id = self.allocate_packet_id();
        if let Err(e) = packet::encode_subscribe(&mut self.tx, packet_id, filter, qos) {
            self.tx.clear();
            return Err(e);
        }
        self.flush_tx(now_ms)?;
        Ok(packet_id)
    }

    /// Keep the session alive.
    ///
    /// Sends PINGREQ once the connection has been quiet for a keep-alive
    /// period and fails with [`Error::KeepaliveTimeout`] when the PINGRESP is
    /// not back within another period. Does nothing when keep-alive is zero.
    pub fn service_keepalive(&mut self, now_ms: u64) -> Result<(), Error> {
        if self.keep_alive_ms == 0 || !self.is_connected {
            return Ok(());
        }
        if let Some(sent) = self.ping_sent_ms {
            if now_ms.saturating_sub(sent) >= self.keep_alive_ms {
                return Err(Error::KeepaliveTimeout);
            }
            return Ok(());
        }
        if now_ms.saturating_sub(self.last_outbound_ms) >= self.keep_alive_ms {
            trace!("keep-alive ping");
            packet::encode_pingreq(&mut self.tx)?;
            self.flush_tx(now_ms)?;
            self.ping_sent_ms = Some(now_ms);
        }
        Ok(())
    }

    /// Whether a PINGREQ is waiting for its PINGRESP.
    pub fn ping_outstanding(&self) -> bool {
        self.ping_sent_ms.is_some()
    }

    /// Send DISCONNECT and close the connection.
    pub fn disconnect(mut self, now_ms: u64) -> Result<(), Error> {
        let sent = packet::encode_disconnect(&mut self.tx).and_then(|_| self.flush_tx(now_ms));
        let closed = self
            .connection
            .close()
            .map_err(|_| Error::ConnectionClosed);
        sent.and(closed)
    }

    /// Close the connection without telling the broker.
    pub fn abort(self) {
        let _ = self.connection.close();
    }

    /// Start skipping a PUBLISH at the front of the buffer that can never
    /// fit in it.
    fn discard_oversized(&mut self, now_ms: u64) -> Result<Option<Event>, Error> {
        let (topic, packet_id, total) = match packet::decode_publish_header(&self.rx)? {
            Some(header) if header.total > RX_BUFFER_SIZE => (
                String::try_from(header.topic).unwrap_or_default(),
                header.packet_id,
                header.total,
            ),
            _ if self.rx.is_full() => return Err(Error::BufferOverflow),
            _ => return Ok(None),
        };
        self.discard = total - self.rx.len();
        self.rx.clear();
        if let Some(packet_id) = packet_id {
            packet::encode_puback(&mut self.tx, packet_id)?;
            self.flush_tx(now_ms)?;
        }
        warn!("dropping {=usize} byte inbound packet", total);
        Ok(Some(Event::Discarded { topic, len: total }))
    }

    fn allocate_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = match self.next_packet_id.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        id
    }

    fn consume(&mut self, used: usize) {
        let len = self.rx.len();
        self.rx.copy_within(used..len, 0);
        self.rx.truncate(len - used);
    }

    fn flush_tx(&mut self, now_ms: u64) -> Result<(), Error> {
        let mut written = 0;
        while written < self.tx.len() {
            match self.connection.write(&self.tx[written..]) {
                Ok(0) | Err(_) => {
                    self.tx.clear();
                    return Err(Error::WriteError);
                }
                Ok(n) => written += n,
            }
        }
        self.tx.clear();
        self.connection.flush().map_err(|_| Error::WriteError)?;
        self.last_outbound_ms = now_ms;
        Ok(())
    }
}

fn convert(packet: Packet<'_>) -> Result<(Option<Event>, Option<u16>), Error> {
    let converted = match packet {
        Packet::ConnAck {
            session_present,
            return_code: 0,
        } => (Some(Event::Connected { session_present }), None),
        Packet::ConnAck { return_code, .. } => {
            let code = ConnectReturnCode::from_code(return_code).ok_or(Error::ProtocolError)?;
            (Some(Event::Refused(code)), None)
        }
        Packet::Publish {
            topic,
            payload,
            qos,
            packet_id,
        } => {
            let event = match (String::try_from(topic), Vec::from_slice(payload)) {
                (Ok(topic), Ok(payload)) => Event::Message(PublishPacket {
                    topic,
                    payload,
                    qos,
                }),
                (topic, _) => {
                    warn!("dropping oversized inbound message");
                    Event::Discarded {
                        topic: topic.unwrap_or_default(),
                        len: payload.len(),
                    }
                }
            };
            (Some(event), packet_id)
        }
        Packet::PubAck { packet_id } => (Some(Event::Acknowledged { packet_id }), None),
        Packet::SubAck { packet_id, granted } => {
            (Some(Event::Subscribed { packet_id, granted }), None)
        }
        Packet::PingResp => (Some(Event::Pong), None),
        Packet::Unsupported(kind) => {
            debug!("ignoring packet type {=u8:#x}", kind);
            (None, None)
        }
    };
    Ok(converted)
}
