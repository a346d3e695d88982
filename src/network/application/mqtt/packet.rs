//! MQTT 3.1.1 packet encoding and decoding.
//!
//! Only the packets a device client needs are covered: it encodes CONNECT,
//! PUBLISH, PUBACK, SUBSCRIBE, PINGREQ and DISCONNECT, and decodes CONNACK,
//! PUBLISH, PUBACK, SUBACK and PINGRESP. Everything works on caller-provided
//! fixed-capacity buffers.

use crate::network::error::Error;
use heapless::Vec;

// MQTT Control Packet types - these are the fixed header packet type values
/// MQTT CONNECT packet type identifier.
pub const CONNECT: u8 = 0x10;
/// MQTT CONNACK packet type identifier.
pub const CONNACK: u8 = 0x20;
/// MQTT PUBLISH packet type identifier.
pub const PUBLISH: u8 = 0x30;
/// MQTT PUBACK packet type identifier.
pub const PUBACK: u8 = 0x40;
/// MQTT SUBSCRIBE packet type identifier (with the mandatory flag bits).
pub const SUBSCRIBE: u8 = 0x82;
/// MQTT SUBACK packet type identifier.
pub const SUBACK: u8 = 0x90;
/// MQTT PINGREQ packet type identifier.
pub const PINGREQ: u8 = 0xC0;
/// MQTT PINGRESP packet type identifier.
pub const PINGRESP: u8 = 0xD0;
/// MQTT DISCONNECT packet type identifier.
pub const DISCONNECT: u8 = 0xE0;

/// MQTT protocol name as defined in the specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
/// MQTT protocol level for version 3.1.1.
const PROTOCOL_LEVEL: u8 = 4;
/// Largest value the variable length encoding can carry.
const MAX_REMAINING_LENGTH: usize = 268_435_455;
/// SUBACK return code for a refused subscription.
const SUBACK_FAILURE: u8 = 0x80;

/// Quality of Service levels supported by the device session.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QoS {
    /// **QoS 0**: At most once delivery. Used for telemetry.
    AtMostOnce = 0,
    /// **QoS 1**: At least once delivery, acknowledged with PUBACK.
    AtLeastOnce = 1,
}

impl QoS {
    fn from_bits(bits: u8) -> Result<Self, Error> {
        match bits {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            _ => Err(Error::ProtocolError),
        }
    }
}

/// CONNACK refusal reasons.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    /// The broker does not speak MQTT 3.1.1.
    UnacceptableProtocol = 1,
    /// The client identifier is not allowed.
    IdentifierRejected = 2,
    /// The broker is temporarily unavailable.
    ServerUnavailable = 3,
    /// Username or password rejected.
    BadCredentials = 4,
    /// The client is not authorized to connect.
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Map a non-zero CONNACK return code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ConnectReturnCode::UnacceptableProtocol),
            2 => Some(ConnectReturnCode::IdentifierRejected),
            3 => Some(ConnectReturnCode::ServerUnavailable),
            4 => Some(ConnectReturnCode::BadCredentials),
            5 => Some(ConnectReturnCode::NotAuthorized),
            _ => None,
        }
    }

    /// Whether retrying with the same identity is pointless.
    pub fn is_credential_related(&self) -> bool {
        matches!(
            self,
            ConnectReturnCode::IdentifierRejected
                | ConnectReturnCode::BadCredentials
                | ConnectReturnCode::NotAuthorized
        )
    }
}

/// Configuration options for the CONNECT packet.
///
/// # Examples
///
/// ```rust
/// use iotlink::network::application::mqtt::Options;
///
/// let options = Options {
///     client_id: "esp32-lab-01",
///     keep_alive_seconds: 60,
///     clean_session: true,
/// };
/// assert!(options.clean_session);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Options<'a> {
    /// The client identifier, must be unique within the broker.
    pub client_id: &'a str,
    /// Keep-alive interval in seconds. Zero disables keep-alive.
    pub keep_alive_seconds: u16,
    /// Whether the broker should discard previous session state.
    pub clean_session: bool,
}

/// A decoded packet borrowing from the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum Packet<'a> {
    /// Answer to CONNECT. `return_code` zero means accepted.
    ConnAck {
        /// Whether the broker resumed a stored session.
        session_present: bool,
        /// CONNACK return code.
        return_code: u8,
    },
    /// An application message.
    Publish {
        /// Topic name.
        topic: &'a str,
        /// Message payload.
        payload: &'a [u8],
        /// Delivery QoS.
        qos: QoS,
        /// Present for QoS 1.
        packet_id: Option<u16>,
    },
    /// Acknowledgement of a QoS 1 publish.
    PubAck {
        /// Identifier of the acknowledged publish.
        packet_id: u16,
    },
    /// Answer to SUBSCRIBE.
    SubAck {
        /// Identifier of the acknowledged subscribe.
        packet_id: u16,
        /// Granted QoS, `None` when the broker refused the filter.
        granted: Option<QoS>,
    },
    /// Answer to PINGREQ.
    PingResp,
    /// A packet type the device client does not handle.
    Unsupported(u8),
}

fn extend<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<(), Error> {
    buf.extend_from_slice(bytes)
        .map_err(|_| Error::BufferOverflow)
}

fn push<const N: usize>(buf: &mut Vec<u8, N>, byte: u8) -> Result<(), Error> {
    buf.push(byte).map_err(|_| Error::BufferOverflow)
}

fn extend_str<const N: usize>(buf: &mut Vec<u8, N>, value: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(value.len()).map_err(|_| Error::ProtocolError)?;
    extend(buf, &len.to_be_bytes())?;
    extend(buf, value)
}

/// Encode the remaining length field for an MQTT packet.
///
/// Each byte carries 7 bits of the length, the high bit flags a continuation.
/// Four bytes cover values up to 268,435,455.
pub fn encode_remaining_length<const N: usize>(
    buf: &mut Vec<u8, N>,
    mut len: usize,
) -> Result<(), Error> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::ProtocolError);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        push(buf, byte)?;
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining length field.
///
/// Returns the value and the number of bytes it occupied, or `None` when the
/// field is not complete yet.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in buf.iter().take(4).enumerate() {
        value += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        Err(Error::ProtocolError)
    } else {
        Ok(None)
    }
}

/// Append a CONNECT packet to `buf`.
pub fn encode_connect<const N: usize>(buf: &mut Vec<u8, N>, options: &Options) -> Result<(), Error> {
    let client_id = options.client_id.as_bytes();
    let remaining = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2 + 2 + client_id.len();

    push(buf, CONNECT)?;
    encode_remaining_length(buf, remaining)?;

    // --- Variable Header ---
    extend_str(buf, PROTOCOL_NAME)?;
    push(buf, PROTOCOL_LEVEL)?;
    let mut connect_flags = 0;
    if options.clean_session {
        connect_flags |= 0x02;
    }
    push(buf, connect_flags)?;
    extend(buf, &options.keep_alive_seconds.to_be_bytes())?;

    // --- Payload ---
    extend_str(buf, client_id)
}

/// Append a PUBLISH packet to `buf`. `packet_id` is required for QoS 1.
pub fn encode_publish<const N: usize>(
    buf: &mut Vec<u8, N>,
    topic: &str,
    payload: &[u8],
    qos: QoS,
    packet_id: Option<u16>,
) -> Result<(), Error> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(Error::ProtocolError);
    }
    let id = match (qos, packet_id) {
        (QoS::AtMostOnce, _) => None,
        (QoS::AtLeastOnce, Some(id)) => Some(id),
        (QoS::AtLeastOnce, None) => return Err(Error::ProtocolError),
    };
    let remaining = 2 + topic.len() + id.map_or(0, |_| 2) + payload.len();

    push(buf, PUBLISH | ((qos as u8) << 1))?;
    encode_remaining_length(buf, remaining)?;
    extend_str(buf, topic.as_bytes())?;
    if let Some(id) = id {
        extend(buf, &id.to_be_bytes())?;
    }
    extend(buf, payload)
}

/// Append a PUBACK packet to `buf`.
pub fn encode_puback<const N: usize>(buf: &mut Vec<u8, N>, packet_id: u16) -> Result<(), Error> {
    push(buf, PUBACK)?;
    push(buf, 2)?;
    extend(buf, &packet_id.to_be_bytes())
}

/// Append a SUBSCRIBE packet for a single topic filter to `buf`.
pub fn encode_subscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    packet_id: u16,
    filter: &str,
    qos: QoS,
) -> Result<(), Error> {
    if filter.is_empty() {
        return Err(Error::ProtocolError);
    }
    let remaining = 2 + 2 + filter.len() + 1;

    push(buf, SUBSCRIBE)?;
    encode_remaining_length(buf, remaining)?;
    extend(buf, &packet_id.to_be_bytes())?;
    extend_str(buf, filter.as_bytes())?;
    push(buf, qos as u8)
}

/// Append a PINGREQ packet to `buf`.
pub fn encode_pingreq<const N: usize>(buf: &mut Vec<u8, N>) -> Result<(), Error> {
    extend(buf, &[PINGREQ, 0])
}

/// Append a DISCONNECT packet to `buf`.
pub fn encode_disconnect<const N: usize>(buf: &mut Vec<u8, N>) -> Result<(), Error> {
    extend(buf, &[DISCONNECT, 0])
}

fn read_u16(body: &[u8], at: usize) -> Result<u16, Error> {
    match body.get(at..at + 2) {
        Some(&[hi, lo]) => Ok(u16::from_be_bytes([hi, lo])),
        _ => Err(Error::ProtocolError),
    }
}

/// Decode the packet at the start of `buf`.
///
/// Returns the packet and the number of bytes it spans, or `None` when `buf`
/// does not yet hold a complete packet.
pub fn decode(buf: &[u8]) -> Result<Option<(Packet<'_>, usize)>, Error> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };
    let Some((remaining, len_bytes)) = decode_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let total = 1 + len_bytes + remaining;
    if buf.len() < total {
        return Ok(None);
    }
    let body = &buf[1 + len_bytes..total];

    let packet = match header & 0xF0 {
        CONNACK => {
            if body.len() != 2 {
                return Err(Error::ProtocolError);
            }
            Packet::ConnAck {
                session_present: body[0] & 0x01 != 0,
                return_code: body[1],
            }
        }
        PUBLISH => decode_publish(header, body)?,
        PUBACK => Packet::PubAck {
            packet_id: read_u16(body, 0)?,
        },
        SUBACK => {
            let packet_id = read_u16(body, 0)?;
            let granted = match body.get(2) {
                Some(&SUBACK_FAILURE) => None,
                Some(&code) => Some(QoS::from_bits(code)?),
                None => return Err(Error::ProtocolError),
            };
            Packet::SubAck { packet_id, granted }
        }
        PINGRESP => Packet::PingResp,
        other => Packet::Unsupported(other),
    };
    Ok(Some((packet, total)))
}

fn decode_publish(header: u8, body: &[u8]) -> Result<Packet<'_>, Error> {
    let qos = QoS::from_bits((header >> 1) & 0x03)?;
    let topic_len = read_u16(body, 0)? as usize;
    let topic_bytes = body.get(2..2 + topic_len).ok_or(Error::ProtocolError)?;
    let topic = core::str::from_utf8(topic_bytes).map_err(|_| Error::ProtocolError)?;

    let mut offset = 2 + topic_len;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce => {
            let id = read_u16(body, offset)?;
            offset += 2;
            Some(id)
        }
    };

    Ok(Packet::Publish {
        topic,
        payload: &body[offset..],
        qos,
        packet_id,
    })
}

/// Headers of a PUBLISH whose payload may not be buffered yet.
#[derive(Debug, PartialEq, Eq)]
pub struct PublishHeader<'a> {
    /// Topic name.
    pub topic: &'a str,
    /// Delivery QoS.
    pub qos: QoS,
    /// Present for QoS 1.
    pub packet_id: Option<u16>,
    /// Bytes the whole packet spans, fixed header included.
    pub total: usize,
}

/// Decode the headers of a PUBLISH at the start of `buf`.
///
/// Returns `None` when `buf` does not start with a PUBLISH or does not yet
/// hold its topic and packet identifier.
pub fn decode_publish_header(buf: &[u8]) -> Result<Option<PublishHeader<'_>>, Error> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };
    if header & 0xF0 != PUBLISH {
        return Ok(None);
    }
    let Some((remaining, len_bytes)) = decode_remaining_length(&buf[1..])? else {
        return Ok(None);
    };
    let qos = QoS::from_bits((header >> 1) & 0x03)?;
    let body = &buf[1 + len_bytes..];

    let Some(&[hi, lo]) = body.get(..2) else {
        return Ok(None);
    };
    let topic_len = usize::from(u16::from_be_bytes([hi, lo]));
    let id_len = match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 2,
    };
    if remaining < 2 + topic_len + id_len {
        return Err(Error::ProtocolError);
    }
    let Some(topic_bytes) = body.get(2..2 + topic_len) else {
        return Ok(None);
    };
    let topic = core::str::from_utf8(topic_bytes).map_err(|_| Error::ProtocolError)?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        QoS::AtLeastOnce => match body.get(2 + topic_len..4 + topic_len) {
            Some(&[hi, lo]) => Some(u16::from_be_bytes([hi, lo])),
            _ => return Ok(None),
        },
    };

    Ok(Some(PublishHeader {
        topic,
        qos,
        packet_id,
        total: 1 + len_bytes + remaining,
    }))
}
