//! JSON payload codec built on `serde-json-core`.
//!
//! Outbound telemetry is a flat JSON object that must fit in
//! [`MAX_PAYLOAD_LEN`] bytes. Inbound commands are JSON objects whose unknown
//! fields are ignored. Neither direction allocates.

use super::{Command, MAX_COMMAND_LEN, MAX_COMMAND_MESSAGE_LEN, Switch, TelemetrySample};
use heapless::{String, Vec};
use serde::Deserialize;

/// Largest outbound telemetry payload.
pub const MAX_PAYLOAD_LEN: usize = 256;

/// An encoded telemetry payload.
pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

/// A sample that cannot be represented in the payload schema.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum EncodingError {
    /// A reading is NaN or infinite.
    NonFinite,
    /// The encoded payload exceeds [`MAX_PAYLOAD_LEN`].
    Overflow,
}

#[cfg(feature = "defmt")]
impl defmt::Format for EncodingError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            EncodingError::NonFinite => defmt::write!(f, "NonFinite"),
            EncodingError::Overflow => defmt::write!(f, "Overflow"),
        }
    }
}

/// An inbound payload that could not be decoded.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DecodeError {
    /// Zero-length payload.
    Empty,
    /// Payload larger than the command buffer.
    TooLarge,
    /// Not a JSON object of the expected shape.
    Malformed,
}

#[cfg(feature = "defmt")]
impl defmt::Format for DecodeError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            DecodeError::Empty => defmt::write!(f, "Empty"),
            DecodeError::TooLarge => defmt::write!(f, "TooLarge"),
            DecodeError::Malformed => defmt::write!(f, "Malformed"),
        }
    }
}

#[derive(Deserialize)]
struct CommandFields {
    #[serde(default)]
    message: Option<String<MAX_COMMAND_MESSAGE_LEN>>,
    #[serde(default, rename = "earthquake")]
    alarm: Option<Switch>,
}

/// Encode a sample into its wire payload.
///
/// # Examples
///
/// ```rust
/// use iotlink::telemetry::TelemetrySample;
/// use iotlink::telemetry::codec::encode_sample;
///
/// let sample = TelemetrySample {
///     timestamp_ms: 2000,
///     accel_x: 0.5,
///     accel_y: -0.25,
///     accel_z: 9.75,
///     gyro_x: 0.0,
///     gyro_y: 0.0,
///     gyro_z: 0.0,
///     temperature: 24.5,
/// };
/// let payload = encode_sample(&sample).unwrap();
/// assert!(payload.starts_with(br#"{"timestamp":2000,"accelX":0.5"#));
/// ```
pub fn encode_sample(sample: &TelemetrySample) -> Result<Payload, EncodingError> {
    if sample.readings().iter().any(|value| !value.is_finite()) {
        return Err(EncodingError::NonFinite);
    }
    serde_json_core::to_vec::<_, MAX_PAYLOAD_LEN>(sample).map_err(|_| EncodingError::Overflow)
}

/// Decode a telemetry payload produced by [`encode_sample`].
pub fn decode_sample(bytes: &[u8]) -> Result<TelemetrySample, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    serde_json_core::from_slice::<TelemetrySample>(bytes)
        .map(|(sample, _)| sample)
        .map_err(|_| DecodeError::Malformed)
}

/// Decode an inbound command payload.
pub fn decode_command(bytes: &[u8]) -> Result<Command, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let payload = Vec::from_slice(bytes).map_err(|_| DecodeError::TooLarge)?;
    let mut unescaped = [0u8; MAX_COMMAND_LEN];
    let (fields, _) =
        serde_json_core::from_slice_escaped::<CommandFields>(bytes, &mut unescaped)
            .map_err(|_| DecodeError::Malformed)?;
    Ok(Command {
        message: fields.message,
        alarm: fields.alarm,
        payload,
    })
}
