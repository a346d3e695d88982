//! Telemetry samples, inbound commands and the collaborators that produce
//! and consume them.
//!
//! The agent core does not know how a sample is acquired or what a command
//! does. It asks a [`Sampler`] for one sample per publish cycle and hands
//! every decoded [`Command`] to a [`CommandDispatcher`].

use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

/// Payload encoding and decoding.
pub mod codec;

/// Longest `message` text carried by a command.
pub const MAX_COMMAND_MESSAGE_LEN: usize = 128;
/// Largest raw command payload.
pub const MAX_COMMAND_LEN: usize = 512;

/// One reading of the inertial sensor.
///
/// Field names on the wire follow the device firmware's JSON schema.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Monotonic milliseconds at acquisition.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: u64,
    /// Acceleration along X in m/s².
    #[serde(rename = "accelX")]
    pub accel_x: f32,
    /// Acceleration along Y in m/s².
    #[serde(rename = "accelY")]
    pub accel_y: f32,
    /// Acceleration along Z in m/s².
    #[serde(rename = "accelZ")]
    pub accel_z: f32,
    /// Rotation rate around X in rad/s.
    #[serde(rename = "gyroX")]
    pub gyro_x: f32,
    /// Rotation rate around Y in rad/s.
    #[serde(rename = "gyroY")]
    pub gyro_y: f32,
    /// Rotation rate around Z in rad/s.
    #[serde(rename = "gyroZ")]
    pub gyro_z: f32,
    /// Die temperature in °C.
    pub temperature: f32,
}

impl TelemetrySample {
    /// All floating point readings, in wire order.
    pub fn readings(&self) -> [f32; 7] {
        [
            self.accel_x,
            self.accel_y,
            self.accel_z,
            self.gyro_x,
            self.gyro_y,
            self.gyro_z,
            self.temperature,
        ]
    }
}

/// Why no sample could be taken this cycle.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SamplerFault {
    /// The sensor did not answer.
    Unavailable,
    /// The bus transaction failed.
    Bus,
    /// The sensor reported data it flags as invalid.
    InvalidData,
}

#[cfg(feature = "defmt")]
impl defmt::Format for SamplerFault {
    fn format(&self, f: defmt::Formatter) {
        match self {
            SamplerFault::Unavailable => defmt::write!(f, "Unavailable"),
            SamplerFault::Bus => defmt::write!(f, "Bus"),
            SamplerFault::InvalidData => defmt::write!(f, "InvalidData"),
        }
    }
}

/// Produces telemetry on demand.
///
/// Must return promptly. A fault skips this cycle's publish; the agent asks
/// again on the next tick and never changes connectivity because of it.
pub trait Sampler {
    /// Take one sample stamped with `timestamp_ms`.
    fn sample(&mut self, timestamp_ms: u64) -> Result<TelemetrySample, SamplerFault>;
}

/// State of the remote alarm switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Switch {
    /// Alarm on.
    On,
    /// Alarm off.
    Off,
}

/// One inbound command.
///
/// `payload` keeps the raw message bytes for dispatchers that understand more
/// than the fields decoded here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Free-form operator text.
    pub message: Option<String<MAX_COMMAND_MESSAGE_LEN>>,
    /// Requested alarm state.
    pub alarm: Option<Switch>,
    /// The message as received.
    pub payload: Vec<u8, MAX_COMMAND_LEN>,
}

/// Acts on inbound commands.
///
/// Called synchronously from inside the tick that received the command. The
/// agent neither waits on nor retries a dispatch.
pub trait CommandDispatcher {
    /// Handle one command.
    fn dispatch(&mut self, command: Command);
}

impl<F: FnMut(Command)> CommandDispatcher for F {
    fn dispatch(&mut self, command: Command) {
        self(command)
    }
}
