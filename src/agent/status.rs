//! Operator-visible status reporting.
//!
//! Logging is for developers. Whatever an operator or a supervising task
//! needs to see about connectivity and publishing goes through a
//! [`StatusSink`] as a [`StatusEvent`].

use super::state::ConnectionState;
use crate::network::application::mqtt::ConnectReturnCode;
use crate::network::error::Error;
use crate::network::transport::TransportError;
use crate::telemetry::SamplerFault;
use crate::telemetry::codec::{DecodeError, EncodingError};

/// Why a broker handshake did not complete.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HandshakeCause {
    /// The secure connection could not be opened.
    Transport(TransportError),
    /// The broker answered CONNECT with a refusal.
    Refused(ConnectReturnCode),
    /// I/O failed while sending CONNECT or reading CONNACK.
    Io(Error),
    /// No CONNACK within the handshake timeout.
    Timeout,
}

impl HandshakeCause {
    /// Whether retrying with the same credentials is unlikely to help.
    pub fn is_credential_related(&self) -> bool {
        match self {
            HandshakeCause::Transport(e) => e.is_credential_related(),
            HandshakeCause::Refused(code) => code.is_credential_related(),
            HandshakeCause::Io(_) | HandshakeCause::Timeout => false,
        }
    }
}

/// A failure that moved the connection state machine.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Failure {
    /// Link acquisition failed or timed out.
    Link,
    /// The broker session could not be established.
    Handshake(HandshakeCause),
    /// An established session broke.
    Transport(Error),
}

/// Why a publish did not go out.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishError {
    /// The session is not active. Nothing is queued.
    NotConnected,
    /// The payload does not fit an outbound packet.
    TooLarge,
    /// The session broke while sending.
    Transport(Error),
}

/// Something the operator may want to know.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StatusEvent {
    /// The connection state machine moved.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A failure forced a retry.
    Fault(Failure),
    /// Handshakes keep failing on credentials; the device is probably
    /// misconfigured. Reported once per run of failures, retries continue.
    Escalated {
        /// Consecutive credential-related failures so far.
        failures: u32,
    },
    /// A telemetry sample went out.
    Published {
        /// Payload size.
        bytes: usize,
    },
    /// A telemetry publish failed.
    PublishFailed(PublishError),
    /// A sample could not be encoded and was dropped.
    PublishSkipped(EncodingError),
    /// The sampler had nothing this cycle.
    SampleFailed(SamplerFault),
    /// An inbound command could not be decoded.
    CommandRejected(DecodeError),
    /// The broker refused the command subscription.
    SubscriptionRejected,
}

/// Receives status events.
///
/// Called synchronously from the tick that produced the event, so
/// implementations must return quickly.
pub trait StatusSink {
    /// Record one event.
    fn report(&mut self, event: StatusEvent);
}

impl StatusSink for () {
    fn report(&mut self, _event: StatusEvent) {}
}

impl<S: StatusSink + ?Sized> StatusSink for &mut S {
    fn report(&mut self, event: StatusEvent) {
        (**self).report(event)
    }
}
