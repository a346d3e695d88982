//! Connection lifecycle states.

/// Where the agent stands in bringing up its broker session.
///
/// Exactly one state is active at a time. The nominal path runs top to bottom;
/// `Faulted` can be entered from any state and always cools down to
/// `Disconnected`.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnectionState {
    /// Nothing in progress. Waiting out backoff, if any.
    Disconnected,
    /// Network link acquisition started.
    LinkAcquiring,
    /// Link usable, no secure session yet.
    LinkUp,
    /// Secure connection open, CONNECT sent, waiting for CONNACK.
    SessionHandshaking,
    /// Broker accepted the session. The only state that may publish.
    SessionActive,
    /// Session torn down after an error, cooling down.
    Faulted,
}

impl ConnectionState {
    /// Short name for logs and status displays.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::LinkAcquiring => "link-acquiring",
            ConnectionState::LinkUp => "link-up",
            ConnectionState::SessionHandshaking => "session-handshaking",
            ConnectionState::SessionActive => "session-active",
            ConnectionState::Faulted => "faulted",
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConnectionState {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=str}", self.as_str())
    }
}
