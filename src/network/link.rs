//! Network link attachment.
//!
//! A link is whatever has to come up before a socket can be opened: a Wi-Fi
//! association with a DHCP lease, an ethernet carrier, a cellular attach.
//! Acquisition is asynchronous from the agent's point of view: [`Link::begin`]
//! starts it and [`Link::poll`] is asked once per tick how it is going.

/// Current state of the network link.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum LinkStatus {
    /// No link and no acquisition in progress.
    Down,
    /// Acquisition started but not finished.
    Pending,
    /// The link is usable.
    Up,
    /// Acquisition gave up (wrong credentials, no access point, ...).
    Failed,
}

#[cfg(feature = "defmt")]
impl defmt::Format for LinkStatus {
    fn format(&self, f: defmt::Formatter) {
        match self {
            LinkStatus::Down => defmt::write!(f, "Down"),
            LinkStatus::Pending => defmt::write!(f, "Pending"),
            LinkStatus::Up => defmt::write!(f, "Up"),
            LinkStatus::Failed => defmt::write!(f, "Failed"),
        }
    }
}

/// A network link the agent can acquire.
///
/// Implementations must not block: `begin` kicks off acquisition and returns,
/// `poll` reports progress without waiting.
pub trait Link {
    /// Associated error type
    type Error: core::fmt::Debug;

    /// Start acquiring the link.
    fn begin(&mut self) -> Result<(), Self::Error>;

    /// Report the current link state.
    fn poll(&mut self) -> LinkStatus;
}
