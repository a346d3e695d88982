//! Platform adapters.
//!
//! The agent core only sees the traits in [`crate::network`] and
//! [`crate::time`]. Firmware provides its own implementations; the ones here
//! cover hosted targets.

/// Hosted OS adapters
#[cfg(feature = "std")]
pub mod host;

/// Mutually authenticated TLS over TCP
#[cfg(feature = "std")]
pub mod tls;
