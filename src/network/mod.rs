//! A network abstraction layer for resource-constrained devices
//!
//! The agent only ever talks to the network through the traits in this
//! module: a byte-stream [`Connection`], a [`Link`] that brings the local
//! network attachment up, and a [`transport::SecureTransport`] that opens
//! mutually authenticated connections to the broker.
//!
//! Every operation here must return within a short, bounded time. A read with
//! nothing to deliver returns `Ok(0)` instead of waiting.

#![deny(unsafe_code)]

/// Common error types for network operations
pub mod error;

/// Network link attachment (radio, ethernet, ...)
pub mod link;

/// Mutually authenticated byte-stream transport
pub mod transport;

/// Application layer protocols
pub mod application;

pub use link::{Link, LinkStatus};

/// Re-exports of common traits
pub mod prelude {
    pub use super::transport::SecureTransport;
    pub use super::{Close, Connection, Link, Read, Write};
}

/// Non-blocking read half of a connection.
pub trait Read {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Read whatever is available right now.
    ///
    /// Returns `Ok(0)` when no data is pending. A connection that has been
    /// closed by the peer must report an error rather than `Ok(0)`.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

/// Write half of a connection.
pub trait Write {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Write data to the connection, returning how many bytes were accepted
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error>;
    /// Flush the write buffer
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// Consuming close of a connection.
pub trait Close {
    /// Associated error type
    type Error: core::fmt::Debug;
    /// Close the connection
    fn close(self) -> Result<(), Self::Error>;
}

/// A synchronous connection
pub trait Connection: Read + Write + Close {}
