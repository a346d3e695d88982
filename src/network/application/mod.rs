//! # Application Layer Protocols
//!
//! Protocols spoken on top of a [`Connection`](crate::network::Connection).
//!
//! - **[`mqtt`]**: MQTT 3.1.1 device session for publish-subscribe messaging
//!
//! All protocol implementations in this module follow these principles:
//!
//! - **Connection Agnostic**: Work with any type implementing [`Connection`](crate::network::Connection)
//! - **No-std Compatible**: Designed for embedded systems without heap allocation
//! - **Never Blocking**: Every call does a bounded amount of I/O and returns

/// MQTT 3.1.1 protocol implementation.
pub mod mqtt;
