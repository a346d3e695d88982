//! MQTT 3.1.1 protocol implementation for embedded systems.
//!
//! This module provides the pieces of MQTT 3.1.1 a telemetry device needs,
//! designed for `no_std` environments with fixed-size buffers.
//!
//! # Protocol Overview
//!
//! MQTT uses a publish-subscribe pattern where:
//! - **Publishers** send messages to topics
//! - **Subscribers** receive messages from topics they're interested in
//! - **Brokers** route messages between publishers and subscribers
//!
//! # Usage
//!
//! [`packet`] holds the wire encoding; [`Session`] drives a session over an
//! open connection without ever waiting on the broker.

/// Packet encoding and decoding.
pub mod packet;

/// Non-blocking broker session.
pub mod session;

pub use packet::{ConnectReturnCode, Options, QoS};
pub use session::{Event, PublishPacket, Session};
