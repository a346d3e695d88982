//! # iotlink - resilient device agent
//!
//! Keeps a constrained device connected to its message broker, publishes
//! telemetry on a fixed interval and hands inbound commands to the
//! application, all from one cooperative loop that never blocks on the
//! network.
//!
//! ## Layout
//!
//! - [`network`]: byte-stream traits, link attachment, the secure transport
//!   seam and a non-blocking MQTT 3.1.1 session
//! - [`agent`]: configuration, the connection state machine, backoff, the
//!   publish timer, status events and the scheduler loop
//! - [`telemetry`]: samples, commands and their JSON codec
//! - [`time`]: clock, delay and shutdown seams
//! - `platform::host` (feature `std`): adapters for hosted targets
//! - `platform::tls` (feature `std`): a rustls transport with mutual
//!   authentication
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! iotlink = "0.1.0"
//! ```
//!
//! Build an [`agent::ConnectivityManager`] from an [`agent::AgentConfig`],
//! the device credentials, a [`network::Link`] and a
//! [`network::transport::SecureTransport`], then wrap it in an
//! [`agent::Scheduler`] together with a sampler, a command dispatcher, a
//! status sink and a clock. Call [`agent::Scheduler::tick`] from the main
//! loop, or hand control to [`agent::Scheduler::run`].
//!
//! ## Optional Features
//!
//! - `std`: host platform adapters and the rustls transport (default: disabled)
//! - `defmt`: log state transitions and faults through `defmt`

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(missing_docs)]
#![warn(missing_debug_implementations)]

#[macro_use]
mod fmt;

/// Network abstraction layer: connections, link, transport and MQTT session.
pub mod network;

/// The device agent: connection lifecycle and the cooperative loop.
pub mod agent;

/// Telemetry samples, commands and their wire codec.
pub mod telemetry;

/// Time and cancellation seams.
pub mod time;

/// Platform adapters.
pub mod platform;
