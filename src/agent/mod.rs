//! The device agent: connection lifecycle and the cooperative loop.
//!
//! [`ConnectivityManager`] owns the path to the broker and moves it through
//! [`ConnectionState`] one bounded step at a time. [`Scheduler`] drives it
//! from a single thread and fits telemetry publishing and command handling
//! around it. Neither ever waits on the network.
//!
//! # Examples
//!
//! ```rust,no_run
//! use iotlink::agent::{AgentConfig, ConnectivityManager, Scheduler};
//! use iotlink::network::transport::Credentials;
//! use iotlink::telemetry::{Command, Sampler, SamplerFault, TelemetrySample};
//! # use iotlink::network::{Link, LinkStatus};
//! # use iotlink::network::transport::{Endpoint, SecureTransport, TransportError};
//! # use iotlink::network::{Close, Connection, Read, Write};
//! # use iotlink::time::Clock;
//! # struct Wifi;
//! # impl Link for Wifi {
//! #     type Error = ();
//! #     fn begin(&mut self) -> Result<(), ()> { Ok(()) }
//! #     fn poll(&mut self) -> LinkStatus { LinkStatus::Up }
//! # }
//! # struct Tls;
//! # struct Socket;
//! # impl Connection for Socket {}
//! # impl Read for Socket {
//! #     type Error = ();
//! #     fn read(&mut self, _buf: &mut [u8]) -> Result<usize, ()> { Ok(0) }
//! # }
//! # impl Write for Socket {
//! #     type Error = ();
//! #     fn write(&mut self, buf: &[u8]) -> Result<usize, ()> { Ok(buf.len()) }
//! #     fn flush(&mut self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl Close for Socket {
//! #     type Error = ();
//! #     fn close(self) -> Result<(), ()> { Ok(()) }
//! # }
//! # impl SecureTransport for Tls {
//! #     type Connection = Socket;
//! #     fn connect(&mut self, _: &Endpoint<'_>, _: &Credentials<'_>) -> Result<Socket, TransportError> { Ok(Socket) }
//! # }
//! # struct Ticks;
//! # impl Clock for Ticks { fn now_ms(&self) -> u64 { 0 } }
//! # const CA: &str = "";
//! # const CERT: &str = "";
//! # const KEY: &str = "";
//! struct Imu;
//!
//! impl Sampler for Imu {
//!     fn sample(&mut self, timestamp_ms: u64) -> Result<TelemetrySample, SamplerFault> {
//!         Ok(TelemetrySample {
//!             timestamp_ms,
//!             accel_x: 0.0,
//!             accel_y: 0.0,
//!             accel_z: 9.81,
//!             gyro_x: 0.0,
//!             gyro_y: 0.0,
//!             gyro_z: 0.0,
//!             temperature: 24.0,
//!         })
//!     }
//! }
//!
//! let config = AgentConfig::new("broker.example.net", "esp32-lab-01");
//! let credentials = Credentials {
//!     trust_anchor: CA,
//!     identity: CERT,
//!     private_key: KEY,
//! };
//! let connectivity = ConnectivityManager::new(config, credentials, Wifi, Tls).unwrap();
//! let mut agent = Scheduler::new(connectivity, Imu, |_command: Command| {}, (), Ticks);
//! loop {
//!     agent.tick();
//! }
//! ```

/// Startup configuration and derived topics
pub mod config;

/// Connection state machine
pub mod connectivity;

/// Reconnect backoff
pub mod retry;

/// The cooperative loop
pub mod scheduler;

/// Connection states
pub mod state;

/// Status events for the operator
pub mod status;

/// Publish timing
pub mod timer;

pub use config::{AgentConfig, BackoffConfig, ConfigError, Topics};
pub use connectivity::ConnectivityManager;
pub use retry::RetryPolicy;
pub use scheduler::{Scheduler, TickReport};
pub use state::ConnectionState;
pub use status::{Failure, HandshakeCause, PublishError, StatusEvent, StatusSink};
pub use timer::PublishTimer;
