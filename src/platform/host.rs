//! Adapters for running the agent on a hosted OS.
//!
//! Useful for simulation and for talking to a local broker during
//! development. [`TcpTransport`] does not do TLS: it satisfies
//! [`SecureTransport`] with a plain TCP socket and ignores the credentials.
//! Real brokers want [`TlsTransport`](super::tls::TlsTransport).

use crate::network::transport::{Credentials, Endpoint, SecureTransport, TransportError};
use crate::network::{Close, Connection, Link, LinkStatus, Read, Write};
use crate::time::{Clock, Delay};
use std::io::{self, ErrorKind, Read as _, Write as _};
use std::net::{Shutdown as NetShutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// How long a read may wait for data before reporting none.
const READ_POLL: Duration = Duration::from_millis(1);

/// Milliseconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Start a clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Sleeps the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// The host network is always there once asked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostLink {
    started: bool,
}

impl Link for HostLink {
    type Error = core::convert::Infallible;

    fn begin(&mut self) -> Result<(), Self::Error> {
        self.started = true;
        Ok(())
    }

    fn poll(&mut self) -> LinkStatus {
        if self.started {
            LinkStatus::Up
        } else {
            LinkStatus::Down
        }
    }
}

/// Resolve `endpoint` and open a TCP stream to it within `timeout`.
pub(crate) fn dial(endpoint: &Endpoint<'_>, timeout: Duration) -> Result<TcpStream, TransportError> {
    let address = (endpoint.host, endpoint.port)
        .to_socket_addrs()
        .map_err(|_| TransportError::Unreachable)?
        .next()
        .ok_or(TransportError::Unreachable)?;
    let stream = TcpStream::connect_timeout(&address, timeout).map_err(|e| match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => TransportError::Closed,
        _ => TransportError::Unreachable,
    })?;
    stream.set_nodelay(true).map_err(|_| TransportError::Closed)?;
    Ok(stream)
}

/// Switch an open stream to polled reads.
pub(crate) fn set_polled(stream: &TcpStream, write_timeout: Duration) -> Result<(), TransportError> {
    stream
        .set_read_timeout(Some(READ_POLL))
        .and_then(|_| stream.set_write_timeout(Some(write_timeout)))
        .map_err(|_| TransportError::Closed)
}

/// Map the outcome of a polled read: no data is `Ok(0)`, end of stream is an
/// error.
pub(crate) fn polled_read(outcome: io::Result<usize>, requested: usize) -> io::Result<usize> {
    match outcome {
        Ok(0) if requested > 0 => Err(io::Error::from(ErrorKind::UnexpectedEof)),
        Ok(n) => Ok(n),
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        Err(e) => Err(e),
    }
}

/// A TCP stream polled with a very short read timeout.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl TcpConnection {
    /// Connect to `endpoint`, giving up after `timeout`.
    pub fn open(endpoint: &Endpoint<'_>, timeout: Duration) -> Result<Self, TransportError> {
        let stream = dial(endpoint, timeout)?;
        set_polled(&stream, timeout)?;
        Ok(Self { stream })
    }
}

impl Read for TcpConnection {
    type Error = io::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        polled_read(self.stream.read(buf), buf.len())
    }
}

impl Write for TcpConnection {
    type Error = io::Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush()
    }
}

impl Close for TcpConnection {
    type Error = io::Error;

    fn close(self) -> Result<(), Self::Error> {
        self.stream.shutdown(NetShutdown::Both)
    }
}

impl Connection for TcpConnection {}

/// Opens plain TCP connections to the broker.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    /// A transport whose connects give up after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl SecureTransport for TcpTransport {
    type Connection = TcpConnection;

    fn connect(
        &mut self,
        endpoint: &Endpoint<'_>,
        _credentials: &Credentials<'_>,
    ) -> Result<Self::Connection, TransportError> {
        TcpConnection::open(endpoint, self.timeout)
    }
}
