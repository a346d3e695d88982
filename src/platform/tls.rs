//! Mutually authenticated TLS over TCP, built on rustls.
//!
//! [`TlsTransport`] turns the device [`Credentials`] into a rustls client
//! configuration on every connect: the trust anchor becomes the only root the
//! broker certificate may chain to, and the identity and private key are
//! presented for client authentication. The TCP connect and the handshake
//! share one deadline.
//!
//! With TLS 1.3 the broker checks the client certificate after our side of
//! the handshake is done, so a rejected identity can also show up as an I/O
//! error while waiting for CONNACK.

use super::host::{dial, polled_read, set_polled};
use crate::network::transport::{Credentials, Endpoint, SecureTransport, TransportError};
use crate::network::{Close, Connection, Read, Write};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{AlertDescription, ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::io::{self, ErrorKind, Read as _, Write as _};
use std::net::{Shutdown as NetShutdown, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build the client configuration for one set of credentials.
///
/// Anything rustls refuses here is a credential problem.
fn client_config(credentials: &Credentials<'_>) -> Result<ClientConfig, TransportError> {
    let mut roots = RootCertStore::empty();
    for anchor in CertificateDer::pem_slice_iter(credentials.trust_anchor.as_bytes()) {
        let anchor = anchor.map_err(|_| TransportError::Authentication)?;
        roots
            .add(anchor)
            .map_err(|_| TransportError::Authentication)?;
    }
    if roots.is_empty() {
        return Err(TransportError::Authentication);
    }

    let chain = CertificateDer::pem_slice_iter(credentials.identity.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| TransportError::Authentication)?;
    let key = PrivateKeyDer::from_pem_slice(credentials.private_key.as_bytes())
        .map_err(|_| TransportError::Authentication)?;

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|_| TransportError::Authentication)?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|_| TransportError::Authentication)
}

/// Classify a TLS protocol failure.
fn tls_failure(error: &rustls::Error) -> TransportError {
    match error {
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
            TransportError::Authentication
        }
        rustls::Error::AlertReceived(
            AlertDescription::BadCertificate
            | AlertDescription::UnsupportedCertificate
            | AlertDescription::CertificateRevoked
            | AlertDescription::CertificateExpired
            | AlertDescription::CertificateUnknown
            | AlertDescription::CertificateRequired
            | AlertDescription::UnknownCA
            | AlertDescription::AccessDenied
            | AlertDescription::HandshakeFailure,
        ) => TransportError::Authentication,
        _ => TransportError::Closed,
    }
}

fn io_failure(error: &io::Error) -> TransportError {
    match error.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportError::Timeout,
        _ => TransportError::Closed,
    }
}

/// Drive the client handshake to completion or until `deadline`.
fn handshake(
    conn: &mut ClientConnection,
    tcp: &mut TcpStream,
    deadline: Instant,
) -> Result<(), TransportError> {
    while conn.is_handshaking() {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Err(TransportError::Timeout);
        }
        tcp.set_read_timeout(Some(left))
            .and_then(|_| tcp.set_write_timeout(Some(left)))
            .map_err(|_| TransportError::Closed)?;

        while conn.wants_write() {
            conn.write_tls(tcp).map_err(|e| io_failure(&e))?;
        }
        if !conn.wants_read() {
            continue;
        }
        match conn.read_tls(tcp) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(_) => {
                if let Err(e) = conn.process_new_packets() {
                    // let the broker see our alert
                    let _ = conn.write_tls(tcp);
                    let failure = tls_failure(&e);
                    warn!("tls handshake rejected: {}", failure);
                    return Err(failure);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(io_failure(&e)),
        }
    }
    while conn.wants_write() {
        conn.write_tls(tcp).map_err(|e| io_failure(&e))?;
    }
    Ok(())
}

/// An established TLS session over a polled TCP stream.
pub struct TlsConnection {
    stream: StreamOwned<ClientConnection, TcpStream>,
}

impl core::fmt::Debug for TlsConnection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TlsConnection")
            .field("peer", &self.stream.sock.peer_addr().ok())
            .field("protocol", &self.stream.conn.protocol_version())
            .finish()
    }
}

impl Read for TlsConnection {
    type Error = io::Error;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        polled_read(self.stream.read(buf), buf.len())
    }
}

impl Write for TlsConnection {
    type Error = io::Error;

    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.stream.flush()
    }
}

impl Close for TlsConnection {
    type Error = io::Error;

    fn close(self) -> Result<(), Self::Error> {
        let mut stream = self.stream;
        stream.conn.send_close_notify();
        while stream.conn.wants_write() {
            stream.conn.write_tls(&mut stream.sock)?;
        }
        stream.sock.shutdown(NetShutdown::Both)
    }
}

impl Connection for TlsConnection {}

/// Opens mutually authenticated TLS connections to the broker.
#[derive(Debug, Clone, Copy)]
pub struct TlsTransport {
    timeout: Duration,
}

impl TlsTransport {
    /// A transport whose connect plus handshake gives up after `timeout`,
    /// normally the configured `handshake_timeout_ms`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl SecureTransport for TlsTransport {
    type Connection = TlsConnection;

    fn connect(
        &mut self,
        endpoint: &Endpoint<'_>,
        credentials: &Credentials<'_>,
    ) -> Result<Self::Connection, TransportError> {
        let deadline = Instant::now() + self.timeout;
        let config = Arc::new(client_config(credentials)?);
        let server_name = ServerName::try_from(endpoint.host.to_string())
            .map_err(|_| TransportError::Unreachable)?;

        let mut tcp = dial(endpoint, self.timeout)?;
        let mut conn =
            ClientConnection::new(config, server_name).map_err(|e| tls_failure(&e))?;
        handshake(&mut conn, &mut tcp, deadline)?;
        set_polled(&tcp, self.timeout)?;
        debug!("tls session established");

        Ok(TlsConnection {
            stream: StreamOwned::new(conn, tcp),
        })
    }
}
