//! Mutually authenticated transport to the broker.
//!
//! The agent core never performs TLS itself. A platform hands it something
//! that implements [`SecureTransport`]: given the broker endpoint and the
//! device [`Credentials`] it returns an open, authenticated [`Connection`].
//! Retry logic lives in the agent, not here. Hosted builds get a rustls
//! implementation in `platform::tls`.
//!
//! Credential material is PEM text. It is checked once at startup so that a
//! malformed certificate or key is reported as a configuration error instead
//! of surfacing later as an endless series of handshake failures.

use crate::network::Connection;
use pem_rfc7468::Decoder;
use serde::Deserialize;

/// Broker host and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Endpoint<'a> {
    /// Host name, also used for server name indication.
    pub host: &'a str,
    /// TCP port, 8883 for MQTT over TLS.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Port used when a configuration bundle does not name one.
pub const DEFAULT_PORT: u16 = 8883;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Why a secure connection could not be opened.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TransportError {
    /// The host could not be resolved or reached.
    Unreachable,
    /// The connection or TLS handshake did not finish in time.
    Timeout,
    /// The peer rejected our identity or we rejected the peer's certificate.
    Authentication,
    /// The peer closed the connection during setup.
    Closed,
}

impl TransportError {
    /// Whether the failure points at credentials or trust configuration
    /// rather than at the network.
    pub fn is_credential_related(&self) -> bool {
        matches!(self, TransportError::Authentication)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TransportError {
    fn format(&self, f: defmt::Formatter) {
        match self {
            TransportError::Unreachable => defmt::write!(f, "Unreachable"),
            TransportError::Timeout => defmt::write!(f, "Timeout"),
            TransportError::Authentication => defmt::write!(f, "Authentication"),
            TransportError::Closed => defmt::write!(f, "Closed"),
        }
    }
}

/// Opens mutually authenticated connections.
///
/// `connect` may take as long as a TLS handshake takes, but it must be bounded
/// by the implementation's own timeout and report [`TransportError::Timeout`]
/// when that runs out.
pub trait SecureTransport {
    /// The connection type handed to the broker session.
    type Connection: Connection;

    /// Open an authenticated connection to `endpoint`.
    fn connect(
        &mut self,
        endpoint: &Endpoint<'_>,
        credentials: &Credentials<'_>,
    ) -> Result<Self::Connection, TransportError>;
}

/// Device credential material, all PEM encoded.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    /// Certificate of the authority that signed the broker certificate.
    pub trust_anchor: &'a str,
    /// Device certificate presented to the broker.
    pub identity: &'a str,
    /// Private key matching `identity`.
    pub private_key: &'a str,
}

/// Which piece of credential material a [`CredentialError`] refers to.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialKind {
    /// The broker trust anchor.
    TrustAnchor,
    /// The device certificate.
    Identity,
    /// The device private key.
    PrivateKey,
}

/// Problems found in PEM credential material.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CredentialError {
    /// No PEM content at all.
    Empty,
    /// Missing `-----BEGIN`/`-----END` lines.
    MissingArmor,
    /// Armor present but not RFC 7468 conformant, for instance BEGIN and END
    /// labels that differ or legacy encapsulated headers.
    Malformed,
    /// The label does not match the expected kind of material.
    UnexpectedLabel,
    /// The body is not valid base64.
    InvalidBase64,
    /// Armor present but no body.
    EmptyBody,
}

impl From<pem_rfc7468::Error> for CredentialError {
    fn from(error: pem_rfc7468::Error) -> Self {
        match error {
            pem_rfc7468::Error::Base64(_) => CredentialError::InvalidBase64,
            pem_rfc7468::Error::PreEncapsulationBoundary
            | pem_rfc7468::Error::PostEncapsulationBoundary => CredentialError::MissingArmor,
            _ => CredentialError::Malformed,
        }
    }
}

/// CRC-32 fingerprints of the decoded certificates, for status reporting.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Fingerprints {
    /// Fingerprint of the trust anchor DER body.
    pub trust_anchor: u32,
    /// Fingerprint of the device certificate DER body.
    pub identity: u32,
}

impl Credentials<'_> {
    /// Check all three PEM blocks and fingerprint the certificates.
    pub fn validate(&self) -> Result<Fingerprints, (CredentialKind, CredentialError)> {
        let trust_anchor = pem_fingerprint(self.trust_anchor, CredentialKind::TrustAnchor)
            .map_err(|e| (CredentialKind::TrustAnchor, e))?;
        let identity = pem_fingerprint(self.identity, CredentialKind::Identity)
            .map_err(|e| (CredentialKind::Identity, e))?;
        pem_fingerprint(self.private_key, CredentialKind::PrivateKey)
            .map_err(|e| (CredentialKind::PrivateKey, e))?;
        Ok(Fingerprints {
            trust_anchor,
            identity,
        })
    }
}

/// Validate one PEM block and return the CRC-32 of its decoded body.
pub fn pem_fingerprint(pem: &str, kind: CredentialKind) -> Result<u32, CredentialError> {
    let pem = pem.trim();
    if pem.is_empty() {
        return Err(CredentialError::Empty);
    }
    let mut decoder = Decoder::new(pem.as_bytes())?;

    let label = decoder.type_label();
    let label_ok = match kind {
        CredentialKind::TrustAnchor | CredentialKind::Identity => label == "CERTIFICATE",
        CredentialKind::PrivateKey => label.ends_with("PRIVATE KEY"),
    };
    if !label_ok {
        return Err(CredentialError::UnexpectedLabel);
    }

    let mut hasher = crc32fast::Hasher::new();
    let mut body_len = 0usize;
    let mut chunk = [0u8; 48];
    while decoder.remaining_len() > 0 {
        let want = decoder.remaining_len().min(chunk.len());
        let bytes = decoder.decode(&mut chunk[..want])?;
        hasher.update(bytes);
        body_len += bytes.len();
    }

    if body_len == 0 {
        return Err(CredentialError::EmptyBody);
    }
    Ok(hasher.finalize())
}
