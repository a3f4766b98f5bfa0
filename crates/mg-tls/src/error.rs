use std::io;

use thiserror::Error;

/// Error type for TLS capture, loading and resolution.
#[derive(Debug, Error)]
pub enum TlsError {
    /// I/O failure while reading certificate or key material.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peeked bytes did not start with a TLS handshake record.
    #[error("not a TLS handshake record (first byte {0:#04x})")]
    NotHandshake(u8),

    /// The peeked record ended before a full ClientHello was available.
    #[error("truncated ClientHello record")]
    Truncated,

    /// rustls rejected the ClientHello while parsing it.
    #[error("invalid ClientHello: {0}")]
    ClientHello(#[source] rustls::Error),

    /// Building the server configuration failed (bad cert/key pair, etc.).
    #[error("TLS configuration error: {0}")]
    Config(#[source] rustls::Error),

    /// A resolver declined to produce a configuration for this connection.
    #[error("TLS config resolution failed: {0}")]
    Resolve(String),
}
