//! ClientHello capture over peeked bytes.
//!
//! The dispatcher peeks the first TLS record off a connection without
//! consuming it, and needs the ClientHello contents (SNI, ALPN, offered
//! suites) to decide between raw pass-through and local termination. Rather
//! than re-implementing the record parse, the peeked bytes are fed to
//! `rustls::server::Acceptor` through an in-memory reader; the acceptor is
//! then abandoned, so the live connection still holds the bytes and the real
//! handshake replays them.

use std::io::Cursor;

use rustls::server::Acceptor;
use rustls::{CipherSuite, SignatureScheme};

use crate::error::TlsError;

/// Owned snapshot of the fields muxgate routes and resolves on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloInfo {
    /// SNI host name, if the client sent one.
    pub server_name: Option<String>,
    /// ALPN protocols offered by the client, in preference order.
    pub alpn: Vec<Vec<u8>>,
    /// Cipher suites offered by the client.
    pub cipher_suites: Vec<CipherSuite>,
    /// Signature schemes the client supports.
    pub signature_schemes: Vec<SignatureScheme>,
}

/// Parse a complete, peeked TLS record into a [`ClientHelloInfo`].
///
/// `record` must contain at least the whole first handshake record (header
/// included). The input is read from memory only; nothing is consumed from
/// the originating connection.
pub fn capture_client_hello(record: &[u8]) -> Result<ClientHelloInfo, TlsError> {
    crate::ensure_crypto_provider();

    match record.first() {
        None => return Err(TlsError::Truncated),
        Some(0x16) => {}
        Some(&b) => return Err(TlsError::NotHandshake(b)),
    }

    let mut acceptor = Acceptor::default();
    let mut reader = Cursor::new(record);

    loop {
        let read = acceptor.read_tls(&mut reader).map_err(TlsError::Io)?;
        match acceptor.accept() {
            Ok(Some(accepted)) => {
                let hello = accepted.client_hello();
                return Ok(ClientHelloInfo {
                    server_name: hello.server_name().map(str::to_owned),
                    alpn: hello
                        .alpn()
                        .map(|protos| protos.map(<[u8]>::to_vec).collect())
                        .unwrap_or_default(),
                    cipher_suites: hello.cipher_suites().to_vec(),
                    signature_schemes: hello.signature_schemes().to_vec(),
                });
            }
            Ok(None) => {
                if read == 0 {
                    // The in-memory reader is exhausted and rustls still
                    // wants more bytes: the record was short.
                    return Err(TlsError::Truncated);
                }
            }
            Err((e, _alert)) => return Err(TlsError::ClientHello(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::{ClientConfig, ClientConnection, RootCertStore};
    use std::sync::Arc;

    /// Produce the wire bytes of a real ClientHello via rustls itself.
    fn client_hello_bytes(sni: &str, alpn: &[&[u8]]) -> Vec<u8> {
        crate::ensure_crypto_provider();
        let mut config = ClientConfig::builder()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        let name = sni.to_string().try_into().expect("server name");
        let mut conn =
            ClientConnection::new(Arc::new(config), name).expect("client connection");
        let mut out = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut out).expect("write_tls");
        }
        out
    }

    #[test]
    fn captures_sni_and_alpn() {
        let bytes = client_hello_bytes("mc.example", &[b"h2", b"http/1.1"]);
        let info = capture_client_hello(&bytes).expect("capture");
        assert_eq!(info.server_name.as_deref(), Some("mc.example"));
        assert_eq!(info.alpn, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
        assert!(!info.cipher_suites.is_empty());
        assert!(!info.signature_schemes.is_empty());
    }

    #[test]
    fn repeated_capture_is_stable() {
        let bytes = client_hello_bytes("repeat.example", &[]);
        let a = capture_client_hello(&bytes).expect("first");
        let b = capture_client_hello(&bytes).expect("second");
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_non_handshake_first_byte() {
        let err = capture_client_hello(b"GET / HTTP/1.1\r\n").unwrap_err();
        assert!(matches!(err, TlsError::NotHandshake(b'G')));
    }

    #[test]
    fn rejects_truncated_record() {
        let mut bytes = client_hello_bytes("short.example", &[]);
        bytes.truncate(bytes.len() / 2);
        let err = capture_client_hello(&bytes).unwrap_err();
        assert!(matches!(err, TlsError::Truncated));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            capture_client_hello(&[]),
            Err(TlsError::Truncated)
        ));
    }
}
