//! Per-entrypoint TLS configuration resolution.
//!
//! A [`TlsConfigResolver`] is consulted once per incoming TLS connection on
//! the entrypoint it is registered for, after the ClientHello has been
//! captured and the TCP runtime has declined to claim the raw stream. The
//! resolver's error is fatal for that connection.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;

use crate::client_hello::ClientHelloInfo;
use crate::error::TlsError;

/// Maps a captured ClientHello to the server configuration used to terminate
/// the connection. Resolution is per-connection, not cached; implementations
/// may memoize.
pub trait TlsConfigResolver: Send + Sync {
    fn resolve(&self, hello: &ClientHelloInfo) -> Result<Arc<ServerConfig>, TlsError>;
}

/// Adapter turning a closure into a [`TlsConfigResolver`].
pub struct TlsConfigResolverFn<F>(pub F);

impl<F> TlsConfigResolver for TlsConfigResolverFn<F>
where
    F: Fn(&ClientHelloInfo) -> Result<Arc<ServerConfig>, TlsError> + Send + Sync,
{
    fn resolve(&self, hello: &ClientHelloInfo) -> Result<Arc<ServerConfig>, TlsError> {
        (self.0)(hello)
    }
}

/// Resolver serving one certificate chain regardless of SNI.
///
/// The chain and key are loaded once at construction; every connection gets
/// a clone of the same `Arc<ServerConfig>`.
pub struct SingleCertResolver {
    config: Arc<ServerConfig>,
}

impl SingleCertResolver {
    /// Build from PEM files, advertising `h2` and `http/1.1` over ALPN.
    pub fn from_pem_files(cert: &Path, key: &Path) -> Result<Self, TlsError> {
        Self::from_pem_files_with_alpn(cert, key, &[b"h2", b"http/1.1"])
    }

    /// Build from PEM files with an explicit ALPN preference list.
    pub fn from_pem_files_with_alpn(
        cert: &Path,
        key: &Path,
        alpn: &[&[u8]],
    ) -> Result<Self, TlsError> {
        crate::ensure_crypto_provider();

        let certs = crate::pem::load_certs(cert)?;
        let key = crate::pem::load_private_key(key)?;

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(TlsError::Config)?;
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Wrap an already-built server configuration.
    pub fn from_config(config: Arc<ServerConfig>) -> Self {
        Self { config }
    }
}

impl TlsConfigResolver for SingleCertResolver {
    fn resolve(&self, _hello: &ClientHelloInfo) -> Result<Arc<ServerConfig>, TlsError> {
        Ok(self.config.clone())
    }
}
