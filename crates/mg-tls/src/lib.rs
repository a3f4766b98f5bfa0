//! TLS support for muxgate.
//!
//! Provides the pieces the dispatcher needs around rustls:
//! - [`capture_client_hello`] parses a peeked TLS record into a
//!   [`ClientHelloInfo`] snapshot without touching the live connection.
//! - [`TlsConfigResolver`] maps a ClientHello to the server configuration
//!   used to terminate that connection (per-entrypoint resolution).
//! - PEM certificate/key loading helpers.

use std::sync::OnceLock;

mod client_hello;
mod error;
mod pem;
mod resolver;

pub use client_hello::{capture_client_hello, ClientHelloInfo};
pub use error::TlsError;
pub use pem::{load_certs, load_private_key};
pub use resolver::{SingleCertResolver, TlsConfigResolver, TlsConfigResolverFn};

static RUSTLS_CRYPTO_PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();

/// Ensure the rustls crypto provider is installed process-wide.
///
/// Safe to call multiple times; only the first call has effect. Selects the
/// `ring` provider for consistency when multiple providers are available.
pub fn ensure_crypto_provider() {
    RUSTLS_CRYPTO_PROVIDER_INSTALLED.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
