//! PEM certificate and private key loading.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::TlsError;

/// Load a certificate chain from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let bytes = fs::read(path)?;
    let mut cursor = Cursor::new(bytes);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Io)?;

    if certs.is_empty() {
        return Err(TlsError::Resolve(format!(
            "no certificates found in {}",
            path.display()
        )));
    }

    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let bytes = fs::read(path)?;
    let mut cursor = Cursor::new(bytes);

    loop {
        match rustls_pemfile::read_one(&mut cursor).map_err(TlsError::Io)? {
            Some(rustls_pemfile::Item::Pkcs8Key(k)) => return Ok(PrivateKeyDer::Pkcs8(k)),
            Some(rustls_pemfile::Item::Pkcs1Key(k)) => return Ok(PrivateKeyDer::Pkcs1(k)),
            Some(rustls_pemfile::Item::Sec1Key(k)) => return Ok(PrivateKeyDer::Sec1(k)),
            Some(_other) => continue,
            None => break,
        }
    }

    Err(TlsError::Resolve(format!(
        "no private key found in {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn self_signed_pem() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".into()]).expect("cert");
        let mut cert_file = tempfile::NamedTempFile::new().expect("cert file");
        cert_file
            .write_all(cert.cert.pem().as_bytes())
            .expect("write cert");
        let mut key_file = tempfile::NamedTempFile::new().expect("key file");
        key_file
            .write_all(cert.key_pair.serialize_pem().as_bytes())
            .expect("write key");
        (cert_file, key_file)
    }

    #[test]
    fn loads_generated_pair() {
        let (cert_file, key_file) = self_signed_pem();
        let certs = load_certs(cert_file.path()).expect("certs");
        assert_eq!(certs.len(), 1);
        load_private_key(key_file.path()).expect("key");
    }

    #[test]
    fn empty_file_is_an_error() {
        let empty = tempfile::NamedTempFile::new().expect("file");
        assert!(load_certs(empty.path()).is_err());
        assert!(load_private_key(empty.path()).is_err());
    }
}
