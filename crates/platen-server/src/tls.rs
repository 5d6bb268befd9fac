// SPDX-License-Identifier: Apache-2.0
//
// TLS acceptor construction from PEM certificate and key files.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use platen_core::{PlatenError, Result};
use tokio_rustls::TlsAcceptor;

/// Build an acceptor from a PEM certificate chain and private key.
pub fn acceptor(certificate: &Path, key: &Path) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(certificate)
        .map_err(|e| PlatenError::Tls(format!("open {}: {e}", certificate.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| PlatenError::Tls(format!("parse {}: {e}", certificate.display())))?;
    if certs.is_empty() {
        return Err(PlatenError::Tls(format!(
            "no certificates in {}",
            certificate.display()
        )));
    }

    let key_file = std::fs::File::open(key)
        .map_err(|e| PlatenError::Tls(format!("open {}: {e}", key.display())))?;
    let private_key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| PlatenError::Tls(format!("parse {}: {e}", key.display())))?
        .ok_or_else(|| PlatenError::Tls(format!("no private key in {}", key.display())))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| PlatenError::Tls(format!("server config: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
