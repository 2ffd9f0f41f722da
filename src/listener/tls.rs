//! TLS material for the control-plane listener.

use std::fs;
use std::sync::Arc;

use rustls::pki_types::pem::PemObject as _;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::config::TlsFiles;
use crate::error::{AppError, Result};

fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| AppError::tls(format!("failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(AppError::tls("no certificates found"));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| AppError::tls(format!("failed to parse private key: {e}")))
}

/// Build a server config from PEM bytes.
pub fn server_config_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Arc<ServerConfig>> {
    let certs = parse_certificates(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    let config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| AppError::tls(format!("protocol versions: {e}")))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| AppError::tls(format!("server config error: {e}")))?;
    Ok(Arc::new(config))
}

pub fn load_server_config(files: &TlsFiles) -> Result<Arc<ServerConfig>> {
    let cert_pem = fs::read(&files.cert).map_err(|e| {
        AppError::tls(format!("cannot read {}: {e}", files.cert.display()))
    })?;
    let key_pem = fs::read(&files.key)
        .map_err(|e| AppError::tls(format!("cannot read {}: {e}", files.key.display())))?;
    server_config_from_pem(&cert_pem, &key_pem)
}

/// Acceptor for the worker's own certificate, or `None` (plaintext only)
/// when the worker runs without TLS or its material cannot be loaded.
pub fn load_acceptor(files: Option<&TlsFiles>) -> Option<TlsAcceptor> {
    let files = files?;
    match load_server_config(files) {
        Ok(config) => {
            log::info!(
                "TLS enabled for control API (cert: {})",
                files.cert.display()
            );
            Some(TlsAcceptor::from(config))
        }
        Err(e) => {
            log::warn!("TLS material unusable, control API will serve plaintext only: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(server_config_from_pem(b"not a cert", b"not a key").is_err());
    }

    #[test]
    fn self_signed_pair_loads() {
        let rcgen::CertifiedKey { cert, signing_key } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config =
            server_config_from_pem(cert.pem().as_bytes(), signing_key.serialize_pem().as_bytes());
        assert!(config.is_ok());
    }

    #[test]
    fn missing_files_fall_back_to_plaintext() {
        let files = TlsFiles {
            key: PathBuf::from("/nonexistent/key.pem"),
            cert: PathBuf::from("/nonexistent/cert.pem"),
        };
        assert!(load_acceptor(Some(&files)).is_none());
        assert!(load_acceptor(None).is_none());
    }
}
