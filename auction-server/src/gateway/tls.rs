//! TLS configuration loading
//!
//! The gateway terminates TLS with an operator-supplied certificate; key
//! material comes from PEM files named in the configuration. Plain TCP is
//! allowed only outside production.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::utils::{AppError, AppResult};

/// Build a rustls server config from PEM cert chain + private key files.
pub fn load_tls_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> AppResult<Arc<rustls::ServerConfig>> {
    let certs = load_certs(cert_path.as_ref())?;
    let key = load_private_key(key_path.as_ref())?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AppError::invalid(format!("Invalid TLS certificate/key: {}", e)))?;

    Ok(Arc::new(config))
}

fn load_certs(path: &Path) -> AppResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| AppError::invalid(format!("Cannot open cert {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| AppError::invalid(format!("Malformed cert {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(AppError::invalid(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> AppResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| AppError::invalid(format!("Cannot open key {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| AppError::invalid(format!("Malformed key {}: {}", path.display(), e)))?
        .ok_or_else(|| AppError::invalid(format!("No private key found in {}", path.display())))
}
