//! PEM encoding and on-disk persistence of CA material.

use super::CertError;
use rustls::pki_types::CertificateDer;
use std::fs;
use std::path::{Path, PathBuf};

pub const CA_CERT_FILE: &str = "ca.cert.pem";
pub const CA_KEY_FILE: &str = "ca.key.pem";

/// Paths of the certificate and PKCS8 key inside a CA directory.
pub fn ca_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(CA_CERT_FILE), dir.join(CA_KEY_FILE))
}

/// Decode the first certificate of a PEM bundle.
pub fn decode_certificate(pem: &str) -> Result<CertificateDer<'static>, CertError> {
    let mut reader = pem.as_bytes();
    let cert = rustls_pemfile::certs(&mut reader)
        .next()
        .ok_or_else(|| CertError::InvalidCa("no certificate found in PEM data".to_string()))?
        .map_err(|e| CertError::InvalidCa(format!("failed to parse certificate PEM: {e}")));
    cert
}

pub fn read_pem(path: &Path) -> Result<String, CertError> {
    fs::read_to_string(path).map_err(|source| CertError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write PEM data, restricting the key file to the owner on unix.
pub fn write_pem(path: &Path, pem: &str, private: bool) -> Result<(), CertError> {
    let io_err = |source| CertError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    fs::write(path, pem).map_err(io_err)?;

    #[cfg(unix)]
    if private {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }
    #[cfg(not(unix))]
    let _ = private;

    Ok(())
}
