//! Dynamic certificate authority for MITM TLS termination.
//!
//! A root CA (generated once and cached under the user data directory) signs
//! per-host leaf certificates on demand. Leaves are cached by the literal
//! lookup string, so `127.0.0.1` and `127.0.0.1:8080` are separate entries
//! even though they produce the same certificate subject.
//!
//! # Module Structure
//!
//! - `codec` - PEM decoding and CA file persistence
//! - `sans` - Host/port splitting and subject alternative names
//! - `tls` - rustls server/client configs and the SNI resolver

mod codec;
mod sans;
pub mod tls;

pub use codec::{ca_paths, CA_CERT_FILE, CA_KEY_FILE};
pub use sans::{bare_host, split_host_port, LOOPBACK_IPS};

use chrono::{Datelike, Utc};
use parking_lot::RwLock;
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose, RsaKeySize, SerialNumber, PKCS_RSA_SHA256,
};
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Common name of generated root certificates.
pub const CA_NAME: &str = "Wiretap CA";

const LEAF_VALIDITY_DAYS: i64 = 365;
const CA_VALIDITY_DAYS: i64 = 365 * 100;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("TLS configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("CA file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid CA material: {0}")]
    InvalidCa(String),
}

pub struct CertAuthority {
    issuer: Issuer<'static, KeyPair>,
    ca_cert_der: CertificateDer<'static>,
    ca_cert_pem: String,
    ca_key_pem: String,
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
}

impl CertAuthority {
    /// Generate a fresh self-signed root: RSA 4096, ~100 years, CertSign + DigitalSignature.
    pub fn generate() -> Result<Self, CertError> {
        let params = ca_params()?;
        let key = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_4096)?;
        let cert = params.self_signed(&key)?;

        Ok(Self {
            ca_cert_pem: cert.pem(),
            ca_key_pem: key.serialize_pem(),
            ca_cert_der: cert.der().clone(),
            issuer: Issuer::new(params, key),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Build an authority from an existing PEM certificate and PKCS8 key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CertError> {
        let ca_cert_der = codec::decode_certificate(cert_pem)?;
        let key = KeyPair::from_pem(key_pem)?;
        let issuer = Issuer::from_ca_cert_der(&ca_cert_der, key).map_err(|e| {
            CertError::InvalidCa(format!("failed to read issuer from CA certificate: {e}"))
        })?;

        Ok(Self {
            issuer,
            ca_cert_der,
            ca_cert_pem: cert_pem.to_string(),
            ca_key_pem: key_pem.to_string(),
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Load the CA from `dir`, or generate and persist one if either file is missing.
    pub fn load_or_generate(dir: &Path) -> Result<Self, CertError> {
        let (cert_path, key_path) = ca_paths(dir);
        if cert_path.exists() && key_path.exists() {
            info!("Loading CA from {}", cert_path.display());
            let cert_pem = codec::read_pem(&cert_path)?;
            let key_pem = codec::read_pem(&key_path)?;
            return Self::from_pem(&cert_pem, &key_pem);
        }

        info!("Generating new CA at {}", cert_path.display());
        let ca = Self::generate()?;
        ca.persist(dir)?;
        Ok(ca)
    }

    /// Write `ca.cert.pem` and `ca.key.pem` into `dir`.
    pub fn persist(&self, dir: &Path) -> Result<(), CertError> {
        let (cert_path, key_path) = ca_paths(dir);
        codec::write_pem(&cert_path, &self.ca_cert_pem, false)?;
        codec::write_pem(&key_path, &self.ca_key_pem, true)?;
        Ok(())
    }

    pub fn ca_cert_pem(&self) -> &str {
        &self.ca_cert_pem
    }

    pub fn ca_cert_der(&self) -> &CertificateDer<'static> {
        &self.ca_cert_der
    }

    /// Leaf certificate for `host` (optionally `host:port`), minted on first use.
    pub fn get(&self, host: &str) -> Result<Arc<CertifiedKey>, CertError> {
        if let Some(key) = self.cache.read().get(host) {
            return Ok(Arc::clone(key));
        }

        let minted = Arc::new(self.issue(host)?);
        debug!("Minted leaf certificate for '{}'", host);

        // Two handshakes may race to mint the same host; the first insert wins.
        let mut cache = self.cache.write();
        Ok(Arc::clone(
            cache.entry(host.to_string()).or_insert(minted),
        ))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }

    fn issue(&self, host: &str) -> Result<CertifiedKey, CertError> {
        let bare = sans::bare_host(host);

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, bare);
        params.serial_number = Some(random_serial());
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;
        params.subject_alt_names = sans::subject_alt_names(bare)?;

        set_validity(&mut params, LEAF_VALIDITY_DAYS);

        let key = KeyPair::generate_rsa_for(&PKCS_RSA_SHA256, RsaKeySize::_2048)?;
        let cert = params.signed_by(&key, &self.issuer)?;

        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        let signer = any_supported_type(&key_der)?;

        Ok(CertifiedKey::new(
            vec![cert.der().clone(), self.ca_cert_der.clone()],
            signer,
        ))
    }
}

fn ca_params() -> Result<CertificateParams, CertError> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, CA_NAME);
    params.serial_number = Some(random_serial());

    set_validity(&mut params, CA_VALIDITY_DAYS);
    Ok(params)
}

// Validity starts at midnight UTC of the current day, so NotBefore is never in the future.
fn set_validity(params: &mut CertificateParams, days: i64) {
    let today = Utc::now().date_naive();
    let until = today + chrono::Duration::days(days);
    params.not_before = rcgen::date_time_ymd(today.year(), today.month() as u8, today.day() as u8);
    params.not_after = rcgen::date_time_ymd(until.year(), until.month() as u8, until.day() as u8);
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // keep the DER integer positive
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use rustls::client::danger::ServerCertVerifier;
    use rustls::client::WebPkiServerVerifier;
    use rustls::pki_types::{ServerName, UnixTime};
    use x509_parser::prelude::*;

    /// RSA-4096 generation is slow; share one authority across tests.
    pub(crate) static TEST_CA: Lazy<Arc<CertAuthority>> =
        Lazy::new(|| Arc::new(CertAuthority::generate().unwrap()));

    fn verify_for(ca: &CertAuthority, key: &CertifiedKey, name: &str) -> Result<(), rustls::Error> {
        let verifier = WebPkiServerVerifier::builder_with_provider(
            Arc::new(ca.root_store().unwrap()),
            tls::crypto_provider(),
        )
        .build()
        .unwrap();
        let server_name = ServerName::try_from(name.to_string()).unwrap();
        verifier
            .verify_server_cert(&key.cert[0], &key.cert[1..], &server_name, &[], UnixTime::now())
            .map(|_| ())
    }

    #[test]
    fn test_generated_ca_is_self_signed_root() {
        let der = TEST_CA.ca_cert_der();
        let (_, cert) = parse_x509_certificate(der.as_ref()).unwrap();

        assert_eq!(cert.subject(), cert.issuer());
        let cn = cert.subject().iter_common_name().next().unwrap();
        assert_eq!(cn.as_str().unwrap(), CA_NAME);
        assert!(cert.is_ca());

        let ku = cert.key_usage().unwrap().unwrap().value;
        assert!(ku.key_cert_sign());
        assert!(ku.digital_signature());

        let validity = cert.validity();
        let years = (validity.not_after.timestamp() - validity.not_before.timestamp())
            / (365 * 24 * 3600);
        assert!(years >= 99);
        assert!(TEST_CA.ca_cert_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn test_get_returns_cached_object() {
        let first = TEST_CA.get("cache.example.com").unwrap();
        let second = TEST_CA.get("cache.example.com").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.cert[0], second.cert[0]);
    }

    #[test]
    fn test_cache_keyed_by_literal_input() {
        let bare = TEST_CA.get("127.0.0.1").unwrap();
        let with_port = TEST_CA.get("127.0.0.1:8080").unwrap();
        assert!(!Arc::ptr_eq(&bare, &with_port));

        let (_, a) = parse_x509_certificate(bare.cert[0].as_ref()).unwrap();
        let (_, b) = parse_x509_certificate(with_port.cert[0].as_ref()).unwrap();
        assert_eq!(a.subject().to_string(), b.subject().to_string());
    }

    #[test]
    fn test_leaf_verifies_for_dns_name() {
        let key = TEST_CA.get("api.example.com").unwrap();
        assert!(verify_for(&TEST_CA, &key, "api.example.com").is_ok());
        assert!(verify_for(&TEST_CA, &key, "other.example.com").is_err());
    }

    #[test]
    fn test_leaf_for_host_port_uses_bare_host() {
        let key = TEST_CA.get("service.local:8443").unwrap();
        assert!(verify_for(&TEST_CA, &key, "service.local").is_ok());

        let (_, cert) = parse_x509_certificate(key.cert[0].as_ref()).unwrap();
        let cn = cert.subject().iter_common_name().next().unwrap();
        assert_eq!(cn.as_str().unwrap(), "service.local");
    }

    #[test]
    fn test_leaf_verifies_for_ip_and_loopback() {
        let key = TEST_CA.get("10.0.0.7").unwrap();
        assert!(verify_for(&TEST_CA, &key, "10.0.0.7").is_ok());
        assert!(verify_for(&TEST_CA, &key, "127.0.0.1").is_ok());
        assert!(verify_for(&TEST_CA, &key, "::1").is_ok());
    }

    #[test]
    fn test_leaf_without_sni_covers_loopback() {
        let key = TEST_CA.get("").unwrap();
        assert!(verify_for(&TEST_CA, &key, "127.0.0.1").is_ok());
    }

    #[test]
    fn test_leaf_validity_window() {
        let key = TEST_CA.get("validity.example.com").unwrap();
        let (_, cert) = parse_x509_certificate(key.cert[0].as_ref()).unwrap();
        let now = Utc::now().timestamp();
        let validity = cert.validity();

        assert!(validity.not_before.timestamp() <= now);
        let eleven_months = 11 * 30 * 24 * 3600;
        assert!(validity.not_after.timestamp() >= now + eleven_months);
        assert!(!cert.is_ca());
    }

    #[test]
    fn test_from_pem_round_trip_signs_verifiable_leaves() {
        let key_pem = TEST_CA.ca_key_pem.clone();
        let reloaded = CertAuthority::from_pem(TEST_CA.ca_cert_pem(), &key_pem).unwrap();
        assert_eq!(reloaded.ca_cert_der(), TEST_CA.ca_cert_der());

        let leaf = reloaded.get("reloaded.example.com").unwrap();
        assert!(verify_for(&TEST_CA, &leaf, "reloaded.example.com").is_ok());
    }

    #[test]
    fn test_load_or_generate_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        TEST_CA.persist(dir.path()).unwrap();

        let loaded = CertAuthority::load_or_generate(dir.path()).unwrap();
        assert_eq!(loaded.ca_cert_pem(), TEST_CA.ca_cert_pem());

        let again = CertAuthority::load_or_generate(dir.path()).unwrap();
        assert_eq!(again.ca_cert_der(), loaded.ca_cert_der());

        let key_pem = std::fs::read_to_string(dir.path().join(CA_KEY_FILE)).unwrap();
        assert!(key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let result = CertAuthority::from_pem("not a pem", "also not a pem");
        assert!(result.is_err());
    }
}
