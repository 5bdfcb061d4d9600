//! rustls configuration built on top of the certificate authority.
//!
//! The server side resolves a leaf certificate per handshake from the SNI
//! name; the client side trusts nothing but the authority's root.

use super::{CertAuthority, CertError};
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fmt;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::error;

/// The crypto provider used for every TLS config in the process.
///
/// Selected explicitly so that builds with more than one rustls backend
/// enabled do not fail at runtime.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Certificate callback keyed by the handshake's requested server name.
/// A handshake without SNI resolves the empty name.
pub struct SniResolver {
    ca: Arc<CertAuthority>,
}

impl SniResolver {
    pub fn new(ca: Arc<CertAuthority>) -> Self {
        Self { ca }
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("cached", &self.ca.cached_len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let server_name = client_hello.server_name().unwrap_or_default();
        match self.ca.get(server_name) {
            Ok(key) => Some(key),
            Err(err) => {
                error!("Failed to mint certificate for '{}': {}", server_name, err);
                None
            }
        }
    }
}

/// Server config presenting dynamically minted leaf certificates.
pub fn server_config(ca: &Arc<CertAuthority>) -> Result<Arc<ServerConfig>, CertError> {
    let mut config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(Arc::clone(ca))));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Client config that trusts only the authority's root certificate.
pub fn client_config(ca: &CertAuthority) -> Result<Arc<ClientConfig>, CertError> {
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(ca.root_store()?)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// TLS acceptor for the MITM side of the listener.
pub fn create_tls_acceptor(ca: &Arc<CertAuthority>) -> Result<TlsAcceptor, CertError> {
    Ok(TlsAcceptor::from(server_config(ca)?))
}

impl CertAuthority {
    /// Root store containing only this authority.
    pub fn root_store(&self) -> Result<RootCertStore, CertError> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert_der().clone())?;
        Ok(roots)
    }
}
