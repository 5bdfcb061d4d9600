//! HTTP client creation and configuration.
//!
//! The shared client used by the capture transport to reach origins.

use super::tls::{empty_roots_client_config, insecure_client_config};
use crate::ca::tls::crypto_provider;
use crate::config::{ConnectionPoolConfig, UpstreamConfig};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::{info, warn};

/// Type alias for the HTTP client used by the proxy.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Create a shared HTTP client with connection pooling.
pub fn create_http_client(
    pool: &ConnectionPoolConfig,
    upstream: &UpstreamConfig,
) -> Result<HttpClient, anyhow::Error> {
    let mut http_connector = HttpConnector::new();
    http_connector.set_keepalive(Some(Duration::from_secs(pool.keepalive_timeout_secs)));
    http_connector.set_connect_timeout(Some(Duration::from_secs(pool.connect_timeout_secs)));
    http_connector.enforce_http(false); // Allow both HTTP and HTTPS

    let builder = if upstream.tls_skip_verify {
        warn!("Upstream TLS certificate verification DISABLED (development/testing only)");
        HttpsConnectorBuilder::new().with_tls_config(insecure_client_config()?)
    } else {
        match HttpsConnectorBuilder::new().with_provider_and_native_roots(crypto_provider()) {
            Ok(builder) => builder,
            Err(e) => {
                warn!(
                    "Failed to load native root certificates, HTTPS upstreams will fail: {}",
                    e
                );
                HttpsConnectorBuilder::new().with_tls_config(empty_roots_client_config()?)
            }
        }
    };

    let https_connector = builder
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    let http_client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .build(https_connector);

    info!(
        "Connection pool configured (HTTP/1.1): max_idle={}, idle_timeout={}s, keepalive={}s",
        pool.max_idle_per_host, pool.idle_timeout_secs, pool.keepalive_timeout_secs
    );

    Ok(http_client)
}
