//! Round trips to the origin.

use super::client::{create_http_client, HttpClient};
use super::replay::ReplayError;
use crate::config::{ConnectionPoolConfig, UpstreamConfig};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// Sends a fully buffered request and returns a fully buffered response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError>;
}

/// Forwards to the real origin over the shared pooled client.
#[derive(Clone)]
pub struct UpstreamTransport {
    client: HttpClient,
    timeout: Duration,
}

impl UpstreamTransport {
    pub fn new(client: HttpClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(
        pool: &ConnectionPoolConfig,
        upstream: &UpstreamConfig,
    ) -> Result<Self, anyhow::Error> {
        let client = create_http_client(pool, upstream)?;
        Ok(Self::new(
            client,
            Duration::from_secs(pool.request_timeout_secs),
        ))
    }
}

#[async_trait]
impl Transport for UpstreamTransport {
    async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
        debug!("Forwarding to: {}", req.uri());
        let req = req.map(Full::new);

        let exchange = async {
            let res = self
                .client
                .request(req)
                .await
                .map_err(|e| TransportError::Upstream(e.to_string()))?;
            let (parts, body) = res.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| TransportError::Upstream(e.to_string()))?
                .to_bytes();
            Ok::<_, TransportError>(Response::from_parts(parts, body))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}
