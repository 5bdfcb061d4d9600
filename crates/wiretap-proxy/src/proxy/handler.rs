//! Request handling chain.
//!
//! CONNECT requests go to the tunnel. Everything else is buffered, logged,
//! and either answered by the admin endpoints or recorded on its way through
//! the director and the configured transport.

use super::director::{direct, strip_hop_by_hop};
use super::gateway::{bad_gateway, gateway_response};
use super::response_ext::ResponseExt;
use super::transport::Transport;
use super::tunnel::Tunnel;
use super::ProxyBody;
use crate::admin::{is_admin_path, AdminApi};
use crate::recorder::Recorder;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

pub struct RequestHandler {
    tunnel: Tunnel,
    admin: AdminApi,
    recorder: Recorder,
    transport: Arc<dyn Transport>,
}

impl RequestHandler {
    pub fn new(
        tunnel: Tunnel,
        admin: AdminApi,
        recorder: Recorder,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            tunnel,
            admin,
            recorder,
            transport,
        }
    }

    pub async fn handle(
        &self,
        req: Request<Incoming>,
        secure: bool,
    ) -> Result<Response<ProxyBody>, Infallible> {
        if req.method() == Method::CONNECT {
            return Ok(self.tunnel.handle(req).await);
        }

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = Instant::now();

        let res = self.dispatch(req, secure).await;

        info!(
            "request method={} path={} status={} duration={:?}",
            method,
            path,
            res.status().as_u16(),
            start.elapsed()
        );
        Ok(res)
    }

    async fn dispatch(&self, req: Request<Incoming>, secure: bool) -> Response<ProxyBody> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                let mut res = Response::new(Bytes::new());
                *res.status_mut() = StatusCode::BAD_REQUEST;
                return res.into_boxed();
            }
        };
        let req = Request::from_parts(parts, body);

        if is_admin_path(req.uri().path()) {
            return self.admin.handle(&req);
        }

        self.recorder
            .record(req, secure, |req| self.forward(req, secure))
            .await
    }

    /// Reverse-proxy `req` through the transport.
    async fn forward(&self, mut req: Request<Bytes>, secure: bool) -> Response<Bytes> {
        if let Err(e) = direct(&mut req, secure) {
            warn!("Cannot direct request: {}", e);
            return bad_gateway();
        }

        match self.transport.round_trip(req).await {
            Ok(mut res) => {
                strip_hop_by_hop(res.headers_mut());
                res
            }
            Err(e) => {
                error!("Proxy error: {}", e);
                gateway_response(&e)
            }
        }
    }
}
