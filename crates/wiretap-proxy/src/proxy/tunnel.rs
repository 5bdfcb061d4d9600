//! CONNECT handling.
//!
//! Every tunnel is spliced to the local MITM endpoint (this proxy's own
//! listener), where the client's TLS handshake is terminated with a minted
//! certificate. A CONNECT aimed at that endpoint itself would recurse forever
//! and is answered with 508 instead.

use super::headers::{WiretapHeadersExt, TEXT_PLAIN};
use super::{empty, full, ProxyBody};
use crate::ca::{split_host_port, LOOPBACK_IPS};
use futures::FutureExt;
use hyper::ext::ReasonPhrase;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct Tunnel {
    mitm_addr: SocketAddr,
    dial_timeout: Duration,
}

impl Tunnel {
    pub fn new(mitm_addr: SocketAddr, dial_timeout: Duration) -> Self {
        Self {
            mitm_addr,
            dial_timeout,
        }
    }

    pub fn mitm_addr(&self) -> SocketAddr {
        self.mitm_addr
    }

    /// Answer a CONNECT request.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: Send + 'static,
    {
        let target = connect_target(&req);

        if is_proxy_loop(&req, self.mitm_addr) {
            let mut res = Response::new(full(format!("loop detected for host {target}\n")));
            *res.status_mut() = StatusCode::LOOP_DETECTED;
            res.set_header(&CONTENT_TYPE, &TEXT_PLAIN);
            return res;
        }

        info!("Handling connect tunnel request for {}", target);

        let dial = tokio::time::timeout(self.dial_timeout, TcpStream::connect(self.mitm_addr));
        let mitm = match dial.await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("Failed to dial MITM endpoint {}: {}", self.mitm_addr, e);
                return status_only(StatusCode::BAD_GATEWAY);
            }
            Err(_) => {
                error!(
                    "Timed out dialing MITM endpoint {} after {:?}",
                    self.mitm_addr, self.dial_timeout
                );
                return status_only(StatusCode::BAD_GATEWAY);
            }
        };

        tokio::spawn(async move {
            let task = AssertUnwindSafe(async move {
                match hyper::upgrade::on(req).await {
                    Ok(upgraded) => {
                        info!("Tunnel established for {}", target);
                        splice(TokioIo::new(upgraded), mitm).await;
                        debug!("Tunnel closed for {}", target);
                    }
                    Err(e) => error!("Upgrade error for {}: {}", target, e),
                }
            });
            if let Err(panic) = task.catch_unwind().await {
                error!("Panic in tunnel: {}", panic_message(&*panic));
            }
        });

        let mut res = Response::new(empty());
        res.extensions_mut()
            .insert(ReasonPhrase::from_static(b"Connection established"));
        res
    }
}

/// A CONNECT to a loopback host on the MITM port.
pub fn is_proxy_loop<B>(req: &Request<B>, mitm_addr: SocketAddr) -> bool {
    if req.method() != Method::CONNECT {
        return false;
    }
    let target = connect_target(req);
    let (host, port) = split_host_port(&target);
    let mitm_port = mitm_addr.port().to_string();
    is_loopback(host) && port == Some(mitm_port.as_str())
}

fn is_loopback(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost")
        || host
            .parse::<IpAddr>()
            .is_ok_and(|ip| LOOPBACK_IPS.contains(&ip))
}

fn connect_target<B>(req: &Request<B>) -> String {
    match req.uri().authority() {
        Some(authority) => authority.to_string(),
        None => req
            .headers()
            .get(hyper::header::HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    }
}

fn status_only(status: StatusCode) -> Response<ProxyBody> {
    let mut res = Response::new(empty());
    *res.status_mut() = status;
    res
}

/// Copy bytes both ways until either side finishes, then close both.
async fn splice<C, M>(client: C, mitm: M)
where
    C: AsyncRead + AsyncWrite + Unpin,
    M: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut mitm_read, mut mitm_write) = tokio::io::split(mitm);

    tokio::select! {
        _ = copy_half(&mut mitm_read, &mut client_write, "mitm -> client") => {}
        _ = copy_half(&mut client_read, &mut mitm_write, "client -> mitm") => {}
    }

    let _ = client_write.shutdown().await;
    let _ = mitm_write.shutdown().await;
}

async fn copy_half<R, W>(src: &mut R, dest: &mut W, direction: &'static str)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(e) = tokio::io::copy(src, dest).await {
        debug!("Error copying tunnel data ({}): {}", direction, e);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
