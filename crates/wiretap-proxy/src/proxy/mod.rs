//! The intercepting proxy.
//!
//! # Module Structure
//!
//! - `server` - `Server` composition root and accept loop
//! - `demux` - sniffs each connection as plaintext HTTP or TLS
//! - `tunnel` - CONNECT handling and byte splicing to the MITM endpoint
//! - `handler` - per-request chain: tunnel, logging, admin, recorder, reverse proxy
//! - `director` - rewrites intercepted requests for forwarding
//! - `transport` - upstream round trips over the shared HTTP client
//! - `replay` - round trips answered from stored snapshots
//! - `gateway` - 502/504 responses for failed round trips
//! - `client` - HTTP client creation and configuration
//! - `network` - listener creation

mod client;
mod demux;
mod director;
mod gateway;
mod handler;
pub mod headers;
mod network;
mod replay;
mod response_ext;
mod server;
mod tls;
mod transport;
mod tunnel;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Bytes;
use std::convert::Infallible;

pub use demux::{sniff, Protocol};
pub use director::{direct, strip_hop_by_hop};
pub use gateway::{bad_gateway, gateway_response, gateway_timeout};
pub use replay::{ReplayError, ReplayTransport};
pub use server::Server;
pub use transport::{Transport, TransportError, UpstreamTransport};
pub use tunnel::{is_proxy_loop, Tunnel};

/// Body type returned by every handler.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn full(chunk: impl Into<Bytes>) -> ProxyBody {
    Full::new(chunk.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn empty() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}
