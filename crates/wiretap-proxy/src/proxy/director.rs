//! Rewrites an intercepted request so it can be sent to its origin.

use crate::snapshot::{absolute_uri, MessageError};
use hyper::body::Bytes;
use hyper::header::{HeaderName, CONNECTION};
use hyper::{HeaderMap, Request};

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Point `req` at its origin.
///
/// The scheme is `https` for requests that arrived over TLS unless the target
/// is already absolute-form; the host comes from the `Host` header.
pub fn direct(req: &mut Request<Bytes>, secure: bool) -> Result<(), MessageError> {
    let uri = absolute_uri(req.uri(), req.headers(), secure)?;
    *req.uri_mut() = uri;
    strip_hop_by_hop(req.headers_mut());
    Ok(())
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
