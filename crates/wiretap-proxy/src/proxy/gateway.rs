//! Responses for round trips that produced no upstream response.

use super::transport::TransportError;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};

fn empty_with_status(status: StatusCode) -> Response<Bytes> {
    let mut res = Response::new(Bytes::new());
    *res.status_mut() = status;
    res
}

pub fn bad_gateway() -> Response<Bytes> {
    empty_with_status(StatusCode::BAD_GATEWAY)
}

pub fn gateway_timeout() -> Response<Bytes> {
    empty_with_status(StatusCode::GATEWAY_TIMEOUT)
}

/// Timeouts become 504; every other failure, replay misses included, is 502.
pub fn gateway_response(err: &TransportError) -> Response<Bytes> {
    match err {
        TransportError::Timeout(_) => gateway_timeout(),
        _ => bad_gateway(),
    }
}
