//! Safe header insertion helpers.
//!
//! Static header names and values for wiretap's own headers, so call sites
//! never parse at runtime.

use hyper::header::{HeaderName, HeaderValue};
use hyper::Response;

/// Marks a response synthesized from a stored snapshot.
pub static X_WIRETAP_CACHE_HIT: HeaderName = HeaderName::from_static("x-wiretap-cache-hit");

pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");
pub static TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");
pub static APPLICATION_JSON: HeaderValue = HeaderValue::from_static("application/json");
pub static TEXT_EVENT_STREAM: HeaderValue = HeaderValue::from_static("text/event-stream");
pub static NO_CACHE: HeaderValue = HeaderValue::from_static("no-cache");

/// Extension trait for inserting wiretap headers into responses.
pub trait WiretapHeadersExt {
    /// Insert a header with a static name and value.
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue);
}

impl<B> WiretapHeadersExt for Response<B> {
    fn set_header(&mut self, name: &HeaderName, value: &HeaderValue) {
        self.headers_mut().insert(name.clone(), value.clone());
    }
}
