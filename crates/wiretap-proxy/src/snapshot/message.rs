//! Buffered, serializable views of HTTP requests and responses.

use super::wire;
use super::MessageError;
use hyper::body::Bytes;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Fields shared by both sides of an exchange.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMessage {
    #[serde(serialize_with = "serialize_headers")]
    pub header: HeaderMap,
    #[serde(serialize_with = "serialize_body")]
    pub body: Bytes,
    pub content_type: String,
    /// Length of the drained body, never the declared header value
    pub content_length: u64,
    pub transfer_encoding: Vec<String>,
    /// Full wire dump, kept for auditing
    pub raw: String,
}

impl HttpMessage {
    fn new(header: HeaderMap, body: Bytes, raw: Vec<u8>) -> Self {
        let content_type = header
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let transfer_encoding = header
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();

        Self {
            content_length: body.len() as u64,
            content_type,
            transfer_encoding,
            raw: String::from_utf8_lossy(&raw).into_owned(),
            header,
            body,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableRequest {
    #[serde(flatten)]
    pub message: HttpMessage,
    #[serde(serialize_with = "serialize_display")]
    pub method: Method,
    #[serde(rename = "url", serialize_with = "serialize_display")]
    pub url: Uri,
}

impl SerializableRequest {
    /// Capture a buffered request. The URI is expected to be absolute already.
    pub fn capture(req: &Request<Bytes>) -> Self {
        let raw = wire::dump_request(req);
        Self {
            message: HttpMessage::new(req.headers().clone(), req.body().clone(), raw),
            method: req.method().clone(),
            url: req.uri().clone(),
        }
    }

    pub fn host(&self) -> &str {
        self.url.authority().map(|a| a.as_str()).unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableResponse {
    #[serde(flatten)]
    pub message: HttpMessage,
    #[serde(serialize_with = "serialize_status")]
    pub status_code: StatusCode,
    pub status: String,
}

impl SerializableResponse {
    pub fn capture(res: &Response<Bytes>) -> Self {
        let raw = wire::dump_response(res);
        Self {
            message: HttpMessage::new(res.headers().clone(), res.body().clone(), raw),
            status_code: res.status(),
            status: res
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
        }
    }

    /// Rebuild the stored response, optionally replacing its body.
    ///
    /// A stored `Content-Length` is dropped; the length always follows the
    /// body actually sent.
    pub fn to_response(&self, body: Option<Bytes>) -> Response<Bytes> {
        let mut res = Response::new(body.unwrap_or_else(|| self.message.body.clone()));
        *res.status_mut() = self.status_code;
        *res.headers_mut() = self.message.header.clone();
        res.headers_mut().remove(CONTENT_LENGTH);
        res
    }
}

/// Make a request target absolute.
///
/// The host comes from the target's own authority, falling back to the
/// `Host` header. The scheme is kept when the target already carries one,
/// otherwise it is `https` for TLS connections and `http` for plaintext.
pub fn absolute_uri(uri: &Uri, headers: &HeaderMap, secure: bool) -> Result<Uri, MessageError> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Ok(uri.clone());
    }

    let host = match uri.authority() {
        Some(authority) => authority.as_str().to_string(),
        None => headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| MessageError::Parse(format!("no host for request target {uri}")))?
            .to_string(),
    };
    let scheme = if secure { "https" } else { "http" };
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    format!("{scheme}://{host}{path}")
        .parse()
        .map_err(|e| MessageError::Parse(format!("invalid request target {uri}: {e}")))
}

pub(crate) fn serialize_headers<S: Serializer>(
    headers: &HeaderMap,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(headers.keys_len()))?;
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        map.serialize_entry(&wire::canonical_header_name(name.as_str()), &values)?;
    }
    map.end()
}

fn serialize_body<S: Serializer>(body: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(body))
}

fn serialize_display<T: std::fmt::Display, S: Serializer>(
    value: &T,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

fn serialize_status<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u16(status.as_u16())
}
