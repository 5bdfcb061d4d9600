//! HTTP/1.1 wire dumps of buffered messages.
//!
//! Dumps are written with identity bodies: the body is everything after the
//! blank line, so a dump embedded in a framed archive section round-trips
//! byte-for-byte regardless of `Transfer-Encoding` or `Content-Length`.

use super::MessageError;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};

/// Title-case a header name (`content-type` -> `Content-Type`).
pub fn canonical_header_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

fn write_headers(out: &mut Vec<u8>, headers: &HeaderMap) {
    for (name, value) in headers {
        out.extend_from_slice(canonical_header_name(name.as_str()).as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Dump a request with an absolute-form target so host and scheme survive.
///
/// A `Host` header is added from the URI authority when absent and
/// `Content-Length` always reflects the buffered body.
pub fn dump_request(req: &Request<Bytes>) -> Vec<u8> {
    let body = req.body();
    let mut headers = req.headers().clone();

    if !headers.contains_key(HOST) {
        if let Some(value) = req
            .uri()
            .authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        {
            headers.insert(HOST, value);
        }
    }

    headers.remove(CONTENT_LENGTH);
    if !body.is_empty() {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
    }

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("{} {} HTTP/1.1\r\n", req.method(), req.uri()).as_bytes());
    write_headers(&mut out, &headers);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Dump a response exactly as its headers say; callers strip what they must.
pub fn dump_response(res: &Response<Bytes>) -> Vec<u8> {
    let status = res.status();
    let reason = status.canonical_reason().unwrap_or("");

    let mut out = Vec::with_capacity(256 + res.body().len());
    out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status.as_u16(), reason).as_bytes());
    write_headers(&mut out, res.headers());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(res.body());
    out
}

struct Head<'a> {
    start_line: &'a str,
    headers: HeaderMap,
    body: Bytes,
}

fn split_head(data: &[u8]) -> Result<Head<'_>, MessageError> {
    let (head_end, body_start) = find_head_end(data)
        .ok_or_else(|| MessageError::Parse("missing blank line after headers".to_string()))?;

    let head = std::str::from_utf8(&data[..head_end])
        .map_err(|_| MessageError::Parse("message head is not valid UTF-8".to_string()))?;

    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let start_line = lines
        .next()
        .filter(|l| !l.is_empty())
        .ok_or_else(|| MessageError::Parse("empty start line".to_string()))?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| MessageError::Parse(format!("malformed header line: {line}")))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| MessageError::Parse(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| MessageError::Parse(format!("invalid value for '{name}': {e}")))?;
        headers.append(name, value);
    }

    Ok(Head {
        start_line,
        headers,
        body: Bytes::copy_from_slice(&data[body_start..]),
    })
}

fn find_head_end(data: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, pos + 4));
    }
    data.windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| (pos, pos + 2))
}

/// Parse a request dump. Origin-form targets are completed from the `Host` header.
pub fn parse_request(data: &[u8]) -> Result<Request<Bytes>, MessageError> {
    let head = split_head(data)?;

    let mut parts = head.start_line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) if parts.next().is_none() => (m, t, v),
        _ => {
            return Err(MessageError::Parse(format!(
                "malformed request line: {}",
                head.start_line
            )))
        }
    };
    if !version.starts_with("HTTP/1.") {
        return Err(MessageError::Parse(format!("unsupported version: {version}")));
    }

    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| MessageError::Parse(format!("invalid method '{method}': {e}")))?;

    let mut uri: Uri = target
        .parse()
        .map_err(|e| MessageError::Parse(format!("invalid request target '{target}': {e}")))?;
    if uri.authority().is_none() {
        if let Some(host) = head.headers.get(HOST).and_then(|h| h.to_str().ok()) {
            uri = format!("http://{host}{target}")
                .parse()
                .map_err(|e| MessageError::Parse(format!("invalid host '{host}': {e}")))?;
        }
    }

    let mut req = Request::new(head.body);
    *req.method_mut() = method;
    *req.uri_mut() = uri;
    *req.headers_mut() = head.headers;
    Ok(req)
}

/// Parse a response dump.
pub fn parse_response(data: &[u8]) -> Result<Response<Bytes>, MessageError> {
    let head = split_head(data)?;

    let mut parts = head.start_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(MessageError::Parse(format!(
            "malformed status line: {}",
            head.start_line
        )));
    }
    let code = parts.next().unwrap_or_default();
    let status = StatusCode::from_bytes(code.as_bytes())
        .map_err(|e| MessageError::Parse(format!("invalid status code '{code}': {e}")))?;

    let mut res = Response::new(head.body);
    *res.status_mut() = status;
    *res.headers_mut() = head.headers;
    Ok(res)
}
