//! Composable request predicates.
//!
//! [`RequestMatchRule`] is an immutable builder: every `with_*` call returns
//! a new rule with one more predicate. The default strategy requires every
//! predicate to pass and stops at the first failure or error.

pub mod compare;

use crate::query::{first_value, parse_query_string};
use crate::snapshot::{MessageError, Snapshot};
use compare::{exactly, Compare};
use hyper::body::Bytes;
use hyper::header::HOST;
use hyper::Request;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid JSON path '{path}': {reason}")]
    InvalidJsonPath { path: String, reason: String },
}

/// A predicate over a live request.
pub trait MatchRule: Send + Sync {
    fn matches(&self, req: &Request<Bytes>) -> Result<bool, RuleError>;
}

pub type MatchFn = Arc<dyn Fn(&Request<Bytes>) -> Result<bool, RuleError> + Send + Sync>;

/// How a rule combines its predicates.
pub type Strategy = fn(&Request<Bytes>, &[MatchFn]) -> Result<bool, RuleError>;

/// Every predicate must pass; the first failure or error short-circuits.
pub fn match_all(req: &Request<Bytes>, match_fns: &[MatchFn]) -> Result<bool, RuleError> {
    for match_fn in match_fns {
        if !match_fn(req)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Host as the client addressed it: the target authority, else the `Host` header.
pub fn request_host(req: &Request<Bytes>) -> &str {
    match req.uri().authority() {
        Some(authority) => authority.as_str(),
        None => req
            .headers()
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default(),
    }
}

#[derive(Clone)]
pub struct RequestMatchRule {
    match_fns: Vec<MatchFn>,
    strategy: Strategy,
}

impl Default for RequestMatchRule {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestMatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMatchRule")
            .field("predicates", &self.match_fns.len())
            .finish()
    }
}

impl RequestMatchRule {
    pub fn new() -> Self {
        Self {
            match_fns: Vec::new(),
            strategy: match_all,
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn with(mut self, match_fn: MatchFn) -> Self {
        self.match_fns.push(match_fn);
        self
    }

    /// Compare the first value of header `key` (empty when absent).
    pub fn with_header(self, key: impl Into<String>, compare: Compare<str>) -> Self {
        let key = key.into();
        self.with(Arc::new(move |req: &Request<Bytes>| {
            let value = req
                .headers()
                .get(key.as_str())
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            compare(value)
        }))
    }

    /// Compare the first value of query parameter `key` (empty when absent).
    pub fn with_query_param(self, key: impl Into<String>, compare: Compare<str>) -> Self {
        let key = key.into();
        self.with(Arc::new(move |req: &Request<Bytes>| {
            let pairs = parse_query_string(req.uri().query().unwrap_or_default());
            compare(first_value(&pairs, &key))
        }))
    }

    pub fn with_method(self, compare: Compare<str>) -> Self {
        self.with(Arc::new(move |req: &Request<Bytes>| {
            compare(req.method().as_str())
        }))
    }

    pub fn with_path(self, compare: Compare<str>) -> Self {
        self.with(Arc::new(move |req: &Request<Bytes>| compare(req.uri().path())))
    }

    pub fn with_host(self, compare: Compare<str>) -> Self {
        self.with(Arc::new(move |req: &Request<Bytes>| {
            compare(request_host(req))
        }))
    }

    pub fn with_body(self, compare: Compare<[u8]>) -> Self {
        self.with(Arc::new(move |req: &Request<Bytes>| compare(req.body())))
    }
}

impl MatchRule for RequestMatchRule {
    fn matches(&self, req: &Request<Bytes>) -> Result<bool, RuleError> {
        (self.strategy)(req, &self.match_fns)
    }
}

/// Exact path, host and method of the snapshot's request.
pub fn basic_match_rule(snapshot: &Snapshot) -> Result<RequestMatchRule, MessageError> {
    let req = snapshot.request()?;
    Ok(RequestMatchRule::new()
        .with_path(exactly(req.path()))
        .with_host(exactly(req.host()))
        .with_method(exactly(req.method.as_str())))
}

#[cfg(test)]
mod tests {
    use super::compare::{contains, glob, has_prefix, json};
    use super::*;
    use hyper::Response;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn request(method: &str, uri: &str, body: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("x-tenant", "acme")
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_empty_rule_matches() {
        let rule = RequestMatchRule::new();
        assert!(rule.matches(&request("GET", "/", "")).unwrap());
    }

    #[test]
    fn test_all_predicates_must_pass() {
        let rule = RequestMatchRule::new()
            .with_method(exactly("POST"))
            .with_path(has_prefix("/orders"))
            .with_header("x-tenant", exactly("acme"))
            .with_query_param("page", exactly("2"))
            .with_host(exactly("shop.example.com"))
            .with_body(json("item.sku", glob("SKU-*")));

        let hit = request(
            "POST",
            "http://shop.example.com/orders/new?page=2",
            r#"{"item":{"sku":"SKU-991"}}"#,
        );
        assert!(rule.matches(&hit).unwrap());

        let wrong_page = request(
            "POST",
            "http://shop.example.com/orders/new?page=3",
            r#"{"item":{"sku":"SKU-991"}}"#,
        );
        assert!(!rule.matches(&wrong_page).unwrap());
    }

    #[test]
    fn test_builder_is_immutable() {
        let base = RequestMatchRule::new().with_method(exactly("GET"));
        let narrowed = base.clone().with_path(exactly("/a"));

        let req = request("GET", "/b", "");
        assert!(base.matches(&req).unwrap());
        assert!(!narrowed.matches(&req).unwrap());
    }

    #[test]
    fn test_short_circuits_on_first_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let counting: Compare<str> = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        });

        let rule = RequestMatchRule::new()
            .with_method(exactly("DELETE"))
            .with_path(counting);
        assert!(!rule.matches(&request("GET", "/", "")).unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_short_circuits() {
        let rule = RequestMatchRule::new()
            .with_path(glob("[broken"))
            .with_method(exactly("GET"));
        assert!(rule.matches(&request("GET", "/", "")).is_err());
    }

    #[test]
    fn test_host_falls_back_to_header() {
        let req = Request::builder()
            .uri("/x")
            .header("host", "api.internal:8080")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(request_host(&req), "api.internal:8080");

        let rule = RequestMatchRule::new().with_host(contains("internal"));
        assert!(rule.matches(&req).unwrap());
    }

    #[test]
    fn test_missing_header_compares_empty() {
        let rule = RequestMatchRule::new().with_header("x-missing", exactly(""));
        assert!(rule.matches(&request("GET", "/", "")).unwrap());
    }

    #[test]
    fn test_basic_match_rule() {
        let req = request("GET", "https://example.com:8443/status?verbose=1", "");
        let res = Response::new(Bytes::from("up"));
        let snapshot = Snapshot::new("s", &req, &res, Duration::ZERO);
        let rule = basic_match_rule(&snapshot).unwrap();

        assert!(rule
            .matches(&request("GET", "https://example.com:8443/status", ""))
            .unwrap());
        assert!(!rule
            .matches(&request("POST", "https://example.com:8443/status", ""))
            .unwrap());
        assert!(!rule
            .matches(&request("GET", "https://example.com/status", ""))
            .unwrap());
        assert!(!rule
            .matches(&request("GET", "https://example.com:8443/other", ""))
            .unwrap());
    }

    #[test]
    fn test_custom_strategy() {
        fn any(req: &Request<Bytes>, fns: &[MatchFn]) -> Result<bool, RuleError> {
            for f in fns {
                if f(req)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }

        let rule = RequestMatchRule::new()
            .with_strategy(any)
            .with_method(exactly("PUT"))
            .with_path(exactly("/"));
        assert!(rule.matches(&request("GET", "/", "")).unwrap());
    }
}
