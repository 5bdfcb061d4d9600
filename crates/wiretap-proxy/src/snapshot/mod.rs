//! Captured request/response exchanges.
//!
//! A [`Snapshot`] is built once from buffered messages and never mutated.
//! The same constructor is used at capture time and when reading archives,
//! so a stored snapshot has exactly the shape of a freshly captured one.

mod id;
mod message;
pub mod wire;

pub use id::{format_snapshot_id, new_snapshot_id, random_nonce, request_id};
pub use message::{absolute_uri, HttpMessage, SerializableRequest, SerializableResponse};

use hyper::body::Bytes;
use hyper::{Request, Response};
use serde::{Deserialize, Serialize, Serializer};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("cannot clone nil request")]
    NilRequest,

    #[error("cannot clone nil response")]
    NilResponse,

    #[error("malformed HTTP message: {0}")]
    Parse(String),
}

/// Lightweight handle used for routing and storage lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub id: String,
}

impl SnapshotRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    /// The original request was made over TLS
    pub secure: bool,
    #[serde(serialize_with = "serialize_nanos")]
    pub duration: Duration,
    pub request: Option<SerializableRequest>,
    pub response: Option<SerializableResponse>,
}

impl Snapshot {
    /// Build a snapshot from a buffered exchange.
    ///
    /// The request URI must be absolute; `secure` is derived from its scheme.
    pub fn new(
        id: impl Into<String>,
        req: &Request<Bytes>,
        res: &Response<Bytes>,
        elapsed: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            secure: req.uri().scheme_str() == Some("https"),
            duration: elapsed,
            request: Some(SerializableRequest::capture(req)),
            response: Some(SerializableResponse::capture(res)),
        }
    }

    pub fn reference(&self) -> SnapshotRef {
        SnapshotRef::new(self.id.clone())
    }

    pub fn request(&self) -> Result<&SerializableRequest, MessageError> {
        self.request.as_ref().ok_or(MessageError::NilRequest)
    }

    pub fn response(&self) -> Result<&SerializableResponse, MessageError> {
        self.response.as_ref().ok_or(MessageError::NilResponse)
    }
}

fn serialize_nanos<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_nanos().min(u64::MAX as u128) as u64)
}
