//! Admin endpoints served by the proxy itself under `/__admin/`.
//!
//! - `GET /__admin/api/snapshot/stream` - live snapshots as Server-Sent Events
//! - `GET /__admin/api/health` - mode and current stream subscriber count

use crate::config::Mode;
use crate::proxy::headers::{WiretapHeadersExt, APPLICATION_JSON, NO_CACHE, TEXT_EVENT_STREAM};
use crate::proxy::{empty, full, ProxyBody};
use crate::snapshot::Snapshot;
use crate::topic::{Stream, Topic};
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Frame};
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{error, info};

pub const ADMIN_PREFIX: &str = "/__admin/";
pub const HEALTH_PATH: &str = "/__admin/api/health";
pub const SNAPSHOT_STREAM_PATH: &str = "/__admin/api/snapshot/stream";

pub fn is_admin_path(path: &str) -> bool {
    path.starts_with(ADMIN_PREFIX)
}

#[derive(Clone)]
pub struct AdminApi {
    topic: Topic<Snapshot>,
    mode: Mode,
}

impl AdminApi {
    pub fn new(topic: Topic<Snapshot>, mode: Mode) -> Self {
        Self { topic, mode }
    }

    pub fn handle<B>(&self, req: &Request<B>) -> Response<ProxyBody> {
        match (req.method(), req.uri().path()) {
            (&Method::GET, SNAPSHOT_STREAM_PATH) => self.snapshot_stream(),
            (&Method::GET, HEALTH_PATH) => self.health(),
            _ => {
                let mut res = Response::new(empty());
                *res.status_mut() = StatusCode::NOT_FOUND;
                res
            }
        }
    }

    fn health(&self) -> Response<ProxyBody> {
        let body = serde_json::json!({
            "status": "ok",
            "mode": self.mode.as_str(),
            "subscribers": self.topic.subscriber_count(),
        });
        let mut res = Response::new(full(body.to_string()));
        res.set_header(&CONTENT_TYPE, &APPLICATION_JSON);
        res
    }

    fn snapshot_stream(&self) -> Response<ProxyBody> {
        info!("Snapshot stream connection opened");
        let events = SnapshotEvents {
            stream: self.topic.subscribe(),
        };
        let mut res = Response::new(
            events
                .map_err(|never: Infallible| match never {})
                .boxed(),
        );
        res.set_header(&CONTENT_TYPE, &TEXT_EVENT_STREAM);
        res.set_header(&CACHE_CONTROL, &NO_CACHE);
        res
    }
}

/// Response body that yields one event per published snapshot.
/// Dropping it (client disconnect) unsubscribes from the topic.
struct SnapshotEvents {
    stream: Stream<Snapshot>,
}

impl Body for SnapshotEvents {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        let this = self.get_mut();
        loop {
            match this.stream.channel().poll_recv(cx) {
                Poll::Ready(Some(snapshot)) => match encode_event(&snapshot) {
                    Ok(event) => return Poll::Ready(Some(Ok(Frame::data(event)))),
                    Err(e) => error!("Failed to encode snapshot {}: {}", snapshot.id, e),
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for SnapshotEvents {
    fn drop(&mut self) {
        info!("Snapshot stream connection closed");
    }
}

fn encode_event(snapshot: &Snapshot) -> Result<Bytes, serde_json::Error> {
    let data = serde_json::to_string(snapshot)?;
    Ok(Bytes::from(format!(
        "event: snapshot\nid: {}\ndata: {}\n\n",
        snapshot.id, data
    )))
}
