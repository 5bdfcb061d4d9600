//! Capture middleware.
//!
//! Tees the buffered request and response of each exchange and, once the
//! response body has been fully handed to the connection, publishes a
//! [`Snapshot`] from a background task.

use crate::proxy::ProxyBody;
use crate::snapshot::{absolute_uri, new_snapshot_id, Snapshot};
use crate::topic::Topic;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::header::ACCEPT_ENCODING;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Source of wall-clock time for durations and snapshot ids.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct Recorder {
    topic: Topic<Snapshot>,
    clock: Arc<dyn Clock>,
}

impl Recorder {
    pub fn new(topic: Topic<Snapshot>) -> Self {
        Self::with_clock(topic, Arc::new(SystemClock))
    }

    pub fn with_clock(topic: Topic<Snapshot>, clock: Arc<dyn Clock>) -> Self {
        Self { topic, clock }
    }

    /// Run `next` and record the exchange.
    ///
    /// `Accept-Encoding` is removed before forwarding so the stored response
    /// body is never compressed. The snapshot keeps the header as the client
    /// sent it.
    pub async fn record<F, Fut>(
        &self,
        mut req: Request<Bytes>,
        secure: bool,
        next: F,
    ) -> Response<ProxyBody>
    where
        F: FnOnce(Request<Bytes>) -> Fut,
        Fut: Future<Output = Response<Bytes>>,
    {
        let start = self.clock.now();
        let captured_req = capture_request(&req, secure);

        req.headers_mut().remove(ACCEPT_ENCODING);
        let res = next(req).await;

        let mut captured_res = Response::new(res.body().clone());
        *captured_res.status_mut() = res.status();
        *captured_res.headers_mut() = res.headers().clone();

        let (done_tx, done_rx) = oneshot::channel();
        let topic = self.topic.clone();
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            // A dropped sender also means the body is finished with.
            let _ = done_rx.await;
            let elapsed = (clock.now() - start).to_std().unwrap_or_default();

            let id = new_snapshot_id(start, captured_req.method(), captured_req.uri());
            let snapshot = Snapshot::new(id, &captured_req, &captured_res, elapsed);
            debug!("Captured snapshot {}", snapshot.id);

            if let Err(e) = topic.publish(snapshot).await {
                error!("Failed to publish snapshot: {}", e);
            }
        });

        res.map(|body| {
            CompletionBody::new(Full::new(body), done_tx)
                .map_err(|never: Infallible| match never {})
                .boxed()
        })
    }
}

fn capture_request(req: &Request<Bytes>, secure: bool) -> Request<Bytes> {
    let mut captured = Request::new(req.body().clone());
    *captured.method_mut() = req.method().clone();
    *captured.headers_mut() = req.headers().clone();
    *captured.uri_mut() = match absolute_uri(req.uri(), req.headers(), secure) {
        Ok(uri) => uri,
        Err(e) => {
            debug!("Keeping relative target for capture: {}", e);
            req.uri().clone()
        }
    };
    captured
}

/// Body wrapper that signals once the inner body has been fully polled or dropped.
pub struct CompletionBody<B> {
    inner: B,
    done: Option<oneshot::Sender<()>>,
}

impl<B> CompletionBody<B> {
    pub fn new(inner: B, done: oneshot::Sender<()>) -> Self {
        Self {
            inner,
            done: Some(done),
        }
    }

    fn finish(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl<B> Body for CompletionBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) = polled {
            self.finish();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CompletionBody<B> {
    fn drop(&mut self) {
        self.finish();
    }
}
