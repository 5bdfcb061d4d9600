//! A transport that answers from stored snapshots instead of the network.

use super::headers::{WiretapHeadersExt, VALUE_TRUE, X_WIRETAP_CACHE_HIT};
use super::transport::{Transport, TransportError};
use crate::router::SnapshotRouter;
use crate::rules::RuleError;
use crate::store::{SnapshotStore, StoreError};
use crate::template::{has_template_actions, render, RequestTemplateVars, TemplateError};
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no match found: {target}")]
    NoRouteMatch { target: String },

    #[error("router error: {target}: {source}")]
    RouteMatch {
        target: String,
        #[source]
        source: RuleError,
    },

    #[error("store read error: {target}: {source}")]
    StoreRead {
        target: String,
        #[source]
        source: StoreError,
    },

    #[error("template error: {target}: {source}")]
    Template {
        target: String,
        #[source]
        source: TemplateError,
    },
}

pub struct ReplayTransport {
    router: Arc<dyn SnapshotRouter>,
    store: Arc<dyn SnapshotStore>,
}

impl ReplayTransport {
    pub fn new(router: Arc<dyn SnapshotRouter>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { router, store }
    }

    /// Resolve `req` to a synthetic response.
    pub fn replay(&self, req: &Request<Bytes>) -> Result<Response<Bytes>, ReplayError> {
        let target = format!("{} {}", req.method(), req.uri());

        let reference = match self.router.match_request(req) {
            Ok(Some(reference)) => reference,
            Ok(None) => return Err(ReplayError::NoRouteMatch { target }),
            Err(source) => return Err(ReplayError::RouteMatch { target, source }),
        };

        let snapshot = self
            .store
            .read(&reference)
            .map_err(|source| ReplayError::StoreRead {
                target: target.clone(),
                source,
            })?;

        let Ok(stored) = snapshot.response() else {
            return Err(ReplayError::NoRouteMatch { target });
        };

        let body = match std::str::from_utf8(&stored.message.body) {
            Ok(text) if has_template_actions(text) => {
                let vars = RequestTemplateVars::from_request(req);
                let rendered = render(text, &vars)
                    .map_err(|source| ReplayError::Template { target, source })?;
                Some(Bytes::from(rendered))
            }
            _ => None,
        };

        debug!("Replaying snapshot {}", reference.id);
        let mut res = stored.to_response(body);
        res.set_header(&X_WIRETAP_CACHE_HIT, &VALUE_TRUE);
        Ok(res)
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn round_trip(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
        Ok(self.replay(&req)?)
    }
}
