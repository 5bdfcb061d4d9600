//! Routes live requests to stored snapshots.

use crate::rules::{MatchRule, RuleError};
use crate::snapshot::SnapshotRef;
use hyper::body::Bytes;
use hyper::Request;
use parking_lot::RwLock;
use std::sync::Arc;

/// A snapshot reference and the rules that select it.
#[derive(Clone)]
pub struct RuleGroup {
    pub reference: SnapshotRef,
    pub rules: Vec<Arc<dyn MatchRule>>,
}

pub trait SnapshotRouter: Send + Sync {
    /// Append a rule group. Groups are evaluated in registration order.
    fn register(&self, reference: SnapshotRef, rules: Vec<Arc<dyn MatchRule>>);

    /// The first group whose every rule passes, or `None`.
    fn match_request(&self, req: &Request<Bytes>) -> Result<Option<SnapshotRef>, RuleError>;
}

/// Router whose groups can be registered while it is serving.
#[derive(Default)]
pub struct DynamicRouter {
    groups: RwLock<Vec<RuleGroup>>,
}

impl DynamicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

impl SnapshotRouter for DynamicRouter {
    fn register(&self, reference: SnapshotRef, rules: Vec<Arc<dyn MatchRule>>) {
        self.groups.write().push(RuleGroup { reference, rules });
    }

    fn match_request(&self, req: &Request<Bytes>) -> Result<Option<SnapshotRef>, RuleError> {
        let groups = self.groups.read();
        for group in groups.iter() {
            let mut matched = true;
            for rule in &group.rules {
                if !rule.matches(req)? {
                    matched = false;
                    break;
                }
            }
            if matched {
                return Ok(Some(group.reference.clone()));
            }
        }
        Ok(None)
    }
}
