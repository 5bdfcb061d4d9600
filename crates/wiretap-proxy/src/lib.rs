//! Wiretap: an HTTP(S) intercepting proxy.
//!
//! In capture mode every exchange is forwarded to its origin and written to
//! a txtar archive. In replay mode archived exchanges are served back through
//! rule matching, with `${{ }}` templates rendered against the live request.

pub mod admin;
pub mod ca;
pub mod config;
pub mod proxy;
pub mod query;
pub mod recorder;
pub mod router;
pub mod rules;
pub mod snapshot;
pub mod store;
pub mod template;
pub mod topic;

pub use ca::CertAuthority;
pub use config::{Config, Mode};
pub use proxy::Server;
pub use router::{DynamicRouter, SnapshotRouter};
pub use store::{ArchiveStore, SnapshotStore};
pub use topic::{Stream, Topic};
