//! Snapshot persistence.
//!
//! # Module Structure
//!
//! - `archive` - txtar-backed store, one file per snapshot
//! - `loader` - bulk loading of an archive directory
//! - `txtar` - the archive format itself

mod archive;
mod loader;
pub mod txtar;

pub use archive::{
    archive_filename, parse_archive, ArchiveStore, ARCHIVE_EXTENSION, REQUEST_SECTION,
    RESPONSE_SECTION, SAFE_HEADERS,
};
pub use loader::load_snapshots_from_dir;

use crate::snapshot::{MessageError, Snapshot, SnapshotRef};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot ID is required")]
    SnapshotIdRequired,

    #[error("file not found in txt archive: {0}")]
    SectionNotFound(String),

    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error("snapshot file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Parse(#[from] MessageError),
}

/// Reads and writes snapshots by reference.
pub trait SnapshotStore: Send + Sync {
    fn read(&self, reference: &SnapshotRef) -> Result<Snapshot, StoreError>;

    fn write(&self, snapshot: &Snapshot) -> Result<SnapshotRef, StoreError>;
}
