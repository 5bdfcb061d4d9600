use super::archive::{parse_archive, ARCHIVE_EXTENSION};
use super::StoreError;
use crate::snapshot::Snapshot;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load every `.txtar` archive below `dir`.
///
/// Each snapshot's id is its path relative to `dir` without the extension,
/// so archives in subdirectories stay addressable through [`super::ArchiveStore`].
pub fn load_snapshots_from_dir(dir: &Path) -> Result<Vec<Snapshot>, StoreError> {
    let mut files = Vec::new();
    collect_archives(dir, &mut files)?;
    files.sort();

    let mut snapshots = Vec::with_capacity(files.len());
    for path in files {
        let bytes = fs::read(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let id = relative_id(dir, &path);
        debug!("Loaded snapshot archive {}", path.display());
        snapshots.push(parse_archive(&bytes, &id)?);
    }
    Ok(snapshots)
}

fn collect_archives(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            collect_archives(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXTENSION) {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path).with_extension("");
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
