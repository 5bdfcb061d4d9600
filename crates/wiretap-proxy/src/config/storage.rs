//! Snapshot directory and CA material locations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Name used for the user data directory and temporary snapshot directories.
pub const TOOL_NAME: &str = "wiretap";

/// A snapshot directory of `-` asks for a fresh temporary directory.
pub const TEMP_DIR_MARKER: &str = "-";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    #[serde(default = "default_snapshot_dir")]
    pub dir: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
        }
    }
}

fn default_snapshot_dir() -> String {
    TEMP_DIR_MARKER.to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CaConfig {
    /// Directory holding `ca.cert.pem` and `ca.key.pem`.
    /// Defaults to `$XDG_DATA_HOME/wiretap` (or `~/.local/share/wiretap`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

impl CaConfig {
    pub fn resolve_dir(&self) -> PathBuf {
        match self.dir {
            Some(ref dir) => dir.clone(),
            None => user_data_dir(),
        }
    }
}

/// `$XDG_DATA_HOME/wiretap`, falling back to `$HOME/.local/share/wiretap`.
pub fn user_data_dir() -> PathBuf {
    let base = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = std::env::var_os("HOME").unwrap_or_default();
            PathBuf::from(home).join(".local").join("share")
        }
    };
    base.join(TOOL_NAME)
}

impl SnapshotConfig {
    /// Resolve the configured directory to an absolute, existing path.
    ///
    /// `-` creates a new directory under the system temp dir; relative paths
    /// are resolved against the working directory and created if missing.
    pub fn prepare(&self) -> Result<PathBuf, anyhow::Error> {
        use anyhow::Context;

        let dir = if self.dir == TEMP_DIR_MARKER {
            // Snapshots outlive the process, so the directory is kept.
            tempfile::Builder::new()
                .prefix(TOOL_NAME)
                .tempdir()
                .context("failed to create temporary snapshot directory")?
                .keep()
        } else {
            let dir = PathBuf::from(&self.dir);
            if dir.is_absolute() {
                dir
            } else {
                std::env::current_dir()
                    .context("failed to resolve working directory")?
                    .join(dir)
            }
        };

        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;
        Ok(dir)
    }
}
