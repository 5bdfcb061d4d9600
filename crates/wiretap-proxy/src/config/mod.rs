//! Configuration types for the wiretap proxy.
//!
//! Every section has defaults, so an empty YAML document is a valid
//! configuration. Command line flags are applied on top in `main.rs`.

mod listen;
mod mode;
mod storage;
mod upstream;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use listen::{ListenConfig, TopicConfig, TunnelConfig, DEFAULT_LISTEN_ADDR};
pub use mode::Mode;
pub use storage::{user_data_dir, CaConfig, SnapshotConfig, TEMP_DIR_MARKER, TOOL_NAME};
pub use upstream::{ConnectionPoolConfig, UpstreamConfig};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Capture traffic or replay archived snapshots
    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub listen: ListenConfig,

    /// Where snapshot archives are written (capture) and read (replay)
    #[serde(default)]
    pub snapshots: SnapshotConfig,

    /// Root CA used to mint per-host leaf certificates
    #[serde(default)]
    pub ca: CaConfig,

    #[serde(default)]
    pub tunnel: TunnelConfig,

    #[serde(default)]
    pub topic: TopicConfig,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.listen.addr.trim().is_empty() {
            anyhow::bail!("listen.addr must not be empty");
        }

        if self.snapshots.dir.trim().is_empty() {
            anyhow::bail!(
                "snapshots.dir must not be empty. Use '-' to write snapshots to a temporary directory"
            );
        }

        if self.tunnel.dial_timeout_ms == 0 {
            anyhow::bail!("tunnel.dial_timeout_ms must be greater than zero");
        }

        if self.tunnel.sniff_timeout_ms == 0 {
            anyhow::bail!("tunnel.sniff_timeout_ms must be greater than zero");
        }

        // tokio's bounded channel panics on a zero capacity
        if self.topic.buffer == 0 {
            anyhow::bail!("topic.buffer must be at least 1");
        }

        if self.connection_pool.request_timeout_secs == 0 {
            anyhow::bail!("connection_pool.request_timeout_secs must be greater than zero");
        }

        Ok(())
    }
}
