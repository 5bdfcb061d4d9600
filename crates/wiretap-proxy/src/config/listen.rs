//! Listener, tunnel and topic configuration.

use serde::{Deserialize, Serialize};

/// Address the single demultiplexed listener binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:9091";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_addr")]
    pub addr: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

/// CONNECT tunnel and protocol sniffing timeouts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Timeout for dialing the local MITM endpoint
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    /// How long a new connection may take to reveal its first line
    #[serde(default = "default_sniff_timeout_ms")]
    pub sniff_timeout_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            dial_timeout_ms: default_dial_timeout_ms(),
            sniff_timeout_ms: default_sniff_timeout_ms(),
        }
    }
}

fn default_dial_timeout_ms() -> u64 {
    5000
}

fn default_sniff_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TopicConfig {
    /// Queue size of each subscriber. A full queue blocks publishers.
    #[serde(default = "default_topic_buffer")]
    pub buffer: usize,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            buffer: default_topic_buffer(),
        }
    }
}

fn default_topic_buffer() -> usize {
    64
}
