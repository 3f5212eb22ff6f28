//! Server configuration.

use std::net::SocketAddr;

use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind address for the WebSocket listener.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Identity of this worker process in shared presence records.
    /// Empty = derived from the process id at startup.
    #[serde(default)]
    pub worker_id: String,
}

fn default_bind() -> SocketAddr {
    "0.0.0.0:9300".parse().unwrap()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            worker_id: String::new(),
        }
    }
}
