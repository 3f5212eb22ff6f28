//! WebSocket upgrade configuration.

use serde::Deserialize;

/// WebSocket configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Expected URI path for upgrades (empty = accept any path).
    #[serde(default)]
    pub path: String,
}
