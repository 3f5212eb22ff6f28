//! Route table configuration.
//!
//! Routes are declared as `[[route]]` tables and compiled once at startup:
//!
//! ```toml
//! [[route]]
//! pattern = "room.{id}"
//!
//! [[route]]
//! pattern = "alerts.{level}"
//! publish = false
//! ```

use serde::Deserialize;

/// A single route declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// Topic pattern: dot-separated segments, `{name}` captures one segment.
    pub pattern: String,
    /// Whether subscribing (and unsubscribing) is allowed on this route.
    #[serde(default = "default_true")]
    pub subscribe: bool,
    /// Whether publishing is allowed on this route.
    #[serde(default = "default_true")]
    pub publish: bool,
}

fn default_true() -> bool {
    true
}
