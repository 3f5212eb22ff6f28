//! Limits configuration.

use serde::Deserialize;

/// Default maximum frame size (256KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 256 * 1024;

/// Default maximum topic name length in bytes.
pub const DEFAULT_MAX_TOPIC_LENGTH: usize = 256;

/// Default maximum topic segments (depth).
pub const DEFAULT_MAX_TOPIC_SEGMENTS: usize = 16;

/// Default maximum subscriptions per connection.
pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 1024;

/// Default per-connection write buffer cap (1MB).
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 65_536;

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum WebSocket frame size in bytes. Larger frames close the
    /// connection as a protocol violation.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,

    /// Maximum topic name length in bytes.
    #[serde(default = "default_max_topic_length")]
    pub max_topic_length: usize,

    /// Maximum topic segments (separated by '.').
    #[serde(default = "default_max_topic_segments")]
    pub max_topic_segments: usize,

    /// Maximum concurrent subscriptions per connection.
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,

    /// Per-connection write buffer cap in bytes. A delivery that would
    /// exceed it counts as a failed delivery and evicts the subscriber.
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// Maximum concurrent connections. Upgrades beyond this are refused.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_frame_size() -> usize {
    DEFAULT_MAX_FRAME_SIZE
}
fn default_max_topic_length() -> usize {
    DEFAULT_MAX_TOPIC_LENGTH
}
fn default_max_topic_segments() -> usize {
    DEFAULT_MAX_TOPIC_SEGMENTS
}
fn default_max_subscriptions() -> usize {
    DEFAULT_MAX_SUBSCRIPTIONS
}
fn default_write_buffer_size() -> usize {
    DEFAULT_WRITE_BUFFER_SIZE
}
fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_topic_length: DEFAULT_MAX_TOPIC_LENGTH,
            max_topic_segments: DEFAULT_MAX_TOPIC_SEGMENTS,
            max_subscriptions: DEFAULT_MAX_SUBSCRIPTIONS,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl LimitsConfig {
    /// Validate the limits configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be at least 1".into());
        }
        if self.max_topic_length == 0 || self.max_topic_length > 65_535 {
            return Err("max_topic_length must be between 1 and 65535".into());
        }
        if self.max_topic_segments == 0 {
            return Err("max_topic_segments must be at least 1".into());
        }
        if self.write_buffer_size < self.max_frame_size {
            return Err("write_buffer_size must be at least max_frame_size".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(LimitsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_topic_length() {
        let config = LimitsConfig {
            max_topic_length: 70_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_buffer_below_frame_size() {
        let config = LimitsConfig {
            max_frame_size: 1024 * 1024,
            write_buffer_size: 4096,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
