//! Presence bridge configuration.

use serde::Deserialize;

/// Default Redis URL.
pub const DEFAULT_PRESENCE_URL: &str = "redis://127.0.0.1:6379";

/// Default fanout channel for cross-worker publishes.
pub const DEFAULT_PRESENCE_CHANNEL: &str = "wsgate:fanout";

/// Default key prefix for presence records.
pub const DEFAULT_PRESENCE_KEY_PREFIX: &str = "presence:";

/// Default reconciliation interval in seconds.
pub const DEFAULT_RECONCILE_INTERVAL: u64 = 15;

/// Default initial reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY: u64 = 1;

/// Default reconnect delay cap in seconds.
pub const DEFAULT_RECONNECT_MAX: u64 = 60;

/// Presence bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Enable cross-worker presence sync through Redis.
    pub enabled: bool,
    /// Redis connection URL.
    #[serde(default = "default_url")]
    pub url: String,
    /// Pub/sub channel carrying cross-worker publishes.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Key prefix for presence hashes (`<prefix><topic>`).
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Seconds between presence reconciliation passes.
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    /// Initial reconnect delay after a Redis failure, in seconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Reconnect delay cap, in seconds (exponential backoff).
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_secs: u64,
}

fn default_url() -> String {
    DEFAULT_PRESENCE_URL.to_string()
}
fn default_channel() -> String {
    DEFAULT_PRESENCE_CHANNEL.to_string()
}
fn default_key_prefix() -> String {
    DEFAULT_PRESENCE_KEY_PREFIX.to_string()
}
fn default_reconcile_interval() -> u64 {
    DEFAULT_RECONCILE_INTERVAL
}
fn default_reconnect_delay() -> u64 {
    DEFAULT_RECONNECT_DELAY
}
fn default_reconnect_max() -> u64 {
    DEFAULT_RECONNECT_MAX
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_url(),
            channel: default_channel(),
            key_prefix: default_key_prefix(),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY,
            reconnect_max_secs: DEFAULT_RECONNECT_MAX,
        }
    }
}

impl PresenceConfig {
    /// Validate the presence configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled {
            if self.url.is_empty() {
                return Err("presence.url must not be empty".into());
            }
            if self.channel.is_empty() {
                return Err("presence.channel must not be empty".into());
            }
            if self.reconcile_interval_secs == 0 {
                return Err("presence.reconcile_interval_secs must be at least 1".into());
            }
            if self.reconnect_delay_secs == 0 {
                return Err("presence.reconnect_delay_secs must be at least 1".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_valid() {
        assert!(PresenceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_enabled_requires_url() {
        let config = PresenceConfig {
            enabled: true,
            url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
