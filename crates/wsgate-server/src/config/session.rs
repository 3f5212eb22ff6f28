//! Connection lifecycle timing configuration.

use serde::Deserialize;

/// Default handshake completion window in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT: u64 = 10;

/// Default idle timeout in seconds (no frame received).
pub const DEFAULT_IDLE_TIMEOUT: u64 = 300;

/// Default sweep interval in seconds (idle checks, topic GC).
pub const DEFAULT_SWEEP_INTERVAL: u64 = 30;

/// Default shutdown grace period in seconds.
pub const DEFAULT_SHUTDOWN_GRACE: u64 = 5;

/// Connection lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds a client has to complete the WebSocket upgrade.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Seconds without any frame before a connection is proactively closed.
    /// 0 = never.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Seconds between periodic sweeps (idle connections, empty topics).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds to wait for in-flight work to drain on shutdown before
    /// force-closing remaining connections.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT
}
fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT
}
fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL
}
fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl SessionConfig {
    /// Validate the session configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.handshake_timeout_secs == 0 {
            return Err("handshake_timeout_secs must be at least 1".into());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_handshake_timeout_rejected() {
        let config = SessionConfig {
            handshake_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
