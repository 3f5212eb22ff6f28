//! Gateway configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `wsgate.toml`)
//! - Environment variables with `WSGATE__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `WSGATE__SERVER__BIND=0.0.0.0:9301`
//! - `WSGATE__PRESENCE__URL=redis://cache:6379`
//! - `WSGATE__LOG__LEVEL=debug`

mod acl;
mod auth;
mod limits;
mod log;
mod presence;
mod prometheus;
mod routes;
mod server;
mod session;
mod websocket;

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use acl::{AclConfig, AclPermissions, RoleConfig};
pub use auth::{AuthConfig, UserConfig};
pub use limits::{
    LimitsConfig, DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_SUBSCRIPTIONS,
    DEFAULT_MAX_TOPIC_LENGTH, DEFAULT_MAX_TOPIC_SEGMENTS, DEFAULT_WRITE_BUFFER_SIZE,
};
pub use log::LogConfig;
pub use presence::{PresenceConfig, DEFAULT_PRESENCE_CHANNEL, DEFAULT_PRESENCE_URL};
pub use prometheus::{PrometheusConfig, DEFAULT_PROMETHEUS_BIND};
pub use routes::RouteConfig;
pub use server::ServerConfig;
pub use session::{
    SessionConfig, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_SHUTDOWN_GRACE,
    DEFAULT_SWEEP_INTERVAL,
};
pub use websocket::WebSocketConfig;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Server configuration.
    pub server: ServerConfig,
    /// Limits configuration.
    pub limits: LimitsConfig,
    /// Connection lifecycle configuration.
    pub session: SessionConfig,
    /// WebSocket upgrade configuration.
    pub websocket: WebSocketConfig,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Access control configuration.
    pub acl: AclConfig,
    /// Topic route declarations.
    #[serde(default)]
    pub route: Vec<RouteConfig>,
    /// Presence bridge configuration.
    pub presence: PresenceConfig,
    /// Prometheus metrics configuration.
    pub prometheus: PrometheusConfig,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// Config parsing/loading error.
    Config(config::ConfigError),
    /// Invalid configuration value.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `WSGATE__` prefix with double underscores for nesting:
    ///    - `WSGATE__SERVER__BIND=0.0.0.0:9301`
    ///    - `WSGATE__SESSION__IDLE_TIMEOUT_SECS=120`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default("server.bind", "0.0.0.0:9300")?
            .set_default("server.worker_id", "")?
            .set_default("limits.max_frame_size", DEFAULT_MAX_FRAME_SIZE as i64)?
            .set_default("limits.max_topic_length", DEFAULT_MAX_TOPIC_LENGTH as i64)?
            .set_default(
                "limits.max_topic_segments",
                DEFAULT_MAX_TOPIC_SEGMENTS as i64,
            )?
            .set_default("limits.max_subscriptions", DEFAULT_MAX_SUBSCRIPTIONS as i64)?
            .set_default("limits.write_buffer_size", DEFAULT_WRITE_BUFFER_SIZE as i64)?
            .set_default("limits.max_connections", DEFAULT_MAX_CONNECTIONS as i64)?
            .set_default(
                "session.handshake_timeout_secs",
                DEFAULT_HANDSHAKE_TIMEOUT as i64,
            )?
            .set_default("session.idle_timeout_secs", DEFAULT_IDLE_TIMEOUT as i64)?
            .set_default("session.sweep_interval_secs", DEFAULT_SWEEP_INTERVAL as i64)?
            .set_default("session.shutdown_grace_secs", DEFAULT_SHUTDOWN_GRACE as i64)?
            .set_default("websocket.path", "")?
            // Auth defaults (disabled by default)
            .set_default("auth.enabled", false)?
            .set_default("auth.allow_anonymous", true)?
            // ACL defaults (disabled by default)
            .set_default("acl.enabled", false)?
            // Presence defaults (disabled by default)
            .set_default("presence.enabled", false)?
            .set_default("presence.url", DEFAULT_PRESENCE_URL)?
            .set_default("presence.channel", DEFAULT_PRESENCE_CHANNEL)?
            // Prometheus defaults (disabled by default)
            .set_default("prometheus.enabled", false)?
            .set_default("prometheus.bind", DEFAULT_PROMETHEUS_BIND)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let substituted = substitute_env_vars(&content);
                    builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
                }
                Err(e) => return Err(ConfigError::Io(e)),
            }
        }

        // Override with environment variables (WSGATE__SERVER__BIND, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("WSGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (for testing).
    #[allow(dead_code)]
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content);
        let config: Config = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate().map_err(ConfigError::Validation)?;
        self.session.validate().map_err(ConfigError::Validation)?;
        self.presence.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[log]
level = "debug"

[server]
bind = "127.0.0.1:9301"
worker_id = "gw-a"

[limits]
max_frame_size = 65536
max_topic_segments = 8

[session]
idle_timeout_secs = 120
shutdown_grace_secs = 2

[[route]]
pattern = "room.{id}"

[[route]]
pattern = "alerts.{level}"
publish = false
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.server.bind.port(), 9301);
        assert_eq!(config.server.worker_id, "gw-a");
        assert_eq!(config.limits.max_frame_size, 65536);
        assert_eq!(config.limits.max_topic_segments, 8);
        assert_eq!(config.session.idle_timeout_secs, 120);
        assert_eq!(config.session.shutdown_grace_secs, 2);
        assert_eq!(config.route.len(), 2);
        assert_eq!(config.route[0].pattern, "room.{id}");
        assert!(config.route[0].publish);
        assert!(!config.route[1].publish);
    }

    #[test]
    fn test_parse_partial_toml() {
        // Only override some values, rest should use defaults
        let toml = r#"
[limits]
max_frame_size = 8192
"#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.limits.max_frame_size, 8192);
        assert_eq!(config.limits.max_topic_length, DEFAULT_MAX_TOPIC_LENGTH);
        assert_eq!(config.server.bind.port(), 9300);
        assert_eq!(
            config.session.handshake_timeout_secs,
            DEFAULT_HANDSHAKE_TIMEOUT
        );
    }

    #[test]
    fn test_parse_presence() {
        let toml = r#"
[presence]
enabled = true
url = "redis://cache:6379"
channel = "gw:fanout"
reconcile_interval_secs = 5
"#;
        let config = Config::parse(toml).unwrap();
        assert!(config.presence.enabled);
        assert_eq!(config.presence.url, "redis://cache:6379");
        assert_eq!(config.presence.channel, "gw:fanout");
        assert_eq!(config.presence.reconcile_interval_secs, 5);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("TEST_WSGATE_PORT", "9355");
        let content = r#"
[server]
bind = "0.0.0.0:${TEST_WSGATE_PORT}"
"#;
        let substituted = substitute_env_vars(content);
        assert!(substituted.contains("0.0.0.0:9355"));
        std::env::remove_var("TEST_WSGATE_PORT");
    }

    #[test]
    fn test_env_var_substitution_with_default() {
        std::env::remove_var("NONEXISTENT_VAR");
        let content = r#"bind = "${NONEXISTENT_VAR:-0.0.0.0:9300}""#;
        let substituted = substitute_env_vars(content);
        assert!(substituted.contains("0.0.0.0:9300"));
    }

    #[test]
    fn test_parse_auth_users() {
        let toml = r#"
[auth]
enabled = true
allow_anonymous = false

[[auth.users]]
subject = "alice"
token = "dev-token"
role = "ops"
"#;
        let config = Config::parse(toml).unwrap();
        assert!(config.auth.enabled);
        assert!(!config.auth.allow_anonymous);
        assert_eq!(config.auth.users.len(), 1);
        assert_eq!(config.auth.users[0].subject, "alice");
        assert_eq!(config.auth.users[0].role.as_deref(), Some("ops"));
    }
}
