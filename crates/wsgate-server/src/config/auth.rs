//! Authentication configuration.

use serde::Deserialize;

/// A configured user with bearer-token credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    /// Subject identity granted on a successful match.
    pub subject: String,
    /// Plaintext token. Use only for development.
    #[serde(default)]
    pub token: Option<String>,
    /// Argon2 token hash in PHC string format (recommended for production).
    #[serde(default)]
    pub token_hash: Option<String>,
    /// Role for authorization lookups.
    #[serde(default)]
    pub role: Option<String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable bearer-token authentication on the upgrade handshake.
    pub enabled: bool,
    /// Allow connections that present no token when auth is enabled.
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
    /// Configured users.
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

fn default_true() -> bool {
    true
}
