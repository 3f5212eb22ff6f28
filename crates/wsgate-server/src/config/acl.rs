//! Access control configuration.

use serde::Deserialize;

/// Topic patterns a role may act on.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AclPermissions {
    /// Patterns the role can publish to.
    pub publish: Vec<String>,
    /// Patterns the role can subscribe to.
    pub subscribe: Vec<String>,
}

/// Permissions for a named role.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    /// Role name, matched against the principal's role.
    pub name: String,
    #[serde(default)]
    pub publish: Vec<String>,
    #[serde(default)]
    pub subscribe: Vec<String>,
}

/// Access control configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Enable per-topic authorization checks.
    pub enabled: bool,
    /// Named roles.
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
    /// Permissions for authenticated principals without a matching role.
    #[serde(default)]
    pub default: AclPermissions,
    /// Permissions for anonymous principals.
    #[serde(default)]
    pub anonymous: AclPermissions,
}
