//! Authentication and authorization module.
//!
//! This module provides traits and implementations for:
//! - Authentication: mapping upgrade-handshake credentials to a principal
//! - Authorization: checking subscribe/publish permissions per topic
//!
//! Both traits are the seam to the external authorization collaborator;
//! the static implementations here are config-driven stand-ins with the
//! same contract. The design prioritizes zero overhead when auth is
//! disabled and minimal overhead on the publish/subscribe hot path.

mod acl;
mod static_auth;

pub use acl::AclAuthorizer;
pub use static_auth::StaticAuthenticator;

use std::net::SocketAddr;

use crate::config::Config;

/// Result of an authentication or authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthResult {
    /// Access granted.
    Allow,
    /// Access denied - bad credentials.
    DenyBadCredentials,
    /// Access denied - not authorized for this action.
    DenyNotAuthorized,
}

impl AuthResult {
    /// Returns true if access is allowed.
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, AuthResult::Allow)
    }
}

/// Access type for authorization checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Publishing to a topic.
    Publish,
    /// Subscribing to a topic.
    Subscribe,
}

/// Credentials presented during the WebSocket upgrade.
#[derive(Debug)]
pub struct HandshakeContext<'a> {
    /// Bearer token from the Authorization header or `token` query parameter.
    pub token: Option<&'a str>,
    /// Client's remote address.
    pub remote_addr: SocketAddr,
}

/// An authenticated identity attached to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable subject identifier.
    pub subject: String,
    /// Role assigned during authentication, used for authorization lookups.
    pub role: Option<String>,
    /// Whether this is an anonymous (unauthenticated) connection.
    pub is_anonymous: bool,
}

impl Principal {
    /// Principal for a connection that presented no credentials.
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            role: None,
            is_anonymous: true,
        }
    }

    pub fn authenticated(subject: String, role: Option<String>) -> Self {
        Self {
            subject,
            role,
            is_anonymous: false,
        }
    }
}

/// Authentication trait - validates handshake credentials.
///
/// Implementations must be thread-safe; authentication runs on the accept
/// path while the authorizer is consulted from the event loop.
pub trait Authenticator: Send + Sync + 'static {
    /// Authenticate an upgrade request.
    ///
    /// Returns `AuthResult::Allow` with the resolved principal on success.
    fn authenticate(&self, ctx: &HandshakeContext) -> (AuthResult, Option<Principal>);
}

/// Authorization trait - checks subscribe/publish permissions.
///
/// Checks happen on the hot path, so implementations should be fast.
pub trait Authorizer: Send + Sync + 'static {
    /// Check whether a principal may perform `access` on `topic`.
    fn authorize(&self, principal: &Principal, topic: &str, access: Access) -> AuthResult;
}

/// No-op authenticator that allows all connections.
#[derive(Debug, Clone, Default)]
pub struct AllowAllAuth;

impl Authenticator for AllowAllAuth {
    #[inline]
    fn authenticate(&self, _ctx: &HandshakeContext) -> (AuthResult, Option<Principal>) {
        (AuthResult::Allow, None)
    }
}

/// No-op authorizer that allows all operations.
#[derive(Debug, Clone, Default)]
pub struct AllowAllAcl;

impl Authorizer for AllowAllAcl {
    #[inline]
    fn authorize(&self, _principal: &Principal, _topic: &str, _access: Access) -> AuthResult {
        AuthResult::Allow
    }
}

/// Combined auth provider handed to the worker and the accept path.
pub struct AuthProvider {
    pub authenticator: Box<dyn Authenticator>,
    pub authorizer: Box<dyn Authorizer>,
    /// Whether authentication is enabled.
    pub auth_enabled: bool,
    /// Whether to allow anonymous connections when auth is enabled.
    pub allow_anonymous: bool,
    /// Whether ACL checks are enabled.
    pub acl_enabled: bool,
}

impl AuthProvider {
    /// Create a provider with all auth disabled (allow everything).
    pub fn allow_all() -> Self {
        Self {
            authenticator: Box::new(AllowAllAuth),
            authorizer: Box::new(AllowAllAcl),
            auth_enabled: false,
            allow_anonymous: true,
            acl_enabled: false,
        }
    }

    /// Create from configuration.
    pub fn from_config(config: &Config) -> Self {
        let (authenticator, auth_enabled, allow_anonymous): (Box<dyn Authenticator>, bool, bool) =
            if config.auth.enabled {
                (
                    Box::new(StaticAuthenticator::new(&config.auth)),
                    true,
                    config.auth.allow_anonymous,
                )
            } else {
                (Box::new(AllowAllAuth), false, true)
            };

        let (authorizer, acl_enabled): (Box<dyn Authorizer>, bool) = if config.acl.enabled {
            (Box::new(AclAuthorizer::new(&config.acl)), true)
        } else {
            (Box::new(AllowAllAcl), false)
        };

        Self {
            authenticator,
            authorizer,
            auth_enabled,
            allow_anonymous,
            acl_enabled,
        }
    }

    /// Authenticate an upgrade request. Returns the principal to attach to
    /// the connection on success.
    pub fn authenticate(&self, ctx: &HandshakeContext) -> (AuthResult, Option<Principal>) {
        if !self.auth_enabled {
            return (AuthResult::Allow, None);
        }

        if ctx.token.is_none() {
            if self.allow_anonymous {
                return (AuthResult::Allow, Some(Principal::anonymous()));
            }
            return (AuthResult::DenyNotAuthorized, None);
        }

        self.authenticator.authenticate(ctx)
    }

    /// Check whether a principal may perform `access` on `topic`.
    #[inline]
    pub fn authorize(&self, principal: Option<&Principal>, topic: &str, access: Access) -> AuthResult {
        if !self.acl_enabled {
            return AuthResult::Allow;
        }
        let anonymous = Principal::anonymous();
        let principal = principal.unwrap_or(&anonymous);
        self.authorizer.authorize(principal, topic, access)
    }
}

impl Default for AuthProvider {
    fn default() -> Self {
        Self::allow_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(token: Option<&str>) -> HandshakeContext<'_> {
        HandshakeContext {
            token,
            remote_addr: "127.0.0.1:1234".parse().unwrap(),
        }
    }

    #[test]
    fn test_allow_all_provider() {
        let provider = AuthProvider::allow_all();
        let (result, principal) = provider.authenticate(&ctx(None));
        assert!(result.is_allowed());
        assert!(principal.is_none());
        assert!(provider
            .authorize(None, "room.lobby", Access::Publish)
            .is_allowed());
    }

    #[test]
    fn test_anonymous_denied_when_not_allowed() {
        let provider = AuthProvider {
            authenticator: Box::new(AllowAllAuth),
            authorizer: Box::new(AllowAllAcl),
            auth_enabled: true,
            allow_anonymous: false,
            acl_enabled: false,
        };
        let (result, _) = provider.authenticate(&ctx(None));
        assert_eq!(result, AuthResult::DenyNotAuthorized);
    }

    #[test]
    fn test_anonymous_principal_when_allowed() {
        let provider = AuthProvider {
            authenticator: Box::new(AllowAllAuth),
            authorizer: Box::new(AllowAllAcl),
            auth_enabled: true,
            allow_anonymous: true,
            acl_enabled: false,
        };
        let (result, principal) = provider.authenticate(&ctx(None));
        assert!(result.is_allowed());
        assert_eq!(principal, Some(Principal::anonymous()));
    }
}
