//! Static token authentication from configuration.
//!
//! Supports plaintext tokens (for development) and argon2 hashes (for
//! production).
//!
//! Generate token hashes with:
//! ```bash
//! echo -n "token" | argon2 $(openssl rand -base64 16) -id -e
//! ```

use ahash::AHashMap;
use argon2::{Argon2, PasswordHash, PasswordVerifier};

use super::{AuthResult, Authenticator, HandshakeContext, Principal};
use crate::config::AuthConfig;

/// A user entry with pre-processed credentials.
struct User {
    /// Subject identity granted on a successful match.
    subject: String,
    /// Role for authorization lookups.
    role: Option<String>,
}

/// Static authenticator that validates bearer tokens against a configured
/// user list.
pub struct StaticAuthenticator {
    /// Plaintext token -> user. Development only.
    plain: AHashMap<String, User>,
    /// Argon2 PHC hash -> user. Checked when no plaintext match exists.
    hashed: Vec<(String, User)>,
}

impl StaticAuthenticator {
    /// Create a new static authenticator from config.
    pub fn new(config: &AuthConfig) -> Self {
        let mut plain = AHashMap::with_capacity(config.users.len());
        let mut hashed = Vec::new();

        for user in &config.users {
            let entry = User {
                subject: user.subject.clone(),
                role: user.role.clone(),
            };
            if let Some(ref token) = user.token {
                plain.insert(token.clone(), entry);
            } else if let Some(ref hash) = user.token_hash {
                hashed.push((hash.clone(), entry));
            } else {
                log::warn!(
                    "auth user '{}' has neither token nor token_hash, ignoring",
                    user.subject
                );
            }
        }

        Self { plain, hashed }
    }

    /// Verify a presented token against an argon2 hash in PHC format.
    fn verify_argon2(hash_str: &str, token: &[u8]) -> bool {
        let Ok(parsed_hash) = PasswordHash::new(hash_str) else {
            log::warn!("Invalid argon2 hash format in auth config");
            return false;
        };

        Argon2::default().verify_password(token, &parsed_hash).is_ok()
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, ctx: &HandshakeContext) -> (AuthResult, Option<Principal>) {
        let Some(token) = ctx.token else {
            return (AuthResult::DenyBadCredentials, None);
        };

        if let Some(user) = self.plain.get(token) {
            return (
                AuthResult::Allow,
                Some(Principal::authenticated(
                    user.subject.clone(),
                    user.role.clone(),
                )),
            );
        }

        for (hash, user) in &self.hashed {
            if Self::verify_argon2(hash, token.as_bytes()) {
                return (
                    AuthResult::Allow,
                    Some(Principal::authenticated(
                        user.subject.clone(),
                        user.role.clone(),
                    )),
                );
            }
        }

        (AuthResult::DenyBadCredentials, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UserConfig;

    fn config(users: Vec<UserConfig>) -> AuthConfig {
        AuthConfig {
            enabled: true,
            allow_anonymous: false,
            users,
        }
    }

    fn ctx(token: Option<&str>) -> HandshakeContext<'_> {
        HandshakeContext {
            token,
            remote_addr: "127.0.0.1:1234".parse().unwrap(),
        }
    }

    #[test]
    fn test_plaintext_token_match() {
        let auth = StaticAuthenticator::new(&config(vec![UserConfig {
            subject: "alice".into(),
            token: Some("secret-token".into()),
            token_hash: None,
            role: Some("ops".into()),
        }]));

        let (result, principal) = auth.authenticate(&ctx(Some("secret-token")));
        assert!(result.is_allowed());
        let principal = principal.unwrap();
        assert_eq!(principal.subject, "alice");
        assert_eq!(principal.role.as_deref(), Some("ops"));
        assert!(!principal.is_anonymous);
    }

    #[test]
    fn test_wrong_token_denied() {
        let auth = StaticAuthenticator::new(&config(vec![UserConfig {
            subject: "alice".into(),
            token: Some("secret-token".into()),
            token_hash: None,
            role: None,
        }]));

        let (result, principal) = auth.authenticate(&ctx(Some("wrong")));
        assert_eq!(result, AuthResult::DenyBadCredentials);
        assert!(principal.is_none());
    }

    #[test]
    fn test_missing_token_denied() {
        let auth = StaticAuthenticator::new(&config(vec![]));
        let (result, _) = auth.authenticate(&ctx(None));
        assert_eq!(result, AuthResult::DenyBadCredentials);
    }
}
