//! Access control authorization over topic patterns.
//!
//! Role rules use the same pattern shape as routes: dot-separated segments
//! where `{name}` matches any single segment. Patterns additionally support
//! `%s` substitution, replaced by the principal's subject before matching,
//! so a rule like `inbox.%s` grants each user their own topic.

use ahash::AHashMap;

use super::{Access, AuthResult, Authorizer, Principal};
use crate::config::AclConfig;

/// Compiled patterns for a role.
struct CompiledRole {
    publish: Vec<String>,
    subscribe: Vec<String>,
}

/// Authorizer that checks topic access against configured roles.
pub struct AclAuthorizer {
    /// Role name -> compiled patterns.
    roles: AHashMap<String, CompiledRole>,
    /// Patterns for authenticated principals without a matching role.
    default_publish: Vec<String>,
    default_subscribe: Vec<String>,
    /// Patterns for anonymous principals.
    anonymous_publish: Vec<String>,
    anonymous_subscribe: Vec<String>,
}

impl AclAuthorizer {
    pub fn new(config: &AclConfig) -> Self {
        let mut roles = AHashMap::with_capacity(config.roles.len());

        for role in &config.roles {
            roles.insert(
                role.name.clone(),
                CompiledRole {
                    publish: role.publish.clone(),
                    subscribe: role.subscribe.clone(),
                },
            );
        }

        Self {
            roles,
            default_publish: config.default.publish.clone(),
            default_subscribe: config.default.subscribe.clone(),
            anonymous_publish: config.anonymous.publish.clone(),
            anonymous_subscribe: config.anonymous.subscribe.clone(),
        }
    }

    fn patterns(&self, principal: &Principal, access: Access) -> &[String] {
        if principal.is_anonymous {
            return match access {
                Access::Publish => &self.anonymous_publish,
                Access::Subscribe => &self.anonymous_subscribe,
            };
        }

        if let Some(ref role_name) = principal.role {
            if let Some(role) = self.roles.get(role_name) {
                return match access {
                    Access::Publish => &role.publish,
                    Access::Subscribe => &role.subscribe,
                };
            }
        }

        match access {
            Access::Publish => &self.default_publish,
            Access::Subscribe => &self.default_subscribe,
        }
    }
}

impl Authorizer for AclAuthorizer {
    fn authorize(&self, principal: &Principal, topic: &str, access: Access) -> AuthResult {
        for pattern in self.patterns(principal, access) {
            let expanded = substitute_subject(pattern, &principal.subject);
            if topic_matches_pattern(topic, &expanded) {
                return AuthResult::Allow;
            }
        }
        AuthResult::DenyNotAuthorized
    }
}

/// Replace `%s` with the principal's subject.
fn substitute_subject(pattern: &str, subject: &str) -> String {
    if pattern.contains("%s") {
        pattern.replace("%s", subject)
    } else {
        pattern.to_string()
    }
}

/// Check if a concrete topic matches an access pattern.
///
/// `{name}` segments match any single topic segment; everything else must
/// match literally. Segment counts must be equal.
pub fn topic_matches_pattern(topic: &str, pattern: &str) -> bool {
    let mut topic_segs = topic.split('.');
    let mut pattern_segs = pattern.split('.');

    loop {
        match (topic_segs.next(), pattern_segs.next()) {
            (None, None) => return true,
            (Some(t), Some(p)) => {
                let is_wildcard = p.starts_with('{') && p.ends_with('}');
                if !is_wildcard && t != p {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AclConfig, AclPermissions, RoleConfig};

    fn acl() -> AclAuthorizer {
        AclAuthorizer::new(&AclConfig {
            enabled: true,
            roles: vec![RoleConfig {
                name: "ops".into(),
                publish: vec!["alerts.{level}".into()],
                subscribe: vec!["alerts.{level}".into(), "metrics.{node}".into()],
            }],
            default: AclPermissions {
                publish: vec!["inbox.%s".into()],
                subscribe: vec!["inbox.%s".into(), "broadcast".into()],
            },
            anonymous: AclPermissions {
                publish: vec![],
                subscribe: vec!["broadcast".into()],
            },
        })
    }

    #[test]
    fn test_pattern_matching() {
        assert!(topic_matches_pattern("room.lobby", "room.lobby"));
        assert!(topic_matches_pattern("room.lobby", "room.{id}"));
        assert!(!topic_matches_pattern("room.lobby.users", "room.{id}"));
        assert!(!topic_matches_pattern("room", "room.{id}"));
        assert!(!topic_matches_pattern("hall.lobby", "room.{id}"));
    }

    #[test]
    fn test_role_permissions() {
        let acl = acl();
        let ops = Principal::authenticated("carol".into(), Some("ops".into()));

        assert!(acl.authorize(&ops, "alerts.critical", Access::Publish).is_allowed());
        assert!(acl.authorize(&ops, "metrics.node7", Access::Subscribe).is_allowed());
        assert!(!acl.authorize(&ops, "metrics.node7", Access::Publish).is_allowed());
    }

    #[test]
    fn test_subject_substitution() {
        let acl = acl();
        let user = Principal::authenticated("dave".into(), None);

        assert!(acl.authorize(&user, "inbox.dave", Access::Publish).is_allowed());
        assert!(!acl.authorize(&user, "inbox.erin", Access::Publish).is_allowed());
    }

    #[test]
    fn test_anonymous_permissions() {
        let acl = acl();
        let anon = Principal::anonymous();

        assert!(acl.authorize(&anon, "broadcast", Access::Subscribe).is_allowed());
        assert!(!acl.authorize(&anon, "broadcast", Access::Publish).is_allowed());
        assert!(!acl.authorize(&anon, "inbox.anonymous", Access::Subscribe).is_allowed());
    }
}
