//! Topic route table with deterministic pattern matching.
//!
//! Routes are compiled once at startup from config and never mutated while
//! matching is in progress. A pattern is a dot-separated list of segments;
//! `{name}` captures exactly one segment. Matching picks the most specific
//! route: at each position a literal segment outranks a parameter, and ties
//! are broken by registration order (first registered wins).

use ahash::AHashMap;

use wsgate_core::envelope::Action;
use wsgate_core::topic;

use crate::config::RouteConfig;

/// One compiled pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A compiled route: pattern plus the capabilities it binds.
#[derive(Debug, Clone)]
pub struct Route {
    /// Original pattern string, for logging.
    pub pattern: String,
    segments: Vec<Segment>,
    /// Whether subscribe/unsubscribe requests may use this route.
    pub subscribe: bool,
    /// Whether publish requests may use this route.
    pub publish: bool,
    /// Registration order, used as the final tie-break.
    index: usize,
}

impl Route {
    /// Whether this route accepts the given action.
    fn allows(&self, action: Action) -> bool {
        match action {
            Action::Subscribe | Action::Unsubscribe => self.subscribe,
            Action::Publish => self.publish,
        }
    }
}

/// Named captures extracted from a matched topic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Look up a captured segment by parameter name.
    #[allow(dead_code)] // Capture access for downstream handlers
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Compile a pattern string into segments.
///
/// Returns an error on empty segments, malformed or duplicate parameter
/// names, or invalid characters in literal segments.
fn compile_pattern(pattern: &str) -> Result<Vec<Segment>, String> {
    if pattern.is_empty() {
        return Err("empty route pattern".into());
    }

    let mut segments = Vec::new();
    let mut seen_params: AHashMap<&str, ()> = AHashMap::new();

    for raw in topic::segments(pattern) {
        if raw.is_empty() {
            return Err(format!("empty segment in pattern '{}'", pattern));
        }

        if let Some(name) = raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            if name.is_empty() {
                return Err(format!("empty parameter name in pattern '{}'", pattern));
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(format!(
                    "invalid parameter name '{}' in pattern '{}'",
                    name, pattern
                ));
            }
            if seen_params.insert(name, ()).is_some() {
                return Err(format!(
                    "duplicate parameter '{}' in pattern '{}'",
                    name, pattern
                ));
            }
            segments.push(Segment::Param(name.to_string()));
        } else {
            if !raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(format!(
                    "invalid literal segment '{}' in pattern '{}'",
                    raw, pattern
                ));
            }
            segments.push(Segment::Literal(raw.to_string()));
        }
    }

    Ok(segments)
}

/// Immutable route table built at startup.
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Compile all configured routes. Order of the config is the
    /// registration order.
    pub fn new(configs: &[RouteConfig]) -> Result<Self, String> {
        let mut routes = Vec::with_capacity(configs.len());
        for (index, rc) in configs.iter().enumerate() {
            let segments = compile_pattern(&rc.pattern)?;
            if !rc.subscribe && !rc.publish {
                return Err(format!(
                    "route '{}' allows neither subscribe nor publish",
                    rc.pattern
                ));
            }
            routes.push(Route {
                pattern: rc.pattern.clone(),
                segments,
                subscribe: rc.subscribe,
                publish: rc.publish,
                index,
            });
        }
        Ok(Self { routes })
    }

    /// Number of compiled routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Match a topic name and action against the table.
    ///
    /// Pure: no side effects. Returns the single best route and its
    /// extracted parameters, or None if no route accepts the action on a
    /// matching pattern.
    pub fn match_topic(&self, topic_name: &str, action: Action) -> Option<(&Route, Params)> {
        let topic_segs: Vec<&str> = topic::segments(topic_name).collect();

        // Specificity key: one entry per position, literal=0 / param=1.
        // Lexicographic comparison yields literal-beats-param leftmost-first;
        // strictly-less keeps the first-registered route on full ties.
        let mut best: Option<(&Route, Vec<u8>)> = None;

        for route in &self.routes {
            if !route.allows(action) {
                continue;
            }
            if route.segments.len() != topic_segs.len() {
                continue;
            }

            let mut key = Vec::with_capacity(route.segments.len());
            let mut matched = true;
            for (seg, topic_seg) in route.segments.iter().zip(&topic_segs) {
                match seg {
                    Segment::Literal(lit) => {
                        if lit != topic_seg {
                            matched = false;
                            break;
                        }
                        key.push(0u8);
                    }
                    Segment::Param(_) => key.push(1u8),
                }
            }
            if !matched {
                continue;
            }

            match &best {
                Some((_, best_key)) if key >= *best_key => {}
                _ => best = Some((route, key)),
            }
        }

        best.map(|(route, _)| {
            let mut params = Vec::new();
            for (seg, topic_seg) in route.segments.iter().zip(&topic_segs) {
                if let Segment::Param(name) = seg {
                    params.push((name.clone(), (*topic_seg).to_string()));
                }
            }
            (route, Params(params))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str) -> RouteConfig {
        RouteConfig {
            pattern: pattern.to_string(),
            subscribe: true,
            publish: true,
        }
    }

    fn table(patterns: &[&str]) -> RouteTable {
        let configs: Vec<RouteConfig> = patterns.iter().map(|p| route(p)).collect();
        RouteTable::new(&configs).unwrap()
    }

    #[test]
    fn test_literal_match() {
        let table = table(&["room.lobby"]);
        let (matched, params) = table.match_topic("room.lobby", Action::Subscribe).unwrap();
        assert_eq!(matched.pattern, "room.lobby");
        assert!(params.is_empty());
    }

    #[test]
    fn test_param_extraction() {
        let table = table(&["room.{id}.user.{name}"]);
        let (_, params) = table
            .match_topic("room.42.user.alice", Action::Publish)
            .unwrap();
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("name"), Some("alice"));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn test_literal_beats_param() {
        // Param registered first: the literal still wins.
        let table_param_first = table(&["room.{id}", "room.lobby"]);
        let (matched, _) = table_param_first
            .match_topic("room.lobby", Action::Subscribe)
            .unwrap();
        assert_eq!(matched.pattern, "room.lobby");

        // And registered the other way around.
        let table = table(&["room.lobby", "room.{id}"]);
        let (matched, _) = table.match_topic("room.lobby", Action::Subscribe).unwrap();
        assert_eq!(matched.pattern, "room.lobby");

        // Non-literal topics still fall through to the param route.
        let (matched, params) = table.match_topic("room.42", Action::Subscribe).unwrap();
        assert_eq!(matched.pattern, "room.{id}");
        assert_eq!(params.get("id"), Some("42"));
    }

    #[test]
    fn test_leftmost_literal_wins() {
        let table = table(&["{a}.lobby", "room.{b}"]);
        let (matched, _) = table.match_topic("room.lobby", Action::Subscribe).unwrap();
        assert_eq!(matched.pattern, "room.{b}");
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let table = table(&["room.{a}", "room.{b}"]);
        let (matched, _) = table.match_topic("room.42", Action::Subscribe).unwrap();
        assert_eq!(matched.pattern, "room.{a}");
    }

    #[test]
    fn test_no_match() {
        let table = table(&["room.{id}"]);
        assert!(table.match_topic("hall.42", Action::Subscribe).is_none());
        assert!(table.match_topic("room", Action::Subscribe).is_none());
        assert!(table
            .match_topic("room.42.extra", Action::Subscribe)
            .is_none());
    }

    #[test]
    fn test_action_capability_filtering() {
        let configs = vec![
            RouteConfig {
                pattern: "alerts.{level}".into(),
                subscribe: true,
                publish: false,
            },
            RouteConfig {
                pattern: "commands.{name}".into(),
                subscribe: false,
                publish: true,
            },
        ];
        let table = RouteTable::new(&configs).unwrap();

        assert!(table
            .match_topic("alerts.critical", Action::Subscribe)
            .is_some());
        assert!(table
            .match_topic("alerts.critical", Action::Unsubscribe)
            .is_some());
        assert!(table
            .match_topic("alerts.critical", Action::Publish)
            .is_none());

        assert!(table
            .match_topic("commands.restart", Action::Publish)
            .is_some());
        assert!(table
            .match_topic("commands.restart", Action::Subscribe)
            .is_none());
    }

    #[test]
    fn test_capability_falls_through_to_next_route() {
        // A subscribe-only route must not shadow a publish-capable one.
        let configs = vec![
            RouteConfig {
                pattern: "feed.main".into(),
                subscribe: true,
                publish: false,
            },
            RouteConfig {
                pattern: "feed.{name}".into(),
                subscribe: true,
                publish: true,
            },
        ];
        let table = RouteTable::new(&configs).unwrap();

        let (matched, _) = table.match_topic("feed.main", Action::Publish).unwrap();
        assert_eq!(matched.pattern, "feed.{name}");

        let (matched, _) = table.match_topic("feed.main", Action::Subscribe).unwrap();
        assert_eq!(matched.pattern, "feed.main");
    }

    #[test]
    fn test_compile_errors() {
        assert!(RouteTable::new(&[route("")]).is_err());
        assert!(RouteTable::new(&[route("room..lobby")]).is_err());
        assert!(RouteTable::new(&[route("room.{}")]).is_err());
        assert!(RouteTable::new(&[route("room.{id}.{id}")]).is_err());
        assert!(RouteTable::new(&[route("room.{bad name}")]).is_err());
        assert!(RouteTable::new(&[route("room.lob by")]).is_err());
    }

    #[test]
    fn test_route_without_capabilities_rejected() {
        let configs = vec![RouteConfig {
            pattern: "dead.route".into(),
            subscribe: false,
            publish: false,
        }];
        assert!(RouteTable::new(&configs).is_err());
    }
}
