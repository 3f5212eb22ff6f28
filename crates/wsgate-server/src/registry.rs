//! Topic registry: the in-process source of truth for which connections
//! are subscribed to which topics.
//!
//! Owned and mutated exclusively by the worker's loop thread; no locking.
//! Cross-worker visibility is the presence bridge's job, not this module's.

use ahash::{AHashMap, AHashSet};
use mio::Token;

/// A single topic's local state.
struct Topic {
    /// Subscribed connections. No ordering guarantee.
    subscribers: AHashSet<Token>,
    /// Sequence counter stamped on every publish, for ordering diagnostics.
    last_seq: u64,
}

impl Topic {
    fn new() -> Self {
        Self {
            subscribers: AHashSet::new(),
            last_seq: 0,
        }
    }
}

/// In-process topic registry.
///
/// Topics are created lazily on first subscribe or publish and removed by
/// [`TopicRegistry::gc_empty`] once their subscriber set is empty, so a
/// topic can outlive its last subscriber until the next sweep.
#[derive(Default)]
pub struct TopicRegistry {
    topics: AHashMap<String, Topic>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self {
            topics: AHashMap::new(),
        }
    }

    /// Subscribe a connection to a topic. Idempotent: returns true only if
    /// the connection was newly added.
    pub fn subscribe(&mut self, topic: &str, conn: Token) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .subscribers
            .insert(conn)
    }

    /// Unsubscribe a connection from a topic. Idempotent: unsubscribing a
    /// non-member (or an unknown topic) is a no-op returning false.
    pub fn unsubscribe(&mut self, topic: &str, conn: Token) -> bool {
        match self.topics.get_mut(topic) {
            Some(t) => t.subscribers.remove(&conn),
            None => false,
        }
    }

    /// Whether a connection is currently subscribed to a topic.
    pub fn is_subscribed(&self, topic: &str, conn: Token) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|t| t.subscribers.contains(&conn))
    }

    /// Advance and return the topic's sequence counter, creating the topic
    /// lazily. Called once per publish routed through the topic.
    pub fn next_seq(&mut self, topic: &str) -> u64 {
        let t = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new);
        t.last_seq += 1;
        t.last_seq
    }

    /// Snapshot the current subscriber set of a topic.
    ///
    /// Delivery works off this snapshot: connections subscribed after the
    /// call do not receive the message, and the caller skips snapshot
    /// entries that disappear mid-delivery.
    pub fn snapshot(&self, topic: &str) -> Vec<Token> {
        self.topics
            .get(topic)
            .map(|t| t.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove a connection from every topic it is subscribed to.
    /// Returns the topics it was actually removed from.
    pub fn remove_connection(&mut self, conn: Token) -> Vec<String> {
        let mut removed = Vec::new();
        for (name, topic) in self.topics.iter_mut() {
            if topic.subscribers.remove(&conn) {
                removed.push(name.clone());
            }
        }
        removed
    }

    /// Drop topics whose subscriber set is empty. Returns how many were
    /// collected.
    pub fn gc_empty(&mut self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, t| !t.subscribers.is_empty());
        before - self.topics.len()
    }

    /// Number of known topics.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total subscription count across all topics.
    pub fn subscription_count(&self) -> usize {
        self.topics.values().map(|t| t.subscribers.len()).sum()
    }

    /// Iterate topic names with at least one local subscriber.
    #[allow(dead_code)]
    pub fn active_topics(&self) -> impl Iterator<Item = &str> {
        self.topics
            .iter()
            .filter(|(_, t)| !t.subscribers.is_empty())
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut reg = TopicRegistry::new();
        assert!(reg.subscribe("room.lobby", Token(1)));
        assert!(!reg.subscribe("room.lobby", Token(1)));
        assert_eq!(reg.snapshot("room.lobby").len(), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut reg = TopicRegistry::new();
        reg.subscribe("room.lobby", Token(1));
        assert!(reg.unsubscribe("room.lobby", Token(1)));
        assert!(!reg.unsubscribe("room.lobby", Token(1)));
        assert!(!reg.unsubscribe("never.seen", Token(1)));
    }

    #[test]
    fn test_membership_follows_call_parity() {
        let mut reg = TopicRegistry::new();
        reg.subscribe("room.1", Token(7));
        reg.subscribe("room.1", Token(7));
        reg.unsubscribe("room.1", Token(7));
        assert!(!reg.is_subscribed("room.1", Token(7)));

        reg.subscribe("room.1", Token(7));
        assert!(reg.is_subscribed("room.1", Token(7)));
    }

    #[test]
    fn test_snapshot_of_empty_topic() {
        let reg = TopicRegistry::new();
        assert!(reg.snapshot("room.empty").is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut reg = TopicRegistry::new();
        reg.subscribe("room.1", Token(1));
        reg.subscribe("room.1", Token(2));

        let snapshot = reg.snapshot("room.1");
        assert_eq!(snapshot.len(), 2);

        // Mutations after the snapshot do not affect it.
        reg.subscribe("room.1", Token(3));
        reg.unsubscribe("room.1", Token(1));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(reg.snapshot("room.1").len(), 2);
    }

    #[test]
    fn test_remove_connection_clears_all_topics() {
        let mut reg = TopicRegistry::new();
        reg.subscribe("t1", Token(1));
        reg.subscribe("t2", Token(1));
        reg.subscribe("t2", Token(2));

        let mut removed = reg.remove_connection(Token(1));
        removed.sort();
        assert_eq!(removed, vec!["t1".to_string(), "t2".to_string()]);

        // After teardown returns, no snapshot contains the removed token.
        assert!(!reg.snapshot("t1").contains(&Token(1)));
        assert!(!reg.snapshot("t2").contains(&Token(1)));
        assert!(reg.snapshot("t2").contains(&Token(2)));

        // Removing again is a no-op.
        assert!(reg.remove_connection(Token(1)).is_empty());
    }

    #[test]
    fn test_seq_increments_per_topic() {
        let mut reg = TopicRegistry::new();
        assert_eq!(reg.next_seq("a"), 1);
        assert_eq!(reg.next_seq("a"), 2);
        assert_eq!(reg.next_seq("b"), 1);
    }

    #[test]
    fn test_gc_drops_only_empty_topics() {
        let mut reg = TopicRegistry::new();
        reg.subscribe("keep", Token(1));
        reg.subscribe("drop", Token(2));
        reg.unsubscribe("drop", Token(2));
        reg.next_seq("publish-only");

        assert_eq!(reg.topic_count(), 3);
        assert_eq!(reg.gc_empty(), 2);
        assert_eq!(reg.topic_count(), 1);
        assert!(reg.is_subscribed("keep", Token(1)));
    }

    #[test]
    fn test_counts() {
        let mut reg = TopicRegistry::new();
        reg.subscribe("a", Token(1));
        reg.subscribe("a", Token(2));
        reg.subscribe("b", Token(1));
        assert_eq!(reg.topic_count(), 2);
        assert_eq!(reg.subscription_count(), 3);
    }
}
