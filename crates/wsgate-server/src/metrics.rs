//! Gateway metrics.
//!
//! Atomic counters updated on the hot path and read by the Prometheus
//! endpoint thread. Gauges are incremented/decremented, counters only grow.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for gateway events.
///
/// NOT behind a lock: the worker loop writes, the metrics thread reads.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    /// Currently open connections (gauge).
    pub connections_open: AtomicU64,
    /// Total accepted connections.
    pub connections_total: AtomicU64,
    /// Upgrade handshakes that failed or were rejected.
    pub handshake_failures: AtomicU64,
    /// Currently active subscriptions across all topics (gauge).
    pub subscriptions_active: AtomicU64,
    /// Currently known topics (gauge).
    pub topics_active: AtomicU64,
    /// Total subscribe requests accepted.
    pub subscribes_total: AtomicU64,
    /// Total unsubscribe requests accepted.
    pub unsubscribes_total: AtomicU64,
    /// Publish frames received from local clients.
    pub publishes_received: AtomicU64,
    /// Publishes forwarded in from other workers via the bridge.
    pub remote_publishes: AtomicU64,
    /// Messages handed to subscriber transports.
    pub messages_delivered: AtomicU64,
    /// Deliveries that failed and evicted the subscriber.
    pub delivery_failures: AtomicU64,
    /// Requests rejected with an explicit reject frame.
    pub rejects_total: AtomicU64,
    /// Times the presence bridge dropped to local-only mode.
    pub bridge_degraded_total: AtomicU64,
    /// Connections force-closed at the shutdown deadline.
    pub forced_closes: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.connections_open.fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.connections_open.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn handshake_failed(&self) {
        self.handshake_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn subscribed(&self) {
        self.subscriptions_active.fetch_add(1, Ordering::Relaxed);
        self.subscribes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn unsubscribed(&self, n: u64) {
        self.subscriptions_active.fetch_sub(n, Ordering::Relaxed);
        self.unsubscribes_total.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_topics_active(&self, n: u64) {
        self.topics_active.store(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn publish_received(&self) {
        self.publishes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn remote_publish(&self) {
        self.remote_publishes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn delivered(&self, n: u64) {
        self.messages_delivered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn delivery_failed(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn rejected(&self) {
        self.rejects_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bridge_degraded(&self) {
        self.bridge_degraded_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn forced_close(&self) {
        self.forced_closes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_gauge() {
        let m = GatewayMetrics::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        assert_eq!(m.connections_open.load(Ordering::Relaxed), 1);
        assert_eq!(m.connections_total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_subscription_gauge() {
        let m = GatewayMetrics::new();
        m.subscribed();
        m.subscribed();
        m.subscribed();
        m.unsubscribed(2);
        assert_eq!(m.subscriptions_active.load(Ordering::Relaxed), 1);
        assert_eq!(m.subscribes_total.load(Ordering::Relaxed), 3);
        assert_eq!(m.unsubscribes_total.load(Ordering::Relaxed), 2);
    }
}
