//! Presence bridge: cross-worker topic membership and publish fanout.
//!
//! Runs in a dedicated thread with blocking Redis I/O so the event loop
//! never waits on the cache. The worker talks to it through a pair of
//! crossbeam channels: registry deltas and publishes flow in, remote
//! publishes and link-state changes flow out.
//!
//! Presence schema: hash `presence:{topic}`, field `{worker}:{conn}`, value
//! a JSON record with a per-worker monotonic version. Each worker only ever
//! writes fields tagged with its own id, so reconciliation is last-writer-
//! wins per field with no cross-worker conflicts. Publishes are fanned out
//! on a Redis pub/sub channel; the origin tag stops a worker from echoing
//! its own messages back into local delivery.
//!
//! Redis being unreachable degrades the gateway to local-only delivery.
//! The link is retried with exponential backoff, and on reconnect the full
//! local membership is re-upserted. Publishes missed during an outage are
//! not replayed.

use std::thread;
use std::time::{Duration, Instant};

use ahash::{AHashMap, AHashSet};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use redis::Commands;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PresenceConfig;

/// Channel capacity for bridge traffic in both directions.
const CHANNEL_CAPACITY: usize = 8192;

/// Pub/sub read timeout; also bounds op-drain latency.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Timeout for establishing a Redis connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for individual Redis commands.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry deltas and publishes sent from the worker to the bridge.
pub enum PresenceOp {
    /// A connection subscribed to a topic.
    Subscribe { topic: String, conn: u64 },
    /// A connection unsubscribed from a topic.
    Unsubscribe { topic: String, conn: u64 },
    /// A connection closed; remove it from all listed topics.
    RemoveConnection { conn: u64, topics: Vec<String> },
    /// A locally-originated publish to fan out to other workers.
    Publish {
        topic: String,
        payload: Value,
        seq: u64,
    },
    /// Drain and stop the bridge thread.
    Shutdown,
}

/// Events sent from the bridge to the worker.
pub enum BridgeEvent {
    /// A publish that originated on another worker.
    RemotePublish { topic: String, payload: Value },
    /// The cache link was lost; the gateway is in local-only mode.
    Degraded { reason: String },
    /// The cache link was re-established.
    Restored,
}

/// Cache-resident membership record for one (worker, connection) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub worker_id: String,
    pub connection_id: u64,
    pub version: u64,
}

/// Wire format for cross-worker publishes on the fanout channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEnvelope {
    pub origin: String,
    pub topic: String,
    pub payload: Value,
    pub seq: u64,
}

impl BridgeEnvelope {
    /// Whether this envelope came from a different worker.
    pub fn is_remote(&self, worker_id: &str) -> bool {
        self.origin != worker_id
    }
}

/// Worker-side handle to the bridge thread.
pub struct PresenceHandle {
    ops: Sender<PresenceOp>,
    pub events: Receiver<BridgeEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PresenceHandle {
    /// Queue an op for the bridge. Never blocks the loop thread; if the
    /// channel is full the op is dropped and the reconcile pass repairs
    /// the record later.
    pub fn send(&self, op: PresenceOp) {
        if self.ops.try_send(op).is_err() {
            debug!("Presence channel full, dropping op");
        }
    }

    /// Signal shutdown and wait for the bridge thread to finish.
    pub fn shutdown(mut self) {
        let _ = self.ops.send(PresenceOp::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn the bridge thread.
pub fn spawn(config: PresenceConfig, worker_id: String) -> PresenceHandle {
    let (ops_tx, ops_rx) = bounded(CHANNEL_CAPACITY);
    let (events_tx, events_rx) = bounded(CHANNEL_CAPACITY);

    let bridge = Bridge {
        config,
        worker_id,
        ops_rx,
        events_tx,
        local: AHashMap::new(),
        version: 0,
        degraded: false,
    };

    let thread = thread::Builder::new()
        .name("presence".to_string())
        .spawn(move || bridge.run())
        .expect("Failed to spawn presence thread");

    PresenceHandle {
        ops: ops_tx,
        events: events_rx,
        thread: Some(thread),
    }
}

struct Bridge {
    config: PresenceConfig,
    worker_id: String,
    ops_rx: Receiver<PresenceOp>,
    events_tx: Sender<BridgeEvent>,
    /// Mirror of local topic membership, maintained from ops. Topics stay
    /// listed with an empty set until a reconcile has pruned their cache
    /// fields, so deletes missed while degraded are repaired.
    local: AHashMap<String, AHashSet<u64>>,
    /// Monotonic version stamp for records written by this worker.
    version: u64,
    degraded: bool,
}

impl Bridge {
    fn run(mut self) {
        let mut delay = self.config.reconnect_delay_secs;

        info!(
            "Presence bridge starting, worker '{}', cache {}",
            self.worker_id, self.config.url
        );

        loop {
            match self.connect() {
                Ok(mut cmd_conn) => {
                    delay = self.config.reconnect_delay_secs;
                    self.mark_restored();

                    match self.run_session(&mut cmd_conn) {
                        Ok(()) => {
                            info!("Presence bridge shutting down");
                            let _ = self.flush_ops(&mut cmd_conn);
                            let _ = self.clear_own_records(&mut cmd_conn);
                            return;
                        }
                        Err(e) => self.mark_degraded(e),
                    }
                }
                Err(e) => self.mark_degraded(e),
            }

            if self.wait_reconnect(Duration::from_secs(delay)) {
                info!("Presence bridge shutting down while degraded");
                return;
            }
            delay = (delay * 2).min(self.config.reconnect_max_secs);
        }
    }

    /// Establish the command connection.
    fn connect(&self) -> Result<redis::Connection, String> {
        let client = redis::Client::open(self.config.url.as_str()).map_err(|e| e.to_string())?;
        let conn = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| e.to_string())?;
        conn.set_read_timeout(Some(COMMAND_TIMEOUT))
            .map_err(|e| e.to_string())?;
        conn.set_write_timeout(Some(COMMAND_TIMEOUT))
            .map_err(|e| e.to_string())?;
        Ok(conn)
    }

    /// One connected session: subscribe to the fanout channel, then loop
    /// over ops, incoming messages, and periodic reconciles until the link
    /// fails or shutdown is requested. Ok(()) means shutdown.
    fn run_session(&mut self, cmd_conn: &mut redis::Connection) -> Result<(), String> {
        let client = redis::Client::open(self.config.url.as_str()).map_err(|e| e.to_string())?;
        let mut sub_conn = client
            .get_connection_with_timeout(CONNECT_TIMEOUT)
            .map_err(|e| e.to_string())?;
        let mut pubsub = sub_conn.as_pubsub();
        pubsub
            .subscribe(&self.config.channel)
            .map_err(|e| e.to_string())?;
        pubsub
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|e| e.to_string())?;

        // Initial reconcile doubles as the post-reconnect resync: prune
        // fields left over from before the outage, re-upsert membership.
        self.reconcile(cmd_conn)?;
        let mut last_reconcile = Instant::now();
        let reconcile_interval = Duration::from_secs(self.config.reconcile_interval_secs);

        loop {
            if self.drain_ops(cmd_conn)? {
                return Ok(());
            }

            match pubsub.get_message() {
                Ok(msg) => {
                    let payload: String = msg.get_payload().map_err(|e| e.to_string())?;
                    self.handle_fanout(&payload);
                }
                Err(e) if e.is_timeout() => {}
                Err(e) => return Err(e.to_string()),
            }

            if last_reconcile.elapsed() >= reconcile_interval {
                self.reconcile(cmd_conn)?;
                last_reconcile = Instant::now();
            }
        }
    }

    /// Apply pending ops to the cache. Returns true when shutdown was
    /// requested.
    fn drain_ops(&mut self, cmd_conn: &mut redis::Connection) -> Result<bool, String> {
        while let Ok(op) = self.ops_rx.try_recv() {
            match op {
                PresenceOp::Subscribe { topic, conn } => {
                    self.local.entry(topic.clone()).or_default().insert(conn);
                    self.upsert(cmd_conn, &topic, conn)?;
                }
                PresenceOp::Unsubscribe { topic, conn } => {
                    if let Some(set) = self.local.get_mut(&topic) {
                        set.remove(&conn);
                    }
                    self.delete(cmd_conn, &topic, conn)?;
                }
                PresenceOp::RemoveConnection { conn, topics } => {
                    for topic in topics {
                        if let Some(set) = self.local.get_mut(&topic) {
                            set.remove(&conn);
                        }
                        self.delete(cmd_conn, &topic, conn)?;
                    }
                }
                PresenceOp::Publish {
                    topic,
                    payload,
                    seq,
                } => {
                    let envelope = BridgeEnvelope {
                        origin: self.worker_id.clone(),
                        topic,
                        payload,
                        seq,
                    };
                    match serde_json::to_string(&envelope) {
                        Ok(json) => {
                            let _: () = cmd_conn
                                .publish(&self.config.channel, json)
                                .map_err(|e| e.to_string())?;
                        }
                        Err(e) => warn!("Failed to encode bridge envelope: {}", e),
                    }
                }
                PresenceOp::Shutdown => return Ok(true),
            }
        }
        Ok(false)
    }

    /// Best-effort final drain on clean shutdown, so deletes queued during
    /// the last loop iteration reach the cache.
    fn flush_ops(&mut self, cmd_conn: &mut redis::Connection) -> Result<(), String> {
        self.drain_ops(cmd_conn).map(|_| ())
    }

    /// Delete every presence field this worker owns. Called on clean
    /// shutdown so other workers never see members of a dead process.
    fn clear_own_records(&mut self, cmd_conn: &mut redis::Connection) -> Result<(), String> {
        for (topic, conns) in std::mem::take(&mut self.local) {
            let key = format!("{}{}", self.config.key_prefix, topic);
            for conn in conns {
                let _: () = cmd_conn
                    .hdel(&key, presence_field(&self.worker_id, conn))
                    .map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    /// Forward a fanout message into local delivery unless we sent it.
    fn handle_fanout(&mut self, raw: &str) {
        let envelope: BridgeEnvelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                warn!("Malformed bridge envelope on fanout channel: {}", e);
                return;
            }
        };

        if !envelope.is_remote(&self.worker_id) {
            return;
        }

        let event = BridgeEvent::RemotePublish {
            topic: envelope.topic,
            payload: envelope.payload,
        };
        if self.events_tx.try_send(event).is_err() {
            debug!("Bridge event channel full, dropping remote publish");
        }
    }

    /// Reconcile cache records with local membership for every topic with
    /// local interest: prune stale fields this worker owns, re-upsert the
    /// live ones.
    fn reconcile(&mut self, cmd_conn: &mut redis::Connection) -> Result<(), String> {
        let topics: Vec<String> = self.local.keys().cloned().collect();

        for topic in topics {
            let key = self.key(&topic);
            let fields: std::collections::HashMap<String, String> =
                cmd_conn.hgetall(&key).map_err(|e| e.to_string())?;

            let live = self.local.get(&topic).cloned().unwrap_or_default();
            let stale = stale_own_fields(&self.worker_id, fields.keys().map(|k| k.as_str()), &live);
            for field in stale {
                debug!("Pruning stale presence field {}/{}", key, field);
                let _: () = cmd_conn.hdel(&key, &field).map_err(|e| e.to_string())?;
            }

            for conn in live {
                self.upsert(cmd_conn, &topic, conn)?;
            }
        }

        // Topics with no local members have had their fields pruned above.
        self.local.retain(|_, set| !set.is_empty());
        Ok(())
    }

    fn upsert(
        &mut self,
        cmd_conn: &mut redis::Connection,
        topic: &str,
        conn: u64,
    ) -> Result<(), String> {
        self.version += 1;
        let record = PresenceRecord {
            worker_id: self.worker_id.clone(),
            connection_id: conn,
            version: self.version,
        };
        let value = match serde_json::to_string(&record) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to encode presence record: {}", e);
                return Ok(());
            }
        };
        let _: () = cmd_conn
            .hset(self.key(topic), presence_field(&self.worker_id, conn), value)
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn delete(
        &mut self,
        cmd_conn: &mut redis::Connection,
        topic: &str,
        conn: u64,
    ) -> Result<(), String> {
        let _: () = cmd_conn
            .hdel(self.key(topic), presence_field(&self.worker_id, conn))
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn key(&self, topic: &str) -> String {
        format!("{}{}", self.config.key_prefix, topic)
    }

    fn mark_degraded(&mut self, reason: String) {
        if !self.degraded {
            self.degraded = true;
            warn!(
                "Presence bridge degraded, continuing local-only: {}",
                reason
            );
            let _ = self.events_tx.try_send(BridgeEvent::Degraded { reason });
        } else {
            debug!("Presence bridge still degraded: {}", reason);
        }
    }

    fn mark_restored(&mut self) {
        if self.degraded {
            self.degraded = false;
            info!("Presence bridge restored");
            let _ = self.events_tx.try_send(BridgeEvent::Restored);
        }
    }

    /// Wait before reconnecting, draining ops into the local mirror so the
    /// post-reconnect resync reflects reality. Returns true when shutdown
    /// was requested.
    fn wait_reconnect(&mut self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.ops_rx.recv_timeout(deadline - now) {
                Ok(PresenceOp::Shutdown) => return true,
                Ok(PresenceOp::Subscribe { topic, conn }) => {
                    self.local.entry(topic).or_default().insert(conn);
                }
                Ok(PresenceOp::Unsubscribe { topic, conn }) => {
                    if let Some(set) = self.local.get_mut(&topic) {
                        set.remove(&conn);
                    }
                }
                Ok(PresenceOp::RemoveConnection { conn, topics }) => {
                    for topic in topics {
                        if let Some(set) = self.local.get_mut(&topic) {
                            set.remove(&conn);
                        }
                    }
                }
                // Publishes during an outage are dropped, not replayed.
                Ok(PresenceOp::Publish { .. }) => {}
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => return false,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return true,
            }
        }
    }
}

/// Build the hash field name for a (worker, connection) pair.
pub fn presence_field(worker_id: &str, conn: u64) -> String {
    format!("{}:{}", worker_id, conn)
}

/// Fields owned by `worker_id` whose connection is no longer live locally.
///
/// Fields written by other workers are never touched.
fn stale_own_fields<'a>(
    worker_id: &str,
    fields: impl Iterator<Item = &'a str>,
    live: &AHashSet<u64>,
) -> Vec<String> {
    let prefix = format!("{}:", worker_id);
    let mut stale = Vec::new();
    for field in fields {
        if let Some(conn_str) = field.strip_prefix(&prefix) {
            if let Ok(conn) = conn_str.parse::<u64>() {
                if !live.contains(&conn) {
                    stale.push(field.to_string());
                }
            }
        }
    }
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = BridgeEnvelope {
            origin: "gw-a".into(),
            topic: "chat.1".into(),
            payload: json!({"text": "hi"}),
            seq: 3,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        let back: BridgeEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_origin_filtering() {
        let envelope = BridgeEnvelope {
            origin: "gw-a".into(),
            topic: "chat.1".into(),
            payload: json!("hi"),
            seq: 1,
        };
        assert!(!envelope.is_remote("gw-a"));
        assert!(envelope.is_remote("gw-b"));
    }

    #[test]
    fn test_presence_record_roundtrip() {
        let record = PresenceRecord {
            worker_id: "gw-a".into(),
            connection_id: 42,
            version: 17,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: PresenceRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_presence_field_format() {
        assert_eq!(presence_field("gw-a", 42), "gw-a:42");
    }

    #[test]
    fn test_stale_own_fields_ignores_other_workers() {
        let mut live = AHashSet::new();
        live.insert(1u64);

        let fields = ["gw-a:1", "gw-a:2", "gw-b:9", "garbage"];
        let stale = stale_own_fields("gw-a", fields.iter().copied(), &live);
        assert_eq!(stale, vec!["gw-a:2".to_string()]);
    }

    #[test]
    fn test_stale_own_fields_empty_membership() {
        let live = AHashSet::new();
        let fields = ["gw-a:1", "gw-a:2", "gw-b:3"];
        let mut stale = stale_own_fields("gw-a", fields.iter().copied(), &live);
        stale.sort();
        assert_eq!(stale, vec!["gw-a:1".to_string(), "gw-a:2".to_string()]);
    }
}
