//! The gateway event loop.
//!
//! One worker per process owns everything: the listener, every connection,
//! the route table, and the topic registry. All of it is mutated from this
//! single thread; the presence bridge and metrics endpoint run beside it
//! and communicate through channels and atomics only.
//!
//! Each iteration: socket readiness events, then bridge events, then the
//! cleanup pass for closing connections, then timed sweeps. Once the
//! shutdown token is observed the loop stops accepting, sends close frames
//! to every peer, and drains for the configured grace period before
//! force-closing the rest.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::AHashMap;
use log::{debug, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::{Error as WsError, Message};

use wsgate_core::envelope::{Action, ClientFrame, RejectReason, ServerFrame};
use wsgate_core::{topic, Result};

use crate::auth::{Access, AuthProvider};
use crate::config::Config;
use crate::connection::{ConnState, Connection, DeliveryError};
use crate::metrics::GatewayMetrics;
use crate::presence::{BridgeEvent, PresenceHandle, PresenceOp};
use crate::registry::TopicRegistry;
use crate::router::RouteTable;
use crate::shutdown::{GracePeriod, ShutdownToken};
use crate::websocket;

/// Token for the listener socket.
const LISTENER: Token = Token(0);

/// Starting token for client connections.
const CLIENT_START: usize = 1;

/// Poll timeout per loop iteration.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// The single event loop of a gateway process.
pub struct Worker {
    poll: Poll,
    listener: TcpListener,
    /// Connections owned by this worker.
    connections: AHashMap<Token, Connection>,
    /// Next token for new connections.
    next_token: usize,
    registry: TopicRegistry,
    router: RouteTable,
    auth: AuthProvider,
    presence: Option<PresenceHandle>,
    metrics: Arc<GatewayMetrics>,
    config: Arc<Config>,
    shutdown: ShutdownToken,
    /// Set once draining has started; holds the force-close deadline.
    drain: Option<GracePeriod>,
    last_sweep: Instant,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mut listener: TcpListener,
        router: RouteTable,
        auth: AuthProvider,
        presence: Option<PresenceHandle>,
        metrics: Arc<GatewayMetrics>,
        config: Arc<Config>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Self {
            poll,
            listener,
            connections: AHashMap::new(),
            next_token: CLIENT_START,
            registry: TopicRegistry::new(),
            router,
            auth,
            presence,
            metrics,
            config,
            shutdown,
            drain: None,
            last_sweep: Instant::now(),
        })
    }

    /// Run the event loop until shutdown completes.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.run_once()?;

            if let Some(grace) = self.drain {
                if self.connections.is_empty() {
                    info!("Drain complete, all connections closed");
                    break;
                }
                if grace.expired(Instant::now()) {
                    self.force_close_remaining();
                    break;
                }
            }
        }

        if let Some(presence) = self.presence.take() {
            presence.shutdown();
        }
        Ok(())
    }

    /// Run a single iteration of the event loop.
    pub fn run_once(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(1024);
        self.poll.poll(&mut events, Some(POLL_TIMEOUT))?;

        for event in events.iter() {
            match event.token() {
                LISTENER => self.accept_connections()?,
                token => {
                    // Dead connection detection first
                    if event.is_error() || event.is_read_closed() || event.is_write_closed() {
                        if let Some(conn) = self.connections.get_mut(&token) {
                            conn.state = ConnState::Closing;
                        }
                        continue;
                    }
                    if event.is_readable() {
                        self.handle_readable(token);
                    }
                    if event.is_writable() {
                        self.handle_writable(token);
                    }
                }
            }
        }

        self.drain_bridge_events();
        self.flush_connections();
        self.cleanup_connections();

        if self.last_sweep.elapsed() >= Duration::from_secs(self.config.session.sweep_interval_secs)
        {
            self.run_sweep();
            self.last_sweep = Instant::now();
        }

        if self.shutdown.is_set() && self.drain.is_none() {
            self.begin_drain();
        }

        Ok(())
    }

    /// Accept pending upgrade requests and register the resulting
    /// connections. The upgrade handshake itself is blocking, bounded by
    /// the configured handshake timeout.
    fn accept_connections(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((socket, addr)) => {
                    if self.drain.is_some() {
                        continue;
                    }

                    // Convert to std socket for the blocking handshake
                    let std_socket: std::net::TcpStream = socket.into();

                    if self.connections.len() >= self.config.limits.max_connections {
                        debug!("Connection limit reached, refusing upgrade from {}", addr);
                        self.metrics.handshake_failed();
                        websocket::reject_unavailable(std_socket);
                        continue;
                    }

                    if let Err(e) = std_socket.set_nonblocking(false) {
                        debug!("Failed to set socket to blocking for {}: {}", addr, e);
                        continue;
                    }

                    let handshake_timeout =
                        Duration::from_secs(self.config.session.handshake_timeout_secs);
                    let accepted = websocket::accept_websocket(
                        std_socket,
                        &self.config.websocket.path,
                        &self.auth,
                        handshake_timeout,
                    );

                    match accepted {
                        Ok((ws, principal)) => {
                            match websocket::wrap_websocket(ws, &self.config.limits) {
                                Ok(ws) => self.register_connection(ws, addr, principal)?,
                                Err(e) => {
                                    debug!("Failed to wrap WebSocket for {}: {}", addr, e);
                                    self.metrics.handshake_failed();
                                }
                            }
                        }
                        Err(e) => {
                            debug!("WebSocket handshake failed from {}: {}", addr, e);
                            self.metrics.handshake_failed();
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn register_connection(
        &mut self,
        mut ws: tungstenite::WebSocket<mio::net::TcpStream>,
        addr: std::net::SocketAddr,
        principal: Option<crate::auth::Principal>,
    ) -> Result<()> {
        let token = Token(self.next_token);
        self.next_token += 1;

        self.poll
            .registry()
            .register(ws.get_mut(), token, Interest::READABLE)?;

        let conn = Connection::new(token, ws, addr, principal);
        info!(
            "Connection opened: token={} addr={} subject={}",
            token.0,
            addr,
            conn.subject()
        );
        self.connections.insert(token, conn);
        self.metrics.connection_opened();
        Ok(())
    }

    fn handle_readable(&mut self, token: Token) {
        loop {
            let message = {
                let Some(conn) = self.connections.get_mut(&token) else {
                    return;
                };
                if conn.state == ConnState::Closing {
                    return;
                }

                match conn.read_message() {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(e) => {
                        match e {
                            WsError::ConnectionClosed | WsError::AlreadyClosed => {}
                            WsError::Io(ref io_err)
                                if io_err.kind() == io::ErrorKind::ConnectionReset =>
                            {
                                debug!("Connection reset: token={}", token.0);
                            }
                            other => {
                                debug!(
                                    "Transport error on token={}: {}, closing",
                                    token.0, other
                                );
                            }
                        }
                        conn.state = ConnState::Closing;
                        return;
                    }
                }
            };

            match message {
                Message::Text(text) => match ClientFrame::decode(text.as_str()) {
                    Ok(frame) => self.handle_frame(token, frame),
                    Err(e) => {
                        debug!("Malformed frame from token={}: {}", token.0, e);
                        self.close_for_protocol_violation(token, e.to_string());
                        return;
                    }
                },
                Message::Binary(_) => {
                    debug!("Binary frame from token={}, closing", token.0);
                    self.close_for_protocol_violation(token, "binary frames not supported".into());
                    return;
                }
                Message::Close(_) => {
                    if let Some(conn) = self.connections.get_mut(&token) {
                        conn.state = ConnState::Closing;
                    }
                    return;
                }
                // Ping/pong handled inside tungstenite
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        match conn.flush() {
            Ok(true) => self.update_interest(token),
            Ok(false) => {}
            Err(e) => {
                debug!("Flush error on token={}: {}, closing", token.0, e);
                conn.state = ConnState::Closing;
            }
        }
    }

    /// Dispatch a decoded client frame.
    fn handle_frame(&mut self, token: Token, frame: ClientFrame) {
        if self.drain.is_some() {
            self.send_reject(
                token,
                frame.action(),
                frame.topic().to_string(),
                RejectReason::ShuttingDown,
                None,
            );
            return;
        }

        let topic_name = frame.topic().to_string();
        if let Err(e) = topic::validate(
            &topic_name,
            self.config.limits.max_topic_length,
            self.config.limits.max_topic_segments,
        ) {
            self.send_reject(
                token,
                frame.action(),
                topic_name,
                RejectReason::InvalidTopic,
                Some(e.to_string()),
            );
            return;
        }

        match frame {
            ClientFrame::Subscribe { topic } => self.handle_subscribe(token, topic),
            ClientFrame::Unsubscribe { topic } => self.handle_unsubscribe(token, topic),
            ClientFrame::Publish { topic, payload } => self.handle_publish(token, topic, payload),
        }
    }

    fn handle_subscribe(&mut self, token: Token, topic_name: String) {
        let route_pattern = match self.router.match_topic(&topic_name, Action::Subscribe) {
            Some((route, _)) => route.pattern.clone(),
            None => {
                self.send_reject(
                    token,
                    Action::Subscribe,
                    topic_name,
                    RejectReason::UnknownTopic,
                    None,
                );
                return;
            }
        };

        let principal = self
            .connections
            .get(&token)
            .and_then(|c| c.principal.clone());
        if !self
            .auth
            .authorize(principal.as_ref(), &topic_name, Access::Subscribe)
            .is_allowed()
        {
            debug!(
                "Authorization denied: subscribe topic={} token={}",
                topic_name, token.0
            );
            self.send_reject(
                token,
                Action::Subscribe,
                topic_name,
                RejectReason::NotAuthorized,
                None,
            );
            return;
        }

        let max_subscriptions = self.config.limits.max_subscriptions;
        let over_limit = self.connections.get(&token).is_some_and(|conn| {
            !conn.subscriptions.contains(&topic_name)
                && conn.subscriptions.len() >= max_subscriptions
        });
        if over_limit {
            self.send_reject(
                token,
                Action::Subscribe,
                topic_name,
                RejectReason::LimitExceeded,
                Some(format!("subscription limit is {}", max_subscriptions)),
            );
            return;
        }

        // Idempotent: re-subscribing is a no-op that still acks
        let newly_added = self.registry.subscribe(&topic_name, token);
        if newly_added {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.subscriptions.insert(topic_name.clone());
            }
            self.metrics.subscribed();
            self.send_presence(PresenceOp::Subscribe {
                topic: topic_name.clone(),
                conn: token.0 as u64,
            });
            debug!(
                "Subscribed: topic={} route={} token={}",
                topic_name, route_pattern, token.0
            );
        }

        self.send_frame(token, &ServerFrame::ack(Action::Subscribe, topic_name));
    }

    fn handle_unsubscribe(&mut self, token: Token, topic_name: String) {
        if self
            .router
            .match_topic(&topic_name, Action::Unsubscribe)
            .is_none()
        {
            self.send_reject(
                token,
                Action::Unsubscribe,
                topic_name,
                RejectReason::UnknownTopic,
                None,
            );
            return;
        }

        // Idempotent: unsubscribing a non-member still acks
        let removed = self.registry.unsubscribe(&topic_name, token);
        if removed {
            if let Some(conn) = self.connections.get_mut(&token) {
                conn.subscriptions.remove(&topic_name);
            }
            self.metrics.unsubscribed(1);
            self.send_presence(PresenceOp::Unsubscribe {
                topic: topic_name.clone(),
                conn: token.0 as u64,
            });
            debug!("Unsubscribed: topic={} token={}", topic_name, token.0);
        }

        self.send_frame(token, &ServerFrame::ack(Action::Unsubscribe, topic_name));
    }

    fn handle_publish(&mut self, token: Token, topic_name: String, payload: serde_json::Value) {
        let route_pattern = match self.router.match_topic(&topic_name, Action::Publish) {
            Some((route, _)) => route.pattern.clone(),
            None => {
                self.send_reject(
                    token,
                    Action::Publish,
                    topic_name,
                    RejectReason::UnknownTopic,
                    None,
                );
                return;
            }
        };

        let principal = self
            .connections
            .get(&token)
            .and_then(|c| c.principal.clone());
        if !self
            .auth
            .authorize(principal.as_ref(), &topic_name, Access::Publish)
            .is_allowed()
        {
            debug!(
                "Authorization denied: publish topic={} token={}",
                topic_name, token.0
            );
            self.send_reject(
                token,
                Action::Publish,
                topic_name,
                RejectReason::NotAuthorized,
                None,
            );
            return;
        }

        self.metrics.publish_received();

        let seq = self.registry.next_seq(&topic_name);
        let delivered = self.deliver_local(&topic_name, &payload, seq);

        self.send_presence(PresenceOp::Publish {
            topic: topic_name.clone(),
            payload,
            seq,
        });

        debug!(
            "Publish: topic={} route={} token={} delivered={}",
            topic_name, route_pattern, token.0, delivered
        );
        self.send_frame(token, &ServerFrame::publish_ack(topic_name, delivered));
    }

    /// Deliver a message to every local subscriber of a topic.
    ///
    /// Works off a registry snapshot: subscribers added during delivery do
    /// not receive this message, subscribers that disappeared are skipped.
    /// A failed write evicts the subscriber from the topic and the publish
    /// carries on (partial failure, not a fatal one). Returns the number
    /// of connections the message was handed to.
    fn deliver_local(&mut self, topic_name: &str, payload: &serde_json::Value, seq: u64) -> usize {
        let snapshot = self.registry.snapshot(topic_name);
        if snapshot.is_empty() {
            // Publishing to a topic with no subscribers is a documented no-op
            return 0;
        }

        let frame = ServerFrame::message(topic_name, payload.clone(), seq);
        let json = match frame.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to encode message for '{}': {}", topic_name, e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut evicted: Vec<Token> = Vec::new();

        for sub_token in snapshot {
            let Some(conn) = self.connections.get_mut(&sub_token) else {
                continue;
            };
            if conn.state == ConnState::Closing {
                continue;
            }

            match conn.queue_raw(&json) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Backpressure) => {
                    if let Some(count) = conn.delivery_failure_log.increment() {
                        warn!(
                            "Evicted slow subscriber: token={} topic={} dropped={}",
                            sub_token.0, topic_name, count
                        );
                    }
                    evicted.push(sub_token);
                }
                Err(DeliveryError::Closed) => {}
                Err(DeliveryError::Io(e)) => {
                    debug!(
                        "Delivery write error: token={} topic={}: {}",
                        sub_token.0, topic_name, e
                    );
                    conn.state = ConnState::Closing;
                    self.metrics.delivery_failed();
                }
                Err(DeliveryError::Encode(e)) => {
                    warn!("Failed to encode frame for token={}: {}", sub_token.0, e);
                }
            }
        }

        for sub_token in evicted {
            self.registry.unsubscribe(topic_name, sub_token);
            if let Some(conn) = self.connections.get_mut(&sub_token) {
                conn.subscriptions.remove(topic_name);
            }
            self.metrics.delivery_failed();
            self.metrics.unsubscribed(1);
            self.send_presence(PresenceOp::Unsubscribe {
                topic: topic_name.to_string(),
                conn: sub_token.0 as u64,
            });
        }

        self.metrics.delivered(delivered as u64);
        delivered
    }

    /// Forward bridge events into local delivery.
    fn drain_bridge_events(&mut self) {
        let Some(presence) = &self.presence else {
            return;
        };

        let mut events = Vec::new();
        while let Ok(event) = presence.events.try_recv() {
            events.push(event);
        }

        for event in events {
            match event {
                BridgeEvent::RemotePublish { topic, payload } => {
                    self.metrics.remote_publish();
                    let seq = self.registry.next_seq(&topic);
                    let delivered = self.deliver_local(&topic, &payload, seq);
                    debug!(
                        "Remote publish: topic={} delivered={}",
                        topic, delivered
                    );
                }
                BridgeEvent::Degraded { reason } => {
                    self.metrics.bridge_degraded();
                    debug!("Bridge degraded: {}", reason);
                }
                BridgeEvent::Restored => {
                    debug!("Bridge restored");
                }
            }
        }
    }

    /// Flush buffered writes on every connection; tungstenite only queues
    /// on write, actual socket I/O happens here.
    fn flush_connections(&mut self) {
        let mut interest_changes = Vec::new();
        for (token, conn) in self.connections.iter_mut() {
            if conn.state == ConnState::Closing {
                continue;
            }
            let was_waiting = conn.wants_write;
            match conn.flush() {
                Ok(_) => {
                    if conn.wants_write != was_waiting {
                        interest_changes.push(*token);
                    }
                }
                Err(e) => {
                    debug!("Flush error on token={}: {}, closing", token.0, e);
                    conn.state = ConnState::Closing;
                }
            }
        }
        for token in interest_changes {
            self.update_interest(token);
        }
    }

    /// Re-register poll interest to match the connection's pending-write state.
    fn update_interest(&mut self, token: Token) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };
        let interest = if conn.wants_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        if let Err(e) = self
            .poll
            .registry()
            .reregister(conn.stream_mut(), token, interest)
        {
            debug!("Failed to reregister token={}: {}", token.0, e);
            conn.state = ConnState::Closing;
        }
    }

    /// Tear down connections marked Closing. Removes them from every topic
    /// before the pass returns, so no later publish can reach them.
    fn cleanup_connections(&mut self) {
        let closing: Vec<Token> = self
            .connections
            .iter()
            .filter(|(_, c)| c.state == ConnState::Closing)
            .map(|(t, _)| *t)
            .collect();

        for token in closing {
            if let Some(mut conn) = self.connections.remove(&token) {
                // Best-effort flush so a queued close frame reaches the peer
                let _ = conn.flush();
                let _ = self.poll.registry().deregister(conn.stream_mut());

                let removed_from = self.registry.remove_connection(token);
                if !removed_from.is_empty() {
                    self.metrics.unsubscribed(removed_from.len() as u64);
                    self.send_presence(PresenceOp::RemoveConnection {
                        conn: token.0 as u64,
                        topics: removed_from,
                    });
                }

                self.metrics.connection_closed();
                info!(
                    "Connection closed: token={} addr={} subject={} graceful={}",
                    token.0,
                    conn.remote_addr,
                    conn.subject(),
                    conn.peer_closed
                );
            }
        }
    }

    /// Periodic sweep: close idle connections, drop empty topics.
    fn run_sweep(&mut self) {
        let now = Instant::now();
        let idle_timeout = self.config.session.idle_timeout_secs;

        if idle_timeout > 0 {
            let limit = Duration::from_secs(idle_timeout);
            for conn in self.connections.values_mut() {
                if conn.state == ConnState::Open && conn.idle_for(now) > limit {
                    debug!(
                        "Closing idle connection: token={} idle={}s",
                        conn.token.0,
                        conn.idle_for(now).as_secs()
                    );
                    conn.queue_close(CloseCode::Away, "idle timeout");
                    conn.state = ConnState::Closing;
                }
            }
        }

        let collected = self.registry.gc_empty();
        if collected > 0 {
            debug!("Swept {} empty topics", collected);
        }
        self.metrics
            .set_topics_active(self.registry.topic_count() as u64);
    }

    /// Start the shutdown drain: stop accepting, close every connection.
    fn begin_drain(&mut self) {
        let grace = Duration::from_secs(self.config.session.shutdown_grace_secs);
        info!(
            "Draining: {} open connections, grace period {}s",
            self.connections.len(),
            grace.as_secs()
        );

        let _ = self.poll.registry().deregister(&mut self.listener);

        for conn in self.connections.values_mut() {
            conn.queue_close(CloseCode::Restart, "server shutting down");
            let _ = conn.flush();
        }

        self.drain = Some(GracePeriod::starting_now(grace));
    }

    /// Grace period elapsed: force-close whatever is still open.
    fn force_close_remaining(&mut self) {
        let remaining: Vec<Token> = self.connections.keys().copied().collect();
        warn!(
            "Shutdown grace period elapsed, force-closing {} connections",
            remaining.len()
        );

        for token in remaining {
            if let Some(mut conn) = self.connections.remove(&token) {
                let _ = self.poll.registry().deregister(conn.stream_mut());
                self.registry.remove_connection(token);
                self.metrics.forced_close();
                self.metrics.connection_closed();
                warn!(
                    "Abrupt termination: token={} addr={}",
                    token.0, conn.remote_addr
                );
            }
        }
    }

    /// Reject a frame from a peer, closing the connection afterwards.
    fn close_for_protocol_violation(&mut self, token: Token, detail: String) {
        self.metrics.rejected();
        let reject = ServerFrame::bare_reject(RejectReason::BadFrame, detail);
        if let Some(conn) = self.connections.get_mut(&token) {
            let _ = conn.queue_frame(&reject);
            conn.queue_close(CloseCode::Protocol, "protocol violation");
            let _ = conn.flush();
            conn.state = ConnState::Closing;
        }
    }

    fn send_reject(
        &mut self,
        token: Token,
        action: Action,
        topic_name: String,
        reason: RejectReason,
        detail: Option<String>,
    ) {
        self.metrics.rejected();
        let frame = match detail {
            Some(detail) => ServerFrame::reject_with_detail(action, topic_name, reason, detail),
            None => ServerFrame::reject(action, topic_name, reason),
        };
        self.send_frame(token, &frame);
    }

    /// Queue a control frame (ack/reject) to a connection. Control frames
    /// are not droppable: a consumer too slow to take them is closed.
    fn send_frame(&mut self, token: Token, frame: &ServerFrame) {
        let Some(conn) = self.connections.get_mut(&token) else {
            return;
        };

        match conn.queue_frame(frame) {
            Ok(()) => {}
            Err(DeliveryError::Backpressure) => {
                warn!(
                    "Write buffer full for control frame, closing token={}",
                    token.0
                );
                conn.state = ConnState::Closing;
            }
            Err(DeliveryError::Closed) => {}
            Err(DeliveryError::Io(e)) => {
                debug!("Control frame write error on token={}: {}", token.0, e);
                conn.state = ConnState::Closing;
            }
            Err(DeliveryError::Encode(e)) => {
                warn!("Failed to encode control frame: {}", e);
            }
        }
    }

    fn send_presence(&self, op: PresenceOp) {
        if let Some(presence) = &self.presence {
            presence.send(op);
        }
    }
}
