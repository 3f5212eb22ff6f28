//! Per-connection state and transport management.
//!
//! A connection owns its WebSocket transport exclusively. All reads and
//! writes happen on the worker loop thread; tungstenite buffers outbound
//! frames internally and the worker flushes on writable readiness.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ahash::AHashSet;
use mio::net::TcpStream;
use mio::Token;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::CloseFrame;
use tungstenite::{Error as WsError, Message, WebSocket};

use wsgate_core::envelope::ServerFrame;

use crate::auth::Principal;
use crate::util::RateLimitedCounter;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Handshake complete, frames flowing.
    Open,
    /// Marked for teardown; removed by the next cleanup pass.
    Closing,
}

/// Why a queued frame could not be handed to the transport.
#[derive(Debug)]
pub enum DeliveryError {
    /// The connection's write buffer is full (slow consumer).
    Backpressure,
    /// The connection is closed or closing.
    Closed,
    /// Transport-level write failure.
    Io(std::io::Error),
    /// The frame could not be serialized.
    Encode(serde_json::Error),
}

/// Per-connection state.
pub struct Connection {
    pub token: Token,
    ws: WebSocket<TcpStream>,
    pub remote_addr: SocketAddr,
    pub state: ConnState,
    /// Identity established during the upgrade handshake, if any.
    pub principal: Option<Principal>,
    /// Topics this connection is subscribed to (back-reference into the
    /// registry, never an ownership edge).
    pub subscriptions: AHashSet<String>,
    /// Last time any frame arrived from the peer.
    pub last_frame_time: Instant,
    /// Whether we have queued a close frame to this peer.
    pub close_sent: bool,
    /// Whether the peer initiated or acknowledged the close handshake.
    pub peer_closed: bool,
    /// Outbound data is pending; the worker keeps WRITABLE interest while set.
    pub wants_write: bool,
    /// Rate-limited logging of failed deliveries to this connection.
    pub delivery_failure_log: RateLimitedCounter,
}

impl Connection {
    pub fn new(
        token: Token,
        ws: WebSocket<TcpStream>,
        remote_addr: SocketAddr,
        principal: Option<Principal>,
    ) -> Self {
        Self {
            token,
            ws,
            remote_addr,
            state: ConnState::Open,
            principal,
            subscriptions: AHashSet::new(),
            last_frame_time: Instant::now(),
            close_sent: false,
            peer_closed: false,
            wants_write: false,
            delivery_failure_log: RateLimitedCounter::new(Duration::from_secs(10)),
        }
    }

    /// The underlying TCP stream, for poll registration.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        self.ws.get_mut()
    }

    /// Read the next WebSocket message, if one is available.
    ///
    /// Returns Ok(None) when the socket would block. Close frames from the
    /// peer are surfaced so the worker can mark the connection; ping/pong
    /// are handled by tungstenite internally.
    pub fn read_message(&mut self) -> Result<Option<Message>, WsError> {
        match self.ws.read() {
            Ok(msg) => {
                self.last_frame_time = Instant::now();
                if let Message::Close(_) = msg {
                    self.peer_closed = true;
                }
                Ok(Some(msg))
            }
            Err(WsError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Queue a server frame for delivery.
    ///
    /// Queuing only; the worker flushes afterwards. A full write buffer is
    /// reported as backpressure so the caller can treat this subscriber as
    /// a failed delivery target.
    pub fn queue_frame(&mut self, frame: &ServerFrame) -> Result<(), DeliveryError> {
        if self.state == ConnState::Closing || self.close_sent {
            return Err(DeliveryError::Closed);
        }

        let json = frame.encode().map_err(DeliveryError::Encode)?;
        match self.ws.write(Message::text(json)) {
            Ok(()) => Ok(()),
            Err(WsError::WriteBufferFull(_)) => Err(DeliveryError::Backpressure),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Err(DeliveryError::Closed)
            }
            Err(WsError::Io(e)) => Err(DeliveryError::Io(e)),
            Err(e) => Err(DeliveryError::Io(std::io::Error::other(e))),
        }
    }

    /// Queue an already-encoded frame. Fanout encodes the message once and
    /// hands the same JSON to every subscriber.
    pub fn queue_raw(&mut self, json: &str) -> Result<(), DeliveryError> {
        if self.state == ConnState::Closing || self.close_sent {
            return Err(DeliveryError::Closed);
        }

        match self.ws.write(Message::text(json.to_string())) {
            Ok(()) => Ok(()),
            Err(WsError::WriteBufferFull(_)) => Err(DeliveryError::Backpressure),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                Err(DeliveryError::Closed)
            }
            Err(WsError::Io(e)) => Err(DeliveryError::Io(e)),
            Err(e) => Err(DeliveryError::Io(std::io::Error::other(e))),
        }
    }

    /// Initiate the close handshake with the peer.
    pub fn queue_close(&mut self, code: CloseCode, reason: &'static str) {
        if self.close_sent {
            return;
        }
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        // Errors here mean the transport is already gone; the cleanup pass
        // picks the connection up either way.
        let _ = self.ws.close(Some(frame));
        self.close_sent = true;
    }

    /// Write buffered data to the socket.
    ///
    /// Returns Ok(true) when everything was flushed, Ok(false) when the
    /// socket would block (WRITABLE interest should stay registered).
    pub fn flush(&mut self) -> Result<bool, WsError> {
        match self.ws.flush() {
            Ok(()) => {
                self.wants_write = false;
                Ok(true)
            }
            Err(WsError::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                self.wants_write = true;
                Ok(false)
            }
            // Flushing a connection whose close handshake finished is fine.
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => {
                self.wants_write = false;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// How long since the peer last sent any frame.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_frame_time)
    }

    /// Subject string for logging.
    pub fn subject(&self) -> &str {
        self.principal
            .as_ref()
            .map(|p| p.subject.as_str())
            .unwrap_or("-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener as StdListener, TcpStream as StdStream};
    use tungstenite::protocol::Role;
    use wsgate_core::envelope::Action;

    fn connected_pair() -> (TcpStream, StdStream) {
        let listener = StdListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (TcpStream::from_std(server), client)
    }

    fn connection(server: TcpStream) -> Connection {
        let ws = WebSocket::from_raw_socket(server, Role::Server, None);
        Connection::new(Token(1), ws, "127.0.0.1:9999".parse().unwrap(), None)
    }

    #[test]
    fn test_queue_and_flush_delivers_text_frame() {
        let (server, client) = connected_pair();
        let mut conn = connection(server);

        conn.queue_frame(&ServerFrame::ack(Action::Subscribe, "room.1"))
            .unwrap();
        while !conn.flush().unwrap() {}

        let mut client = WebSocket::from_raw_socket(client, Role::Client, None);
        let msg = client.read().unwrap();
        assert!(msg.is_text());
        let text = msg.to_text().unwrap();
        assert!(text.contains(r#""type":"ack""#));
        assert!(text.contains(r#""topic":"room.1""#));
    }

    #[test]
    fn test_queue_rejected_when_closing() {
        let (server, _client) = connected_pair();
        let mut conn = connection(server);
        conn.state = ConnState::Closing;

        assert!(matches!(
            conn.queue_frame(&ServerFrame::ack(Action::Subscribe, "t")),
            Err(DeliveryError::Closed)
        ));
        assert!(matches!(conn.queue_raw("{}"), Err(DeliveryError::Closed)));
    }

    #[test]
    fn test_queue_rejected_after_close_sent() {
        let (server, _client) = connected_pair();
        let mut conn = connection(server);
        conn.queue_close(CloseCode::Normal, "done");

        assert!(conn.close_sent);
        assert!(matches!(
            conn.queue_frame(&ServerFrame::ack(Action::Subscribe, "t")),
            Err(DeliveryError::Closed)
        ));
    }

    #[test]
    fn test_read_message_would_block_on_idle_socket() {
        let (server, _client) = connected_pair();
        let mut conn = connection(server);

        assert!(conn.read_message().unwrap().is_none());
    }
}
