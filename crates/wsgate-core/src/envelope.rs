//! JSON frame envelope exchanged with connected clients.
//!
//! Every WebSocket text frame carries exactly one envelope. Client frames
//! are tagged by `action`, server frames by `type`. Binary frames are a
//! protocol violation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Client-requested action on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Subscribe,
    Unsubscribe,
    Publish,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Subscribe => write!(f, "subscribe"),
            Action::Unsubscribe => write!(f, "unsubscribe"),
            Action::Publish => write!(f, "publish"),
        }
    }
}

/// Frame sent by a client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe {
        topic: String,
    },
    Unsubscribe {
        topic: String,
    },
    Publish {
        topic: String,
        #[serde(default)]
        payload: Value,
    },
}

impl ClientFrame {
    /// Decode a single text frame into an envelope.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }

    /// The action this frame requests.
    pub fn action(&self) -> Action {
        match self {
            ClientFrame::Subscribe { .. } => Action::Subscribe,
            ClientFrame::Unsubscribe { .. } => Action::Unsubscribe,
            ClientFrame::Publish { .. } => Action::Publish,
        }
    }

    /// The topic this frame addresses.
    pub fn topic(&self) -> &str {
        match self {
            ClientFrame::Subscribe { topic }
            | ClientFrame::Unsubscribe { topic }
            | ClientFrame::Publish { topic, .. } => topic,
        }
    }
}

/// Why a client request was rejected.
///
/// Rejections are always explicit: the client receives a reject frame
/// naming the reason, never a silent drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Malformed envelope (the connection is closed after this).
    BadFrame,
    /// Topic name failed validation.
    InvalidTopic,
    /// No route matches the topic for the requested action.
    UnknownTopic,
    /// The authorization collaborator denied the action.
    NotAuthorized,
    /// A per-connection limit was hit (e.g. subscription count).
    LimitExceeded,
    /// The gateway is draining and refuses new work.
    ShuttingDown,
}

/// Frame sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerFrame {
    /// Positive acknowledgment of a client request.
    Ack {
        action: Action,
        topic: String,
        /// Local subscriber count a publish was handed to.
        #[serde(skip_serializing_if = "Option::is_none")]
        delivered: Option<usize>,
    },
    /// A published message delivered to a subscriber.
    Message {
        topic: String,
        payload: Value,
        /// Per-topic sequence number, for ordering diagnostics.
        seq: u64,
    },
    /// Explicit rejection of a client request.
    Reject {
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<Action>,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        reason: RejectReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ServerFrame {
    pub fn ack(action: Action, topic: impl Into<String>) -> Self {
        ServerFrame::Ack {
            action,
            topic: topic.into(),
            delivered: None,
        }
    }

    pub fn publish_ack(topic: impl Into<String>, delivered: usize) -> Self {
        ServerFrame::Ack {
            action: Action::Publish,
            topic: topic.into(),
            delivered: Some(delivered),
        }
    }

    pub fn message(topic: impl Into<String>, payload: Value, seq: u64) -> Self {
        ServerFrame::Message {
            topic: topic.into(),
            payload,
            seq,
        }
    }

    pub fn reject(action: Action, topic: impl Into<String>, reason: RejectReason) -> Self {
        ServerFrame::Reject {
            action: Some(action),
            topic: Some(topic.into()),
            reason,
            detail: None,
        }
    }

    pub fn reject_with_detail(
        action: Action,
        topic: impl Into<String>,
        reason: RejectReason,
        detail: impl Into<String>,
    ) -> Self {
        ServerFrame::Reject {
            action: Some(action),
            topic: Some(topic.into()),
            reason,
            detail: Some(detail.into()),
        }
    }

    /// Rejection not tied to a specific request (e.g. a malformed frame
    /// whose action could not be parsed).
    pub fn bare_reject(reason: RejectReason, detail: impl Into<String>) -> Self {
        ServerFrame::Reject {
            action: None,
            topic: None,
            reason,
            detail: Some(detail.into()),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_subscribe() {
        let frame = ClientFrame::decode(r#"{"action":"subscribe","topic":"room.lobby"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Subscribe {
                topic: "room.lobby".into()
            }
        );
        assert_eq!(frame.action(), Action::Subscribe);
        assert_eq!(frame.topic(), "room.lobby");
    }

    #[test]
    fn test_decode_publish_with_payload() {
        let frame = ClientFrame::decode(
            r#"{"action":"publish","topic":"chat.1","payload":{"text":"hi"}}"#,
        )
        .unwrap();
        match frame {
            ClientFrame::Publish { topic, payload } => {
                assert_eq!(topic, "chat.1");
                assert_eq!(payload, json!({"text": "hi"}));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_publish_without_payload_defaults_null() {
        let frame = ClientFrame::decode(r#"{"action":"publish","topic":"chat.1"}"#).unwrap();
        match frame {
            ClientFrame::Publish { payload, .. } => assert_eq!(payload, Value::Null),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_action_fails() {
        let err = ClientFrame::decode(r#"{"action":"shout","topic":"a"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_missing_topic_fails() {
        let err = ClientFrame::decode(r#"{"action":"subscribe"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_not_json_fails() {
        assert!(ClientFrame::decode("subscribe room.lobby").is_err());
    }

    #[test]
    fn test_encode_ack_skips_delivered_when_none() {
        let json = ServerFrame::ack(Action::Subscribe, "room.lobby").encode().unwrap();
        assert_eq!(
            json,
            r#"{"type":"ack","action":"subscribe","topic":"room.lobby"}"#
        );
    }

    #[test]
    fn test_encode_publish_ack_includes_delivered() {
        let json = ServerFrame::publish_ack("chat.1", 3).encode().unwrap();
        assert!(json.contains(r#""delivered":3"#));
    }

    #[test]
    fn test_encode_reject_reason_is_snake_case() {
        let json = ServerFrame::reject(Action::Subscribe, "nope", RejectReason::UnknownTopic)
            .encode()
            .unwrap();
        assert!(json.contains(r#""reason":"unknown_topic""#));
    }

    #[test]
    fn test_encode_message() {
        let json = ServerFrame::message("chat.1", json!({"text": "hi"}), 7)
            .encode()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"message","topic":"chat.1","payload":{"text":"hi"},"seq":7}"#
        );
    }
}
