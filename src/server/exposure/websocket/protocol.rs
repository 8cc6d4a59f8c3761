//! WebSocket message protocol definitions
//!
//! Defines the JSON messages exchanged between WebSocket clients and the server.
//!
//! ## Client → Server Messages
//!
//! ```json
//! // Authenticate
//! {"type": "access-token", "value": "<token>"}
//!
//! // Keepalive
//! {"type": "ping", "id": 1}
//!
//! // Identity check
//! {"type": "whoami", "id": 2}
//!
//! // Announce the client instance (browser tab)
//! {"type": "client_id", "value": "<id>"}
//!
//! // Subscribe (no "type" needed; the "filter" key is enough)
//! {"filter": {"clauses": [{"field": "/uri", "operator": "one_of", "value": ["https://a.com"]}]}}
//! ```
//!
//! Older clients send `messageType` instead of `type`; both are accepted.
//!
//! ## Server → Client Messages
//!
//! ```json
//! {"type": "pong", "ok": true, "reply_to": 1}
//! {"type": "whoyouare", "ok": true, "reply_to": 2, "userid": "acct:jane@example.org"}
//! {"type": "update", "payload": [{...}]}
//! {"type": "delete", "payload": [{"id": "ann1"}]}
//! ```

use crate::core::filter::RawFilter;
use crate::core::{AnnotationAction, NotifyError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server
///
/// Produced by a single [`decode`](ClientMessage::decode) step; the rest of
/// the server only ever sees this closed set.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Bearer token to authenticate the connection
    AccessToken { value: String },
    /// Keepalive, answered with a pong echoing `id`
    Ping { id: Option<Value> },
    /// Identity check, answered with the account ID
    WhoAmI { id: Option<Value> },
    /// One-time client-instance ID
    ClientId { value: String },
    /// Subscription request
    Filter { filter: RawFilter },
    /// Anything else; ignored
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct ValueFrame {
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct CorrelatedFrame {
    #[serde(default)]
    id: Option<Value>,
}

#[derive(Deserialize)]
struct FilterFrame {
    filter: RawFilter,
}

impl ClientMessage {
    /// Decode an inbound text frame
    ///
    /// The kind is taken from `type`, then `messageType`, and finally
    /// inferred as `filter` when a `filter` key is present. Frames that are
    /// not JSON objects, or whose payload does not fit their kind, are
    /// protocol errors.
    pub fn decode(text: &str) -> Result<Self, NotifyError> {
        let frame: Value = serde_json::from_str(text)
            .map_err(|e| NotifyError::Protocol(format!("malformed frame: {}", e)))?;

        let Some(object) = frame.as_object() else {
            return Err(NotifyError::Protocol(
                "frame must be a JSON object".to_string(),
            ));
        };

        let kind = object
            .get("type")
            .or_else(|| object.get("messageType"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| object.contains_key("filter").then(|| "filter".to_string()))
            .unwrap_or_default();

        let message = match kind.as_str() {
            "access-token" => ClientMessage::AccessToken {
                value: payload::<ValueFrame>(frame, &kind)?.value,
            },
            "ping" => ClientMessage::Ping {
                id: payload::<CorrelatedFrame>(frame, &kind)?.id,
            },
            "whoami" => ClientMessage::WhoAmI {
                id: payload::<CorrelatedFrame>(frame, &kind)?.id,
            },
            "client_id" => ClientMessage::ClientId {
                value: payload::<ValueFrame>(frame, &kind)?.value,
            },
            "filter" => ClientMessage::Filter {
                filter: payload::<FilterFrame>(frame, &kind)?.filter,
            },
            _ => ClientMessage::Unknown { kind },
        };

        Ok(message)
    }

    /// Name of the message kind, for logging
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::AccessToken { .. } => "access-token",
            ClientMessage::Ping { .. } => "ping",
            ClientMessage::WhoAmI { .. } => "whoami",
            ClientMessage::ClientId { .. } => "client_id",
            ClientMessage::Filter { .. } => "filter",
            ClientMessage::Unknown { kind } => kind,
        }
    }
}

fn payload<T: DeserializeOwned>(frame: Value, kind: &str) -> Result<T, NotifyError> {
    serde_json::from_value(frame)
        .map_err(|e| NotifyError::Protocol(format!("invalid '{}' message: {}", kind, e)))
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Keepalive response
    Pong {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<Value>,
    },
    /// Answer to `whoami`
    #[serde(rename = "whoyouare")]
    WhoYouAre {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reply_to: Option<Value>,
        userid: String,
    },
    /// An annotation was created
    Create { payload: Vec<Value> },
    /// An annotation was updated
    Update { payload: Vec<Value> },
    /// An annotation was deleted
    Delete { payload: Vec<Value> },
}

impl ServerMessage {
    pub fn pong(reply_to: Option<Value>) -> Self {
        ServerMessage::Pong { ok: true, reply_to }
    }

    pub fn who_you_are(reply_to: Option<Value>, userid: String) -> Self {
        ServerMessage::WhoYouAre {
            ok: true,
            reply_to,
            userid,
        }
    }

    /// Notification frame for an annotation change
    pub fn notification(action: AnnotationAction, payload: Vec<Value>) -> Self {
        match action {
            AnnotationAction::Create => ServerMessage::Create { payload },
            AnnotationAction::Update => ServerMessage::Update { payload },
            AnnotationAction::Delete => ServerMessage::Delete { payload },
        }
    }

    /// The action, if this is a notification frame
    pub fn action(&self) -> Option<AnnotationAction> {
        match self {
            ServerMessage::Create { .. } => Some(AnnotationAction::Create),
            ServerMessage::Update { .. } => Some(AnnotationAction::Update),
            ServerMessage::Delete { .. } => Some(AnnotationAction::Delete),
            _ => None,
        }
    }
}

/// WebSocket close status codes used by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    /// Orderly shutdown
    Normal,
    /// Message sent before authentication, or malformed frame
    ProtocolError,
    /// Bad or missing credentials
    NotAcceptable,
    /// Unhandled internal fault or fatal client error
    ServerError,
}

impl CloseStatus {
    /// RFC 6455 status code
    pub fn code(&self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::ProtocolError => 1002,
            CloseStatus::NotAcceptable => 1003,
            CloseStatus::ServerError => 1011,
        }
    }

    /// Close status a client receives for a handler-level error
    pub fn for_error(err: &NotifyError) -> Self {
        match err {
            NotifyError::Authentication(_) => CloseStatus::NotAcceptable,
            NotifyError::Protocol(_) => CloseStatus::ProtocolError,
            NotifyError::InvalidArgument(_)
            | NotifyError::InvalidFilter(_)
            | NotifyError::Config(_)
            | NotifyError::Internal(_) => CloseStatus::ServerError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FilterError;
    use serde_json::json;

    // === Decoding ===

    #[test]
    fn test_decode_access_token() {
        let msg = ClientMessage::decode(r#"{"type":"access-token","value":"secret"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::AccessToken {
                value: "secret".to_string()
            }
        );
    }

    #[test]
    fn test_decode_access_token_without_value_is_empty() {
        let msg = ClientMessage::decode(r#"{"type":"access-token"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::AccessToken {
                value: String::new()
            }
        );
    }

    #[test]
    fn test_decode_ping_keeps_correlation_id() {
        let msg = ClientMessage::decode(r#"{"type":"ping","id":"corr-1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Ping {
                id: Some(json!("corr-1"))
            }
        );

        let msg = ClientMessage::decode(r#"{"type":"ping","id":7}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping { id: Some(json!(7)) });

        let msg = ClientMessage::decode(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping { id: None });
    }

    #[test]
    fn test_decode_legacy_message_type() {
        let msg = ClientMessage::decode(r#"{"messageType":"whoami","id":3}"#).unwrap();
        assert_eq!(msg, ClientMessage::WhoAmI { id: Some(json!(3)) });

        let msg = ClientMessage::decode(r#"{"messageType":"client_id","value":"tab-1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::ClientId {
                value: "tab-1".to_string()
            }
        );
    }

    #[test]
    fn test_type_takes_precedence_over_message_type() {
        let msg = ClientMessage::decode(r#"{"type":"ping","messageType":"whoami"}"#).unwrap();
        assert_eq!(msg.kind(), "ping");
    }

    #[test]
    fn test_kind_names_each_message() {
        let frames = [
            (r#"{"type":"access-token","value":"t"}"#, "access-token"),
            (r#"{"type":"ping"}"#, "ping"),
            (r#"{"messageType":"whoami"}"#, "whoami"),
            (r#"{"type":"client_id","value":"tab-1"}"#, "client_id"),
            (r#"{"filter":{"clauses":[]}}"#, "filter"),
            (r#"{"type":"hello"}"#, "hello"),
        ];
        for (frame, kind) in frames {
            assert_eq!(ClientMessage::decode(frame).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_decode_filter_inferred_from_key() {
        let msg = ClientMessage::decode(
            r#"{"filter":{"clauses":[{"field":"/uri","operator":"one_of","value":["https://a.com"]}]}}"#,
        )
        .unwrap();

        match msg {
            ClientMessage::Filter { filter } => {
                assert_eq!(filter.clauses.len(), 1);
                assert_eq!(filter.clauses[0].field.as_deref(), Some("/uri"));
                assert_eq!(filter.clauses[0].value, Some(json!(["https://a.com"])));
            }
            other => panic!("Expected Filter, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_filter_with_explicit_type() {
        let msg = ClientMessage::decode(r#"{"type":"filter","filter":{"clauses":[]}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Filter {
                filter: RawFilter::default()
            }
        );
    }

    #[test]
    fn test_decode_filter_type_without_filter_is_protocol_error() {
        let err = ClientMessage::decode(r#"{"type":"filter"}"#).unwrap_err();
        assert!(matches!(err, NotifyError::Protocol(_)));
    }

    #[test]
    fn test_decode_unknown_kind() {
        let msg = ClientMessage::decode(r#"{"type":"hello","data":{}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Unknown {
                kind: "hello".to_string()
            }
        );

        let msg = ClientMessage::decode(r#"{"data":{}}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Unknown {
                kind: String::new()
            }
        );
    }

    #[test]
    fn test_decode_malformed_frames() {
        for text in ["not json", "[1,2,3]", "\"ping\"", r#"{"type":"ping","id":"#] {
            let err = ClientMessage::decode(text).unwrap_err();
            assert!(
                matches!(err, NotifyError::Protocol(_)),
                "{} should be a protocol error",
                text
            );
        }
    }

    #[test]
    fn test_decode_wrongly_typed_payload() {
        let err = ClientMessage::decode(r#"{"type":"access-token","value":42}"#).unwrap_err();
        assert!(matches!(err, NotifyError::Protocol(_)));
    }

    // === Encoding ===

    #[test]
    fn test_pong_serialization() {
        let json = serde_json::to_value(ServerMessage::pong(Some(json!("corr-1")))).unwrap();
        assert_eq!(json, json!({"type": "pong", "ok": true, "reply_to": "corr-1"}));
    }

    #[test]
    fn test_pong_without_correlation_id() {
        let json = serde_json::to_value(ServerMessage::pong(None)).unwrap();
        assert_eq!(json, json!({"type": "pong", "ok": true}));
    }

    #[test]
    fn test_whoyouare_serialization() {
        let msg = ServerMessage::who_you_are(Some(json!(2)), "acct:jane@example.org".to_string());
        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(
            json,
            json!({"type": "whoyouare", "ok": true, "reply_to": 2, "userid": "acct:jane@example.org"})
        );
    }

    #[test]
    fn test_notification_serialization() {
        let msg = ServerMessage::notification(AnnotationAction::Delete, vec![json!({"id": "ann1"})]);
        assert_eq!(msg.action(), Some(AnnotationAction::Delete));

        let json = serde_json::to_value(msg).unwrap();
        assert_eq!(json, json!({"type": "delete", "payload": [{"id": "ann1"}]}));

        let msg = ServerMessage::notification(AnnotationAction::Create, vec![json!({"id": "ann2"})]);
        assert_eq!(serde_json::to_value(msg).unwrap()["type"], "create");
    }

    #[test]
    fn test_pong_is_not_a_notification() {
        assert_eq!(ServerMessage::pong(None).action(), None);
    }

    // === Close status ===

    #[test]
    fn test_close_status_codes() {
        assert_eq!(CloseStatus::Normal.code(), 1000);
        assert_eq!(CloseStatus::ProtocolError.code(), 1002);
        assert_eq!(CloseStatus::NotAcceptable.code(), 1003);
        assert_eq!(CloseStatus::ServerError.code(), 1011);
    }

    #[test]
    fn test_close_status_for_errors() {
        assert_eq!(
            CloseStatus::for_error(&NotifyError::Authentication("bad".into())),
            CloseStatus::NotAcceptable
        );
        assert_eq!(
            CloseStatus::for_error(&NotifyError::Protocol("early".into())),
            CloseStatus::ProtocolError
        );
        assert_eq!(
            CloseStatus::for_error(&NotifyError::InvalidFilter(FilterError::NoClauses)),
            CloseStatus::ServerError
        );
        assert_eq!(
            CloseStatus::for_error(&NotifyError::Internal("boom".into())),
            CloseStatus::ServerError
        );
    }
}
