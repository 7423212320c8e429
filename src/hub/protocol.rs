//! Hub Wire Protocol
//!
//! Single responsibility: Encode commands and decode envelopes in the hub's JSON wire format.
//!
//! # Wire Format
//!
//! Every frame is one JSON object in a WebSocket text message.
//!
//! ## Outbound Command
//! ```text
//! {
//!     "id": <u64>,           // Omitted for the auth message only
//!     "type": <string>,      // Command kind
//!     ...                    // Command-specific fields
//! }
//! ```
//!
//! ## Inbound Envelope
//! ```text
//! {
//!     "id": <u64>,
//!     "type": "result" | "event" | "auth_required" | "auth_ok" | "auth_invalid",
//!     "success": <bool>,                       // result only
//!     "result": <any>,                         // result only
//!     "error": { "code": <string>, "message": <string> },
//!     "event": { "event_type": <string>, "data": <any> },
//!     "message": <string>                      // auth_invalid only
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HubError;

/// Kind of the credential message, the one command allowed before auth.
pub const AUTH_KIND: &str = "auth";

/// A typed command that can be written to the hub.
///
/// Implementors serialize to a JSON object holding only their own fields;
/// the codec adds `type` and `id`.
pub trait Command: Serialize {
    /// Value of the `type` field.
    fn kind(&self) -> &str;
}

/// Credential message answering `auth_required`.
#[derive(Debug, Clone, Serialize)]
pub struct Auth {
    pub access_token: String,
}

impl Command for Auth {
    fn kind(&self) -> &str {
        AUTH_KIND
    }
}

/// Ask the hub to stream events of one type on this connection.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeEvents {
    pub event_type: String,
}

impl Command for SubscribeEvents {
    fn kind(&self) -> &str {
        "subscribe_events"
    }
}

/// A command assembled at runtime, for remote calls without a typed struct.
#[derive(Debug, Clone, Serialize)]
pub struct RawCommand {
    #[serde(skip)]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl RawCommand {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a field, builder style.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

impl Command for RawCommand {
    fn kind(&self) -> &str {
        &self.kind
    }
}

/// Encode a command into a text frame.
///
/// `id` is `None` only for the auth message.
pub fn encode_command<C: Command + ?Sized>(id: Option<u64>, command: &C) -> Result<String, HubError> {
    let fields = serde_json::to_value(command)
        .map_err(|e| HubError::Codec(format!("Failed to encode {}: {}", command.kind(), e)))?;

    let mut object = match fields {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(HubError::Codec(format!(
                "Command {} must serialize to an object, got {}",
                command.kind(),
                other
            )))
        }
    };

    // Envelope fields win over anything the command carried
    object.insert("type".into(), Value::String(command.kind().to_string()));
    match id {
        Some(id) => {
            object.insert("id".into(), Value::from(id));
        }
        None => {
            object.remove("id");
        }
    }

    serde_json::to_string(&object)
        .map_err(|e| HubError::Codec(format!("Failed to encode {}: {}", command.kind(), e)))
}

/// Kind of an inbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Result,
    Event,
    AuthRequired,
    AuthOk,
    AuthInvalid,
    #[serde(other)]
    Unknown,
}

/// Error object attached to a failed result.
///
/// Missing fields decode empty; the error still belongs to its caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

impl From<WireError> for HubError {
    fn from(e: WireError) -> Self {
        HubError::Protocol {
            code: e.code,
            message: e.message,
        }
    }
}

/// A pushed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventData {
    /// Empty when the hub omitted it; such events match no handler
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_fired: Option<String>,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub event: Option<EventData>,
    #[serde(default)]
    pub error: Option<WireError>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Envelope {
    /// Outcome of a `result` envelope, before decoding into the caller's type.
    ///
    /// Precedence: reported error, then an explicit `success: false`,
    /// then the payload (`null` when absent).
    pub fn into_outcome(self) -> Result<Value, HubError> {
        if let Some(error) = self.error {
            return Err(error.into());
        }
        if self.success == Some(false) {
            return Err(HubError::UnknownFailure);
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Decode a text frame.
pub fn decode_envelope(text: &str) -> Result<Envelope, HubError> {
    serde_json::from_str(text).map_err(|e| HubError::Codec(format!("Failed to decode frame: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_message_has_no_id() {
        let auth = Auth {
            access_token: "secret".into(),
        };
        let text = encode_command(None, &auth).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "secret"}));
    }

    #[test]
    fn test_command_carries_id_and_type() {
        let cmd = SubscribeEvents {
            event_type: "state_changed".into(),
        };
        let text = encode_command(Some(7), &cmd).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"id": 7, "type": "subscribe_events", "event_type": "state_changed"})
        );
    }

    #[test]
    fn test_raw_command_fields_flatten() {
        let cmd = RawCommand::new("ping").field("note", "hi");
        let value: Value = serde_json::from_str(&encode_command(Some(1), &cmd).unwrap()).unwrap();
        assert_eq!(value, json!({"id": 1, "type": "ping", "note": "hi"}));
    }

    #[test]
    fn test_envelope_fields_cannot_be_overridden() {
        let cmd = RawCommand::new("get_states").field("id", 99).field("type", "auth");
        let value: Value = serde_json::from_str(&encode_command(Some(3), &cmd).unwrap()).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["type"], "get_states");
    }

    #[test]
    fn test_non_object_command_rejected() {
        struct Bare;
        impl Serialize for Bare {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_u32(5)
            }
        }
        impl Command for Bare {
            fn kind(&self) -> &str {
                "bare"
            }
        }
        assert!(matches!(encode_command(Some(1), &Bare), Err(HubError::Codec(_))));
    }

    #[test]
    fn test_decode_kinds() {
        let env = decode_envelope(r#"{"type":"auth_required","ha_version":"2024.1"}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::AuthRequired);
        assert_eq!(env.id, None);

        let env = decode_envelope(r#"{"type":"auth_invalid","message":"Invalid password"}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::AuthInvalid);
        assert_eq!(env.message.as_deref(), Some("Invalid password"));

        let env = decode_envelope(r#"{"id":4,"type":"pong"}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Unknown);
    }

    #[test]
    fn test_decode_event() {
        let env = decode_envelope(
            r#"{"id":2,"type":"event","event":{"event_type":"state_changed","data":{"entity_id":"light.a"},"origin":"LOCAL"}}"#,
        )
        .unwrap();
        let event = env.event.unwrap();
        assert_eq!(event.event_type, "state_changed");
        assert_eq!(event.data["entity_id"], "light.a");
        assert_eq!(event.origin.as_deref(), Some("LOCAL"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_envelope("not json"), Err(HubError::Codec(_))));
    }

    #[test]
    fn test_outcome_precedence() {
        let env = decode_envelope(
            r#"{"id":1,"type":"result","success":false,"error":{"code":"unauthorized","message":"nope"}}"#,
        )
        .unwrap();
        match env.into_outcome() {
            Err(HubError::Protocol { code, message }) => {
                assert_eq!(code, "unauthorized");
                assert_eq!(message, "nope");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }

        let env = decode_envelope(r#"{"id":1,"type":"result","success":false}"#).unwrap();
        assert!(matches!(env.into_outcome(), Err(HubError::UnknownFailure)));

        let env = decode_envelope(r#"{"id":1,"type":"result","success":true}"#).unwrap();
        assert_eq!(env.into_outcome().unwrap(), Value::Null);

        let env = decode_envelope(r#"{"id":1,"type":"result","result":[1,2]}"#).unwrap();
        assert_eq!(env.into_outcome().unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_incomplete_nested_objects_still_decode() {
        let env = decode_envelope(r#"{"id":2,"type":"result","success":false,"error":{"code":"not_found"}}"#).unwrap();
        match env.into_outcome() {
            Err(HubError::Protocol { code, message }) => {
                assert_eq!(code, "not_found");
                assert!(message.is_empty());
            }
            other => panic!("expected protocol error, got {:?}", other),
        }

        let env = decode_envelope(r#"{"type":"event","event":{"data":{}}}"#).unwrap();
        assert_eq!(env.event.unwrap().event_type, "");

        // Wrong types are still a decode failure
        assert!(decode_envelope(r#"{"type":"event","event":{"event_type":5}}"#).is_err());
    }
}
