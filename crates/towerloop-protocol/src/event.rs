//! The event tagged union and its JSON envelope.
//!
//! Wire shape: `{ "type": "<name>", "payload": <any> }`. `payload` is
//! omitted for payload-less events such as `ping`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::status::ConnectionStatus;
use crate::types::EventTypes;

/// Raw `{type, payload}` object as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// A single message exchanged through the relay.
///
/// Application payloads stay opaque `Value`s; unrecognised types are kept
/// verbatim in [`Event::Other`] so newer peers do not break older views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Event {
    /// Local connection status change. Never sent over the wire.
    Status(ConnectionStatus),
    /// Heartbeat.
    Ping,
    DronePosition(Value),
    Move(Value),
    VerticalModeChange(Value),
    RefreshPage(Value),
    CaptureSequenceInitiated(Value),
    /// A frame that could not be parsed, carried as its original text.
    RawMessage(String),
    /// Any other well-formed event.
    Other { kind: String, payload: Option<Value> },
}

impl Event {
    pub fn status(status: ConnectionStatus) -> Self {
        Self::Status(status)
    }

    pub fn other(kind: impl Into<String>, payload: Option<Value>) -> Self {
        Self::Other {
            kind: kind.into(),
            payload,
        }
    }

    /// The `type` discriminator of this event.
    pub fn kind(&self) -> &str {
        match self {
            Self::Status(_) => EventTypes::STATUS,
            Self::Ping => EventTypes::PING,
            Self::DronePosition(_) => EventTypes::DRONE_POSITION,
            Self::Move(_) => EventTypes::MOVE,
            Self::VerticalModeChange(_) => EventTypes::VERTICAL_MODE_CHANGE,
            Self::RefreshPage(_) => EventTypes::REFRESH_PAGE,
            Self::CaptureSequenceInitiated(_) => EventTypes::CAPTURE_SEQUENCE_INITIATED,
            Self::RawMessage(_) => EventTypes::RAW_MESSAGE,
            Self::Other { kind, .. } => kind,
        }
    }

    pub fn as_status(&self) -> Option<ConnectionStatus> {
        match self {
            Self::Status(s) => Some(*s),
            _ => None,
        }
    }

    /// Strict decode: malformed input is an error.
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Lenient decode used for inbound frames.
    ///
    /// Anything that fails to decode becomes [`Event::RawMessage`]. A
    /// `status` frame arriving from a peer is not a local status change and
    /// is surfaced as [`Event::Other`].
    pub fn from_wire(text: &str) -> Self {
        let envelope: Envelope = match serde_json::from_str(text) {
            Ok(envelope) => envelope,
            Err(_) => return Self::RawMessage(text.to_string()),
        };

        if envelope.kind == EventTypes::STATUS {
            return Self::Other {
                kind: envelope.kind,
                payload: envelope.payload,
            };
        }

        Self::try_from(envelope).unwrap_or_else(|_| Self::RawMessage(text.to_string()))
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

fn opaque(payload: Option<Value>) -> Value {
    payload.unwrap_or(Value::Null)
}

fn non_null(payload: Value) -> Option<Value> {
    match payload {
        Value::Null => None,
        other => Some(other),
    }
}

impl TryFrom<Envelope> for Event {
    type Error = ProtocolError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let Envelope { kind, payload } = envelope;
        let event = match kind.as_str() {
            EventTypes::STATUS => {
                let name = payload
                    .as_ref()
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProtocolError::invalid_payload(&kind, "expected a status name"))?;
                Self::Status(name.parse()?)
            }
            EventTypes::PING => Self::Ping,
            EventTypes::DRONE_POSITION => Self::DronePosition(opaque(payload)),
            EventTypes::MOVE => Self::Move(opaque(payload)),
            EventTypes::VERTICAL_MODE_CHANGE => Self::VerticalModeChange(opaque(payload)),
            EventTypes::REFRESH_PAGE => Self::RefreshPage(opaque(payload)),
            EventTypes::CAPTURE_SEQUENCE_INITIATED => Self::CaptureSequenceInitiated(opaque(payload)),
            EventTypes::RAW_MESSAGE => match payload {
                Some(Value::String(text)) => Self::RawMessage(text),
                _ => return Err(ProtocolError::invalid_payload(&kind, "expected a string")),
            },
            _ => Self::Other { kind, payload },
        };
        Ok(event)
    }
}

impl From<Event> for Envelope {
    fn from(event: Event) -> Self {
        let kind = event.kind().to_string();
        let payload = match event {
            Event::Status(status) => Some(Value::String(status.as_str().to_string())),
            Event::Ping => None,
            Event::DronePosition(p)
            | Event::Move(p)
            | Event::VerticalModeChange(p)
            | Event::RefreshPage(p)
            | Event::CaptureSequenceInitiated(p) => non_null(p),
            Event::RawMessage(text) => Some(Value::String(text)),
            Event::Other { payload, .. } => payload,
        };
        Self { kind, payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn move_keeps_payload_verbatim() {
        let event = Event::from_wire(r#"{"type":"move","payload":{"x":1,"y":2,"direction":"up"}}"#);
        assert_eq!(event, Event::Move(json!({"x": 1, "y": 2, "direction": "up"})));
    }

    #[test]
    fn ping_serializes_without_payload() {
        assert_eq!(Event::Ping.to_json().unwrap(), r#"{"type":"ping"}"#);
    }

    #[test]
    fn unparseable_frame_becomes_raw_message() {
        let event = Event::from_wire("{not json");
        assert_eq!(event, Event::RawMessage("{not json".into()));

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "raw_message", "payload": "{not json"}));
    }

    #[test]
    fn object_without_type_becomes_raw_message() {
        let event = Event::from_wire(r#"{"payload":1}"#);
        assert_eq!(event, Event::RawMessage(r#"{"payload":1}"#.into()));
    }

    #[test]
    fn inbound_status_is_not_trusted() {
        let event = Event::from_wire(r#"{"type":"status","payload":"CONNECTED"}"#);
        assert_eq!(event, Event::other("status", Some(json!("CONNECTED"))));
        assert!(event.as_status().is_none());
    }

    #[test]
    fn strict_decode_reports_bad_status() {
        let err = Event::from_json(r#"{"type":"status","payload":"SLEEPING"}"#).unwrap_err();
        assert!(err.to_string().contains("SLEEPING"));
    }
}
