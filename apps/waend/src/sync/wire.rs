use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::SyncError;
use crate::model::ModelKind;

/// Push scope: entity type plus id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    #[serde(rename = "type")]
    pub kind: ModelKind,
    pub id: String,
}

impl ChannelDescriptor {
    pub fn new(kind: ModelKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Create,
    Update,
    Delete,
    Other(String),
}

impl SyncEvent {
    pub fn parse(name: &str) -> Self {
        match name {
            "create" => SyncEvent::Create,
            "update" => SyncEvent::Update,
            "delete" => SyncEvent::Delete,
            other => SyncEvent::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SyncEvent::Create => "create",
            SyncEvent::Update => "update",
            SyncEvent::Delete => "delete",
            SyncEvent::Other(name) => name,
        }
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound push frame: `[channel, event, payload]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncMessage {
    pub channel: ChannelDescriptor,
    pub event: SyncEvent,
    /// A full document for create/update, a bare id for delete.
    pub payload: Value,
}

impl SyncMessage {
    /// Id the payload refers to, whether it is a document or a bare id.
    pub fn payload_id(&self) -> Option<&str> {
        match &self.payload {
            Value::String(id) => Some(id),
            Value::Object(map) => map.get("id").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn to_frame(&self) -> Value {
        json!([self.channel, self.event.as_str(), self.payload])
    }
}

pub fn parse_message(text: &str) -> Result<SyncMessage, SyncError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| SyncError::Malformed(err.to_string()))?;
    let Value::Array(mut items) = value else {
        return Err(SyncError::Malformed("frame is not an array".into()));
    };
    if items.len() < 2 {
        return Err(SyncError::Malformed(format!(
            "frame has {} element(s), expected at least 2",
            items.len()
        )));
    }
    let payload = if items.len() > 2 {
        items.swap_remove(2)
    } else {
        Value::Null
    };
    let event = items[1]
        .as_str()
        .map(SyncEvent::parse)
        .ok_or_else(|| SyncError::Malformed("event name is not a string".into()))?;
    let channel: ChannelDescriptor = serde_json::from_value(items.swap_remove(0))
        .map_err(|err| SyncError::Malformed(format!("bad channel descriptor: {err}")))?;
    Ok(SyncMessage {
        channel,
        event,
        payload,
    })
}

/// Outbound subscribe triple.
pub fn subscribe_frame(kind: ModelKind, id: &str) -> Vec<Value> {
    vec![json!("sub"), json!(kind.as_str()), json!(id)]
}
