//! Wire message model
//!
//! Every frame on the relay socket is a JSON object with a free-form `type`
//! discriminator. Fields the relay does not know about are carried through
//! untouched, so clients can extend the payload without server changes.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{RelayError, Result};

/// Full-document replace payload sent by editors
pub const KIND_CODE: &str = "code";
/// Server-originated notice
pub const KIND_SYSTEM: &str = "system";
/// Malformed-input notice, only ever sent back to the offending sender
pub const KIND_ERROR: &str = "error";

pub const WELCOME_NOTICE: &str = "Connected to WebSocket server";
pub const INVALID_FORMAT_NOTICE: &str = "Invalid message format";
pub const SHUTDOWN_NOTICE: &str = "Server shutting down";

/// A serialized message ready to be queued on any number of connections
pub type Frame = Arc<str>;

/// One relay message as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,

    /// `None` only when the key was absent; an explicit null is kept
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub content: Option<Value>,

    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub username: Option<Option<String>>,

    /// Server-assigned; whatever the client sent here is discarded on relay
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WireMessage {
    /// Create a message of the given kind with no timestamp
    pub fn new(kind: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            content: Some(content.into()),
            username: None,
            timestamp: None,
            extra: Map::new(),
        }
    }

    /// Server notice, stamped now
    pub fn system(content: impl Into<Value>) -> Self {
        Self::new(KIND_SYSTEM, content).stamped()
    }

    /// Error notice, stamped now
    pub fn error(content: impl Into<Value>) -> Self {
        Self::new(KIND_ERROR, content).stamped()
    }

    /// Parse one inbound frame
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Overwrite the timestamp with the relay's clock
    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(timestamp_now());
        self
    }

    /// Serialize once for fan-out
    pub fn to_frame(&self) -> Result<Frame> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|e| RelayError::Serialization(e.to_string()))
    }
}

/// Current time as ISO-8601 UTC with millisecond precision
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Only called when the key is present, so a null value stays distinguishable
// from a missing key.
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

// Clients are not the timestamp authority, so a bogus value must not make the
// whole message malformed.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}
