//! # Transport Envelope
//!
//! The only shape the dispatcher exchanges with a transport. Framing and
//! encoding on the wire are the transport's concern; this crate only fixes
//! the JSON field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnvelopeKind {
    /// An event, in either direction.
    Event,
    /// A result for a remote-originated call (outbound only).
    CallResult,
    /// An invocation request from the remote UI (inbound only).
    Call,
    /// A log line from the remote UI (inbound only).
    Log,
}

/// Message exchanged with remote clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Bus topic the message belongs to (for `log` the level topic, e.g.
    /// `log:info`).
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            topic: topic.into(),
            payload,
        }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a JSON text frame.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
