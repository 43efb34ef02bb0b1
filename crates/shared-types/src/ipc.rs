//! # Bus Messages
//!
//! The `Message` routed by the service bus and the topic-specific payloads
//! carried inside it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::{CallId, LogLevel, Origin, SubsystemId};
use crate::errors::InvocationError;

/// A message routed by the service bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Concrete topic the message was published on.
    pub topic: String,
    /// Topic-specific payload.
    pub payload: Payload,
    /// Publisher identity.
    pub sender: SubsystemId,
}

impl Message {
    /// Create a new message.
    pub fn new(sender: SubsystemId, topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            topic: topic.into(),
            payload,
            sender,
        }
    }
}

/// Payloads that flow through the bus. Subscribers match on the variant they
/// expect for their topic and log anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Payload {
    /// `log:<level>`
    Log(LogRecord),
    /// `call:request`
    InvocationRequest(InvocationRequest),
    /// `call:result`
    InvocationResult(InvocationResult),
    /// `event:emit`, `event:in`
    Event(EventPayload),
    /// Application-defined topics.
    Value(Value),
}

impl Payload {
    /// Short one-line description used by bus debug tracing.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Log(record) => format!("log[{}] {}", record.level, record.message),
            Self::InvocationRequest(req) => format!(
                "request {} {} ({} args, {:?})",
                req.call_id,
                req.method,
                req.args.len(),
                req.origin
            ),
            Self::InvocationResult(res) => format!(
                "result {} {} ({:?})",
                res.call_id,
                if res.result.is_ok() { "ok" } else { "err" },
                res.origin
            ),
            Self::Event(event) => format!("event {} ({:?})", event.name, event.origin),
            Self::Value(value) => {
                let mut text = value.to_string();
                if text.len() > 64 {
                    let mut end = 64;
                    while !text.is_char_boundary(end) {
                        end -= 1;
                    }
                    text.truncate(end);
                    text.push_str("...");
                }
                text
            }
        }
    }
}

/// A log line to forward to the process logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Request to invoke a bound method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub call_id: CallId,
    /// Qualified (`Owner.Method`) or unqualified method name.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub origin: Origin,
}

/// Result of an invocation, always tagged with the request's `call_id` and
/// origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub call_id: CallId,
    pub origin: Origin,
    pub result: Result<Value, InvocationError>,
}

/// A named event with arbitrary data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub name: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub origin: Origin,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summary_truncates_large_values() {
        let payload = Payload::Value(json!("x".repeat(200)));
        let summary = payload.summary();
        assert!(summary.len() <= 67);
        assert!(summary.ends_with("..."));
    }

    #[test]
    fn test_request_defaults_when_decoding() {
        let req: InvocationRequest =
            serde_json::from_value(json!({"callId": "1", "method": "Add"})).unwrap();
        assert!(req.args.is_empty());
        assert_eq!(req.origin, Origin::Local);
    }

    #[test]
    fn test_result_summary_marks_errors() {
        let payload = Payload::InvocationResult(InvocationResult {
            call_id: CallId::new("42"),
            origin: Origin::Remote,
            result: Err(InvocationError::failure("nope")),
        });
        assert!(payload.summary().contains("err"));
    }
}
