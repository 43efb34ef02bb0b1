//! Translation between bus messages and transport envelopes.

use serde::Deserialize;
use serde_json::Value;
use shared_types::{
    topics, Envelope, EnvelopeKind, EventPayload, InvocationRequest, LogLevel, LogRecord, Message,
    Origin, Payload, SubsystemId,
};
use thiserror::Error;

/// Reasons an inbound envelope is rejected.
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("envelope kind {0:?} is not accepted from clients")]
    UnexpectedKind(EnvelopeKind),

    #[error("log topic {0:?} does not name a level")]
    BadLogTopic(String),

    #[error("invalid {kind:?} payload: {source}")]
    Payload {
        kind: EnvelopeKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogBody {
    Text(String),
    Record { message: String },
    Other(Value),
}

/// Convert a bus message to the envelope that should leave the process.
///
/// Returns `Ok(None)` for messages that stay local: results of calls the
/// backend issued itself, and anything on a topic the dispatcher does not
/// relay.
pub fn encode_outbound(message: &Message) -> Result<Option<Envelope>, serde_json::Error> {
    match (&message.payload, message.topic.as_str()) {
        (Payload::Event(event), topics::EVENT_EMIT) => Ok(Some(Envelope::new(
            EnvelopeKind::Event,
            topics::EVENT_EMIT,
            serde_json::to_value(event)?,
        ))),
        (Payload::InvocationResult(result), topics::CALL_RESULT)
            if result.origin == Origin::Remote =>
        {
            Ok(Some(Envelope::new(
                EnvelopeKind::CallResult,
                topics::CALL_RESULT,
                serde_json::to_value(result)?,
            )))
        }
        _ => Ok(None),
    }
}

/// Convert a client envelope to the bus message it stands for. Everything
/// that arrives this way is tagged `Origin::Remote`.
pub fn decode_inbound(envelope: Envelope) -> Result<Message, InboundError> {
    let kind = envelope.kind;
    let payload_error = |source| InboundError::Payload { kind, source };

    match kind {
        EnvelopeKind::Event => {
            let mut event: EventPayload =
                serde_json::from_value(envelope.payload).map_err(payload_error)?;
            event.origin = Origin::Remote;
            Ok(Message::new(
                SubsystemId::Transport,
                topics::EVENT_IN,
                Payload::Event(event),
            ))
        }
        EnvelopeKind::Call => {
            let mut request: InvocationRequest =
                serde_json::from_value(envelope.payload).map_err(payload_error)?;
            request.origin = Origin::Remote;
            Ok(Message::new(
                SubsystemId::Transport,
                topics::CALL_REQUEST,
                Payload::InvocationRequest(request),
            ))
        }
        EnvelopeKind::Log => {
            let level: LogLevel = envelope
                .topic
                .strip_prefix(topics::LOG_PREFIX)
                .and_then(|suffix| suffix.parse().ok())
                .ok_or_else(|| InboundError::BadLogTopic(envelope.topic.clone()))?;
            let body: LogBody = serde_json::from_value(envelope.payload).map_err(payload_error)?;
            let text = match body {
                LogBody::Text(text) | LogBody::Record { message: text } => text,
                LogBody::Other(value) => value.to_string(),
            };
            Ok(Message::new(
                SubsystemId::Transport,
                level.topic(),
                Payload::Log(LogRecord::new(level, text)),
            ))
        }
        EnvelopeKind::CallResult => Err(InboundError::UnexpectedKind(kind)),
    }
}
