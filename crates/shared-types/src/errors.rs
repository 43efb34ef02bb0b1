//! # Error Types
//!
//! Error taxonomy shared across subsystems. Startup failures are fatal and
//! live in `subsystem_trait`; everything here is reported only to the caller
//! or log stream that produced it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::CallId;

/// Kind of an invocation failure reported back through `call:result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvocationErrorKind {
    /// The request named a method that is not registered.
    MethodNotFound,
    /// The method ran and failed (bad arguments, returned error, panic).
    InvocationFailure,
}

/// Error half of an invocation result. Serializable so it can travel to the
/// remote UI unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct InvocationError {
    /// Failure category.
    pub kind: InvocationErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl InvocationError {
    /// `MethodNotFound` for `method`.
    pub fn method_not_found(method: &str) -> Self {
        Self {
            kind: InvocationErrorKind::MethodNotFound,
            message: format!("method not found: {method}"),
        }
    }

    /// `InvocationFailure` with a message.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: InvocationErrorKind::InvocationFailure,
            message: message.into(),
        }
    }
}

/// Errors surfaced to a caller blocked in `CallSubsystem::issue`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No registered method matches the requested name.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// The method itself failed.
    #[error("Invocation of {method} failed: {message}")]
    InvocationFailure { method: String, message: String },

    /// No result arrived within the bound.
    #[error("Call {call_id} to {method} timed out after {timeout_ms}ms")]
    CallTimeout {
        call_id: CallId,
        method: String,
        timeout_ms: u64,
    },

    /// The call subsystem stopped while the call was outstanding.
    #[error("Call to {method} aborted: call subsystem stopped")]
    CallAborted { method: String },

    /// Arguments or result could not be encoded.
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl CallError {
    /// Map an invocation error reported by the binding subsystem.
    pub fn from_invocation(method: &str, err: InvocationError) -> Self {
        match err.kind {
            InvocationErrorKind::MethodNotFound => Self::MethodNotFound(method.to_string()),
            InvocationErrorKind::InvocationFailure => Self::InvocationFailure {
                method: method.to_string(),
                message: err.message,
            },
        }
    }
}

/// Errors reported by a transport. Always non-fatal for the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport is not accepting messages (not started or stopped).
    #[error("Transport closed")]
    Closed,

    /// Delivery to connected clients failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// The transport could not bind its listen address.
    #[error("Bind to {address} failed: {reason}")]
    Bind { address: String, reason: String },

    /// No reply arrived for a request before its deadline.
    #[error("No result for call {call_id} within {timeout_ms}ms")]
    Timeout { call_id: CallId, timeout_ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_error_maps_to_call_error() {
        let err = CallError::from_invocation("Add", InvocationError::method_not_found("Add"));
        assert_eq!(err, CallError::MethodNotFound("Add".into()));

        let err = CallError::from_invocation("Add", InvocationError::failure("boom"));
        assert!(matches!(err, CallError::InvocationFailure { ref message, .. } if message == "boom"));
    }

    #[test]
    fn test_invocation_error_serializes_kind_camel_case() {
        let json = serde_json::to_value(InvocationError::method_not_found("X")).unwrap();
        assert_eq!(json["kind"], "methodNotFound");
    }
}
