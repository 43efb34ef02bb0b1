//! # Core Entities
//!
//! Identifiers and small value types shared by every subsystem.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of a bus participant.
///
/// Each named subsystem may have exactly one active instance per bus, so the
/// id doubles as the subsystem's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubsystemId {
    /// The runtime handle exposed to application hooks.
    Runtime,
    /// HB-01: forwards log messages to the process logger.
    Logging,
    /// HB-02: bridges bus topics and the transport.
    Dispatcher,
    /// HB-03: owns the binding registry and runs invocations.
    Binding,
    /// HB-04: event emission and listener fan-out.
    Event,
    /// HB-05: call correlation.
    Call,
    /// The external transport (messages republished by the dispatcher).
    Transport,
    /// Application code outside the core.
    Application,
}

impl SubsystemId {
    /// Get the subsystem name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Logging => "hb-01-logging",
            Self::Dispatcher => "hb-02-dispatcher",
            Self::Binding => "hb-03-binding",
            Self::Event => "hb-04-event",
            Self::Call => "hb-05-call",
            Self::Transport => "transport",
            Self::Application => "application",
        }
    }

    /// The five core subsystems in the order they must be brought up.
    #[must_use]
    pub fn startup_order() -> [SubsystemId; 5] {
        [
            Self::Logging,
            Self::Dispatcher,
            Self::Binding,
            Self::Event,
            Self::Call,
        ]
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Correlation token tying an invocation request to its result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh random call id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap an id supplied by a remote client.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Where a request or event started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Origin {
    /// Backend code in this process.
    #[default]
    Local,
    /// The remote UI, received through the transport.
    Remote,
}

/// Severity levels accepted on the `log:*` topic family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
}

impl LogLevel {
    /// All levels, least severe first.
    pub const ALL: [LogLevel; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Fatal,
    ];

    /// Topic sub-name used for this level (`log:<name>`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Full topic for this level.
    #[must_use]
    pub fn topic(&self) -> String {
        format!("{}{}", crate::topics::LOG_PREFIX, self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a level name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level: {0}")]
pub struct UnknownLogLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(UnknownLogLevel(s.to_string())),
        }
    }
}

/// Public description of a bound method, handed to the transport so it can
/// expose the callable surface to remote clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    /// Owning struct/service name.
    pub owner: String,
    /// Method name within the owner.
    pub method: String,
    /// Number of positional arguments.
    pub arity: usize,
}

impl MethodDescriptor {
    /// `Owner.Method`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.method)
    }
}
