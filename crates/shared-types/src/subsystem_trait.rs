//! # Subsystem Trait
//!
//! The contract every bus participant implements so the orchestrator can
//! bring it up and tear it down without knowing what it does.
//!
//! ## Example Implementation
//!
//! ```rust,ignore
//! use shared_types::{Subsystem, SubsystemError, SubsystemId, SubsystemStatus};
//! use async_trait::async_trait;
//!
//! pub struct MySubsystem { /* ... */ }
//!
//! #[async_trait]
//! impl Subsystem for MySubsystem {
//!     fn id(&self) -> SubsystemId { SubsystemId::Logging }
//!     async fn start(&self) -> Result<(), SubsystemError> { Ok(()) }
//!     async fn stop(&self) -> Result<(), SubsystemError> { Ok(()) }
//!     fn status(&self) -> SubsystemStatus { SubsystemStatus::Running }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::entities::SubsystemId;

/// Error type for subsystem lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("[{subsystem}] {kind}: {message}")]
pub struct SubsystemError {
    /// The subsystem that encountered the error.
    pub subsystem: SubsystemId,
    /// Error kind.
    pub kind: SubsystemErrorKind,
    /// Human-readable error message.
    pub message: String,
}

impl SubsystemError {
    /// A `StartupFailure` for `subsystem`.
    pub fn startup(subsystem: SubsystemId, message: impl Into<String>) -> Self {
        Self {
            subsystem,
            kind: SubsystemErrorKind::StartupFailure,
            message: message.into(),
        }
    }

    /// A `ShutdownFailed` for `subsystem`.
    pub fn shutdown(subsystem: SubsystemId, message: impl Into<String>) -> Self {
        Self {
            subsystem,
            kind: SubsystemErrorKind::ShutdownFailed,
            message: message.into(),
        }
    }
}

/// Categories of subsystem errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemErrorKind {
    /// Subsystem failed to initialize. Fatal for bring-up.
    StartupFailure,
    /// A second instance of a named subsystem was registered.
    AlreadyRegistered,
    /// Subsystem failed to shut down gracefully.
    ShutdownFailed,
}

impl fmt::Display for SubsystemErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartupFailure => write!(f, "StartupFailure"),
            Self::AlreadyRegistered => write!(f, "AlreadyRegistered"),
            Self::ShutdownFailed => write!(f, "ShutdownFailed"),
        }
    }
}

/// Lifecycle status of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubsystemStatus {
    /// Constructed, not started.
    Registered,
    /// `start()` in progress.
    Starting,
    /// Subscriptions registered, processing messages.
    Running,
    /// Stopped gracefully.
    Stopped,
    /// `start()` returned an error.
    Failed,
}

/// The core trait that all subsystems implement.
///
/// A subsystem owns its subscriptions and releases them when it stops.
/// `start()` only registers subscriptions and spawns background work; it
/// must return promptly.
#[async_trait]
pub trait Subsystem: Send + Sync {
    /// Get the unique identifier for this subsystem.
    fn id(&self) -> SubsystemId;

    /// Get the subsystem name.
    fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Register subscriptions and spawn background work.
    async fn start(&self) -> Result<(), SubsystemError>;

    /// Release subscriptions and join background work. Must be safe to call
    /// more than once and on a subsystem that never started.
    async fn stop(&self) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Get the current status.
    fn status(&self) -> SubsystemStatus;
}
