//! Application-level errors.

use shared_types::SubsystemError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors returned by the application lifecycle.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration rejected during the configure phase.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A subsystem or the transport failed to start. Fatal.
    #[error("Startup failed: {0}")]
    Startup(#[from] SubsystemError),

    /// A lifecycle call was made in the wrong phase.
    #[error("Cannot {action} while {phase:?}")]
    InvalidPhase {
        action: &'static str,
        phase: crate::app::Phase,
    },
}
