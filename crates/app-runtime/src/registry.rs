//! # Subsystem Registry
//!
//! Owns the started-in-order list of subsystems and their lifecycle status.
//!
//! - One instance per `SubsystemId`; a second registration is rejected.
//! - `start_all()` starts in registration order. When one fails, the ones
//!   already started are stopped again in reverse order before the error is
//!   returned.
//! - `stop_all()` stops in reverse order and keeps going past failures.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::{Subsystem, SubsystemError, SubsystemErrorKind, SubsystemId, SubsystemStatus};
use tracing::{error, info, warn};

/// Shared handle to a registered subsystem.
pub type DynSubsystem = Arc<dyn Subsystem>;

/// Registry for the core subsystems.
#[derive(Default)]
pub struct SubsystemRegistry {
    /// Registration order, which is also start order.
    subsystems: Vec<DynSubsystem>,
    /// Status as seen by the registry.
    status: RwLock<HashMap<SubsystemId, SubsystemStatus>>,
}

impl SubsystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subsystem. It is started later by `start_all()`.
    pub fn register(&mut self, subsystem: DynSubsystem) -> Result<(), SubsystemError> {
        let id = subsystem.id();
        if self.is_registered(id) {
            return Err(SubsystemError {
                subsystem: id,
                kind: SubsystemErrorKind::AlreadyRegistered,
                message: format!("{} is already registered", id.name()),
            });
        }

        info!("[Registry] Registering {}", id);
        self.status.write().insert(id, SubsystemStatus::Registered);
        self.subsystems.push(subsystem);
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, id: SubsystemId) -> bool {
        self.subsystems.iter().any(|s| s.id() == id)
    }

    #[must_use]
    pub fn status(&self, id: SubsystemId) -> Option<SubsystemStatus> {
        self.status.read().get(&id).copied()
    }

    /// Ids in start order.
    #[must_use]
    pub fn registered_ids(&self) -> Vec<SubsystemId> {
        self.subsystems.iter().map(|s| s.id()).collect()
    }

    /// `(id, status)` for every subsystem in start order.
    #[must_use]
    pub fn statuses(&self) -> Vec<(SubsystemId, SubsystemStatus)> {
        let status = self.status.read();
        self.subsystems
            .iter()
            .map(|s| {
                let id = s.id();
                (id, status.get(&id).copied().unwrap_or(SubsystemStatus::Registered))
            })
            .collect()
    }

    fn set_status(&self, id: SubsystemId, status: SubsystemStatus) {
        self.status.write().insert(id, status);
    }

    /// Start every subsystem in registration order.
    pub async fn start_all(&self) -> Result<(), SubsystemError> {
        info!("[Registry] Starting {} subsystems", self.subsystems.len());

        for (index, subsystem) in self.subsystems.iter().enumerate() {
            let id = subsystem.id();
            self.set_status(id, SubsystemStatus::Starting);

            match subsystem.start().await {
                Ok(()) => {
                    self.set_status(id, SubsystemStatus::Running);
                    info!("[Registry] ✓ {} started", id);
                }
                Err(e) => {
                    self.set_status(id, SubsystemStatus::Failed);
                    error!("[Registry] ✗ {} failed to start: {}", id, e);
                    self.rollback(&self.subsystems[..index]).await;
                    return Err(e);
                }
            }
        }

        info!("[Registry] All subsystems started");
        Ok(())
    }

    async fn rollback(&self, started: &[DynSubsystem]) {
        for subsystem in started.iter().rev() {
            let id = subsystem.id();
            warn!("[Registry] Rolling back {}", id);
            if let Err(e) = subsystem.stop().await {
                error!("[Registry] ✗ {} failed to stop during rollback: {}", id, e);
            }
            self.set_status(id, SubsystemStatus::Stopped);
        }
    }

    /// Stop every running subsystem in reverse order. Failures are logged and
    /// the first one is returned after the rest have been stopped.
    pub async fn stop_all(&self) -> Result<(), SubsystemError> {
        info!("[Registry] Stopping all subsystems");
        let mut first_error = None;

        for subsystem in self.subsystems.iter().rev() {
            let id = subsystem.id();
            if !matches!(
                self.status(id),
                Some(SubsystemStatus::Running | SubsystemStatus::Starting)
            ) {
                continue;
            }

            match subsystem.stop().await {
                Ok(()) => {
                    self.set_status(id, SubsystemStatus::Stopped);
                    info!("[Registry] ✓ {} stopped", id);
                }
                Err(e) => {
                    self.set_status(id, SubsystemStatus::Failed);
                    error!("[Registry] ✗ {} failed to stop cleanly: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("[Registry] All subsystems stopped");
        first_error.map_or(Ok(()), Err)
    }
}
