//! # Background Workers
//!
//! Each subsystem drains its subscriptions on its own task. `BusWorker` owns
//! that task and the shutdown signal used to end it.

use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Receiving half of a worker's shutdown signal.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown was requested.
    pub async fn wait(&mut self) {
        while !*self.receiver.borrow_and_update() {
            if self.receiver.changed().await.is_err() {
                // Worker handle dropped; treat as shutdown.
                return;
            }
        }
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Handle to a subsystem's background task.
pub struct BusWorker {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BusWorker {
    /// Spawn `task` on the current tokio runtime. The task receives a
    /// `ShutdownSignal` it must select on.
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown, receiver) = watch::channel(false);
        let handle = tokio::spawn(task(ShutdownSignal { receiver }));
        debug!(worker = name, "Worker spawned");
        Self {
            name,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signal shutdown and wait for the task to finish. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return;
        };
        match handle.await {
            Ok(()) => debug!(worker = self.name, "Worker stopped"),
            Err(e) if e.is_panic() => error!(worker = self.name, "Worker panicked: {}", e),
            Err(e) => debug!(worker = self.name, "Worker cancelled: {}", e),
        }
    }

    /// Whether the task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for BusWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
        }
    }
}
