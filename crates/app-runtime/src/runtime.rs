//! # Runtime Handle
//!
//! The handle application hooks receive. It wraps bus access and emission
//! towards the remote UI.
//!
//! Everything published through the handle before the application marks it
//! ready is held, in order, and released onto the bus by `mark_ready()`. The
//! startup hook therefore runs before any subsystem is subscribed without
//! losing what it emits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use shared_bus::ServiceBus;
use shared_types::{topics, EventPayload, LogLevel, LogRecord, Message, Origin, Payload, SubsystemId};
use tokio::sync::watch;
use tracing::{debug, info};

/// Hook run once after the runtime starts.
pub type StartupHook = Box<dyn FnOnce(Runtime) + Send>;

struct Gate {
    ready: bool,
    held: Vec<Message>,
}

struct Inner {
    bus: Arc<ServiceBus>,
    gate: Mutex<Gate>,
    started: AtomicBool,
    quit: watch::Sender<bool>,
}

/// Cloneable handle exposed to application code.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    pub fn new(bus: Arc<ServiceBus>) -> Self {
        let (quit, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                bus,
                gate: Mutex::new(Gate {
                    ready: false,
                    held: Vec::new(),
                }),
                started: AtomicBool::new(false),
                quit,
            }),
        }
    }

    /// Start the runtime, running `hook` with a clone of this handle. Only
    /// the first call has any effect.
    pub fn start(&self, hook: Option<StartupHook>) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            debug!("Runtime already started");
            return;
        }
        info!("Runtime started");
        if let Some(hook) = hook {
            hook(self.clone());
        }
    }

    /// Emit a named event to the remote UI and local listeners.
    pub fn emit(&self, name: &str, data: Value) {
        self.submit(Message::new(
            SubsystemId::Runtime,
            topics::EVENT_EMIT,
            Payload::Event(EventPayload {
                name: name.to_string(),
                data,
                origin: Origin::Local,
            }),
        ));
    }

    /// Publish an arbitrary message.
    pub fn publish(&self, topic: &str, payload: Payload) {
        self.submit(Message::new(SubsystemId::Runtime, topic, payload));
    }

    /// Send a line to the logging subsystem.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.submit(Message::new(
            SubsystemId::Runtime,
            level.topic(),
            Payload::Log(LogRecord::new(level, message)),
        ));
    }

    /// The bus itself, for code that needs to subscribe.
    #[must_use]
    pub fn bus(&self) -> Arc<ServiceBus> {
        Arc::clone(&self.inner.bus)
    }

    /// Release held messages and publish directly from now on.
    pub fn mark_ready(&self) {
        let mut gate = self.inner.gate.lock();
        if gate.ready {
            return;
        }
        gate.ready = true;
        let held = std::mem::take(&mut gate.held);
        if !held.is_empty() {
            debug!(count = held.len(), "Releasing messages held before ready");
        }
        for message in held {
            self.inner.bus.publish(message);
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.gate.lock().ready
    }

    /// Number of messages waiting for `mark_ready()`.
    #[must_use]
    pub fn held(&self) -> usize {
        self.inner.gate.lock().held.len()
    }

    /// Ask the application to shut down.
    pub fn quit(&self) {
        info!("Shutdown requested by application");
        self.inner.quit.send_replace(true);
    }

    /// Resolve once `quit()` has been called.
    pub async fn quit_requested(&self) {
        let mut quit = self.inner.quit.subscribe();
        // The sender lives in `self`, so `changed()` cannot fail here.
        while !*quit.borrow_and_update() {
            if quit.changed().await.is_err() {
                return;
            }
        }
    }

    fn submit(&self, message: Message) {
        let mut gate = self.inner.gate.lock();
        if gate.ready {
            // Publish under the gate lock so nothing overtakes the flush.
            self.inner.bus.publish(message);
        } else {
            gate.held.push(message);
        }
    }
}
