//! Event subsystem implementation.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use shared_bus::{BusWorker, ServiceBus};
use shared_types::{
    topics, EventPayload, Message, Origin, Payload, Subsystem, SubsystemError, SubsystemId,
    SubsystemStatus, TopicPattern,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::listeners::{
    EventNotification, ListenerId, ListenerOptions, ListenerRegistry, ListenerScope,
};

/// Emits events and fans incoming ones out to local listeners.
pub struct EventSubsystem {
    bus: Arc<ServiceBus>,
    listeners: Arc<ListenerRegistry>,
    status: RwLock<SubsystemStatus>,
    worker: Mutex<Option<BusWorker>>,
}

impl EventSubsystem {
    pub fn new(bus: Arc<ServiceBus>) -> Self {
        Self {
            bus,
            listeners: Arc::new(ListenerRegistry::new()),
            status: RwLock::new(SubsystemStatus::Registered),
            worker: Mutex::new(None),
        }
    }

    /// Publish a backend event. The dispatcher relays it to the remote UI and
    /// local listeners for `name` receive it too.
    pub fn emit(&self, name: &str, data: Value) {
        self.bus.publish_from(
            SubsystemId::Event,
            topics::EVENT_EMIT,
            Payload::Event(EventPayload {
                name: name.to_string(),
                data,
                origin: Origin::Local,
            }),
        );
    }

    /// Listen for every occurrence of `name`.
    pub fn on<F>(&self, name: &str, callback: F) -> ListenerId
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        self.register(name, ListenerOptions::default(), callback)
    }

    /// Listen for the next occurrence of `name` only.
    pub fn once<F>(&self, name: &str, callback: F) -> ListenerId
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        self.on_multiple(name, 1, callback)
    }

    /// Listen for at most `count` occurrences of `name`.
    pub fn on_multiple<F>(&self, name: &str, count: u64, callback: F) -> ListenerId
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        let options = ListenerOptions {
            limit: Some(count),
            ..ListenerOptions::default()
        };
        self.register(name, options, callback)
    }

    /// Listen for `name` from one origin only.
    pub fn on_scoped<F>(&self, name: &str, scope: ListenerScope, callback: F) -> ListenerId
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        let options = ListenerOptions {
            scope,
            ..ListenerOptions::default()
        };
        self.register(name, options, callback)
    }

    /// Register with explicit options.
    pub fn register<F>(&self, name: &str, options: ListenerOptions, callback: F) -> ListenerId
    where
        F: Fn(&EventNotification) + Send + Sync + 'static,
    {
        self.listeners.add(name, options, Arc::new(callback))
    }

    /// Remove one listener.
    pub fn off_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Remove every listener for `name`.
    pub fn off(&self, name: &str) -> usize {
        self.listeners.remove_event(name)
    }

    /// Remove every listener registered by `owner`.
    pub fn off_owner(&self, owner: SubsystemId) -> usize {
        self.listeners.remove_owner(owner)
    }

    #[must_use]
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    fn deliver(message: Message, listeners: &ListenerRegistry, inflight: &mut JoinSet<()>) {
        let Payload::Event(event) = message.payload else {
            warn!(
                topic = %message.topic,
                sender = %message.sender,
                "[hb-04] Ignoring non-event payload"
            );
            return;
        };
        let notification = Arc::new(EventNotification::from(event));
        let claimed = listeners.claim(&notification);
        debug!(
            event = %notification.name,
            origin = ?notification.origin,
            delivered = claimed.len(),
            "[hb-04] Event dispatched"
        );
        for listener in claimed {
            let notification = Arc::clone(&notification);
            inflight.spawn_blocking(move || listener.invoke(&notification));
        }
    }
}

#[async_trait]
impl Subsystem for EventSubsystem {
    fn id(&self) -> SubsystemId {
        SubsystemId::Event
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        *self.status.write() = SubsystemStatus::Starting;

        let mut events = self
            .bus
            .subscribe(SubsystemId::Event, TopicPattern::prefix(topics::EVENT_PREFIX));
        let listeners = Arc::clone(&self.listeners);

        *worker = Some(BusWorker::spawn(self.name(), move |mut shutdown| async move {
            let mut inflight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    next = events.recv() => match next {
                        Some(message) => Self::deliver(message, &listeners, &mut inflight),
                        None => break,
                    },
                    Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                        if let Err(e) = joined {
                            error!("[hb-04] Listener task failed: {}", e);
                        }
                    }
                }
            }
            // Callbacks already running finish on their own threads.
            inflight.detach_all();
        }));

        *self.status.write() = SubsystemStatus::Running;
        info!("[hb-04] Event subsystem started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
            *self.status.write() = SubsystemStatus::Stopped;
            info!("[hb-04] Event subsystem stopped");
        }
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        *self.status.read()
    }
}
