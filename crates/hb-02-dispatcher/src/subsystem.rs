//! Dispatcher subsystem implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_bus::{BusWorker, ServiceBus};
use shared_types::{
    topics, Envelope, Message, Subsystem, SubsystemError, SubsystemId, SubsystemStatus,
    TopicPattern,
};
use tracing::{debug, info, warn};

use crate::codec::{decode_inbound, encode_outbound};
use crate::ports::{InboundHandler, Transport};

#[derive(Default)]
struct Counters {
    relayed: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
}

/// Bridges the bus and the transport.
pub struct DispatcherSubsystem {
    bus: Arc<ServiceBus>,
    transport: Arc<dyn Transport>,
    status: RwLock<SubsystemStatus>,
    worker: Mutex<Option<BusWorker>>,
    accepting: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

impl DispatcherSubsystem {
    pub fn new(bus: Arc<ServiceBus>, transport: Arc<dyn Transport>) -> Self {
        Self {
            bus,
            transport,
            status: RwLock::new(SubsystemStatus::Registered),
            worker: Mutex::new(None),
            accepting: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Envelopes handed to the transport.
    #[must_use]
    pub fn relayed(&self) -> u64 {
        self.counters.relayed.load(Ordering::Relaxed)
    }

    /// Envelopes received from the transport and published on the bus.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.counters.received.load(Ordering::Relaxed)
    }

    /// Envelopes dropped in either direction.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    fn inbound_handler(&self) -> InboundHandler {
        let bus = Arc::clone(&self.bus);
        let accepting = Arc::clone(&self.accepting);
        let counters = Arc::clone(&self.counters);

        Arc::new(move |envelope: Envelope| {
            if !accepting.load(Ordering::Acquire) {
                debug!(kind = ?envelope.kind, "[hb-02] Dispatcher stopped, dropping inbound envelope");
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let kind = envelope.kind;
            match decode_inbound(envelope) {
                Ok(message) => {
                    counters.received.fetch_add(1, Ordering::Relaxed);
                    bus.publish(message);
                }
                Err(e) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(kind = ?kind, "[hb-02] Malformed inbound envelope: {}", e);
                }
            }
        })
    }

    async fn relay(message: Message, transport: &dyn Transport, counters: &Counters) {
        let envelope = match encode_outbound(&message) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => return,
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %message.topic, "[hb-02] Failed to encode envelope: {}", e);
                return;
            }
        };

        let kind = envelope.kind;
        match transport.send(envelope).await {
            Ok(()) => {
                counters.relayed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(kind = ?kind, "[hb-02] Transport send failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl Subsystem for DispatcherSubsystem {
    fn id(&self) -> SubsystemId {
        SubsystemId::Dispatcher
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        *self.status.write() = SubsystemStatus::Starting;

        let mut events = self
            .bus
            .subscribe(SubsystemId::Dispatcher, TopicPattern::exact(topics::EVENT_EMIT));
        let mut results = self
            .bus
            .subscribe(SubsystemId::Dispatcher, TopicPattern::exact(topics::CALL_RESULT));
        let transport = Arc::clone(&self.transport);
        let counters = Arc::clone(&self.counters);

        *worker = Some(BusWorker::spawn(self.name(), move |mut shutdown| async move {
            loop {
                let next = tokio::select! {
                    _ = shutdown.wait() => break,
                    next = events.recv() => next,
                    next = results.recv() => next,
                };
                match next {
                    Some(message) => Self::relay(message, transport.as_ref(), &counters).await,
                    None => {
                        // One mailbox closing means the bus stopped; the other
                        // may still hold accepted messages.
                        for pending in [&mut events, &mut results] {
                            while let Ok(Some(message)) = pending.try_recv() {
                                Self::relay(message, transport.as_ref(), &counters).await;
                            }
                        }
                        debug!("[hb-02] Bus closed, exiting");
                        break;
                    }
                }
            }
        }));

        self.accepting.store(true, Ordering::Release);
        self.transport.set_inbound_handler(self.inbound_handler());

        *self.status.write() = SubsystemStatus::Running;
        info!("[hb-02] Dispatcher subsystem started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        self.accepting.store(false, Ordering::Release);
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
            *self.status.write() = SubsystemStatus::Stopped;
            info!(
                relayed = self.relayed(),
                received = self.received(),
                "[hb-02] Dispatcher subsystem stopped"
            );
        }
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        *self.status.read()
    }
}
