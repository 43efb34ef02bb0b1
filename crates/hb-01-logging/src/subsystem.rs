//! Logging subsystem implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_bus::{BusWorker, ServiceBus};
use shared_types::{
    topics, LogLevel, LogRecord, Message, Payload, Subsystem, SubsystemError, SubsystemId,
    SubsystemStatus, TopicPattern,
};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// `tracing` target used for forwarded lines.
pub const FRONTEND_TARGET: &str = "frontend";

/// Reasons a log message could not be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogForwardError {
    #[error("unknown log level in topic {0}")]
    UnknownLevel(String),
    #[error("unexpected payload on {topic}: {summary}")]
    UnexpectedPayload { topic: String, summary: String },
}

struct Counters {
    forwarded: AtomicU64,
    rejected: AtomicU64,
}

/// Forwards `log:*` messages to `tracing`.
pub struct LoggingSubsystem {
    bus: Arc<ServiceBus>,
    status: RwLock<SubsystemStatus>,
    worker: Mutex<Option<BusWorker>>,
    counters: Arc<Counters>,
}

impl LoggingSubsystem {
    pub fn new(bus: Arc<ServiceBus>) -> Self {
        Self {
            bus,
            status: RwLock::new(SubsystemStatus::Registered),
            worker: Mutex::new(None),
            counters: Arc::new(Counters {
                forwarded: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    /// Number of messages written to the logger.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.counters.forwarded.load(Ordering::Relaxed)
    }

    /// Number of messages that could not be formatted.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    /// Turn a bus message into a log record. The level comes from the topic;
    /// the body may be a `Log` payload or a plain JSON value.
    pub fn parse_message(message: &Message) -> Result<LogRecord, LogForwardError> {
        let suffix = message
            .topic
            .strip_prefix(topics::LOG_PREFIX)
            .unwrap_or(&message.topic);
        let level: LogLevel = suffix
            .parse()
            .map_err(|_| LogForwardError::UnknownLevel(message.topic.clone()))?;

        let body = match &message.payload {
            Payload::Log(record) => record.message.clone(),
            Payload::Value(serde_json::Value::String(text)) => text.clone(),
            Payload::Value(value) if !value.is_null() => value.to_string(),
            other => {
                return Err(LogForwardError::UnexpectedPayload {
                    topic: message.topic.clone(),
                    summary: other.summary(),
                })
            }
        };

        Ok(LogRecord::new(level, body))
    }

    fn forward(record: &LogRecord, sender: SubsystemId) {
        let message = record.message.as_str();
        match record.level {
            LogLevel::Trace => trace!(target: FRONTEND_TARGET, %sender, "{}", message),
            LogLevel::Debug => debug!(target: FRONTEND_TARGET, %sender, "{}", message),
            LogLevel::Info => info!(target: FRONTEND_TARGET, %sender, "{}", message),
            LogLevel::Warning => warn!(target: FRONTEND_TARGET, %sender, "{}", message),
            LogLevel::Error => error!(target: FRONTEND_TARGET, %sender, "{}", message),
            LogLevel::Fatal => error!(target: FRONTEND_TARGET, %sender, fatal = true, "{}", message),
        }
    }

    fn handle(message: &Message, counters: &Counters) {
        match Self::parse_message(message) {
            Ok(record) => {
                Self::forward(&record, message.sender);
                counters.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(subsystem = SubsystemId::Logging.name(), "Failed to format log message: {}", e);
            }
        }
    }
}

#[async_trait]
impl Subsystem for LoggingSubsystem {
    fn id(&self) -> SubsystemId {
        SubsystemId::Logging
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("[hb-01] Already running");
            return Ok(());
        }
        *self.status.write() = SubsystemStatus::Starting;

        let mut subscription = self
            .bus
            .subscribe(SubsystemId::Logging, TopicPattern::prefix(topics::LOG_PREFIX));
        let counters = Arc::clone(&self.counters);

        *worker = Some(BusWorker::spawn(self.name(), move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    next = subscription.recv() => match next {
                        Some(message) => Self::handle(&message, &counters),
                        None => {
                            debug!("[hb-01] Bus closed, exiting");
                            break;
                        }
                    },
                }
            }
        }));

        *self.status.write() = SubsystemStatus::Running;
        info!("[hb-01] Logging subsystem started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
            *self.status.write() = SubsystemStatus::Stopped;
            info!("[hb-01] Logging subsystem stopped");
        }
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        *self.status.read()
    }
}
