//! Call subsystem implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hb_03_binding::BindingRegistry;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared_bus::{BusWorker, ServiceBus};
use shared_types::{
    topics, CallError, CallId, InvocationErrorKind, InvocationRequest, InvocationResult, Message,
    Origin, Payload, Subsystem, SubsystemError, SubsystemId, SubsystemStatus, TopicPattern,
};
use tracing::{debug, info, warn};

use crate::pending::PendingCalls;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Removes the record if the caller stops waiting early.
struct PendingGuard<'a> {
    store: &'a PendingCalls,
    call_id: CallId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.store.cancel(&self.call_id);
    }
}

/// Issues calls and correlates them with their results.
pub struct CallSubsystem {
    bus: Arc<ServiceBus>,
    registry: Arc<BindingRegistry>,
    pending: Arc<PendingCalls>,
    default_timeout: Duration,
    status: RwLock<SubsystemStatus>,
    worker: Mutex<Option<BusWorker>>,
}

impl CallSubsystem {
    pub fn new(
        bus: Arc<ServiceBus>,
        registry: Arc<BindingRegistry>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            bus,
            registry,
            pending: Arc::new(PendingCalls::new()),
            default_timeout,
            status: RwLock::new(SubsystemStatus::Registered),
            worker: Mutex::new(None),
        }
    }

    /// Issue a call bounded by the default timeout.
    pub async fn issue(&self, method: &str, args: Vec<Value>) -> Result<Value, CallError> {
        self.issue_with_timeout(method, args, self.default_timeout)
            .await
    }

    /// Issue a call and decode its result.
    pub async fn issue_as<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, CallError> {
        let value = self.issue(method, args).await?;
        serde_json::from_value(value).map_err(|e| CallError::Encoding(e.to_string()))
    }

    /// Issue a call and wait at most `timeout` for its result.
    pub async fn issue_with_timeout(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, CallError> {
        let method = self.canonical_name(method, args.len())?;
        let (call_id, receiver) = self.pending.register(&method)?;
        let _guard = PendingGuard {
            store: &self.pending,
            call_id: call_id.clone(),
        };

        debug!(%call_id, method = %method, args = args.len(), "[hb-05] Issuing call");
        self.bus.publish_from(
            SubsystemId::Call,
            topics::CALL_REQUEST,
            Payload::InvocationRequest(InvocationRequest {
                call_id: call_id.clone(),
                method: method.clone(),
                args,
                origin: Origin::Local,
            }),
        );

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(outcome)) => outcome.map_err(|e| CallError::from_invocation(&method, e)),
            Ok(Err(_)) => Err(CallError::CallAborted { method }),
            Err(_) => {
                self.pending.expire(&call_id);
                warn!(%call_id, method = %method, "[hb-05] Call timed out");
                Err(CallError::CallTimeout {
                    call_id,
                    method,
                    timeout_ms: millis(timeout),
                })
            }
        }
    }

    /// Calls currently waiting for a result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    #[must_use]
    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Qualify a known method and check its argument count. Unknown names pass
    /// through unchanged so the binding subsystem reports them.
    fn canonical_name(&self, method: &str, argc: usize) -> Result<String, CallError> {
        match self.registry.lookup(method) {
            Ok(bound) if bound.arity() != argc => Err(CallError::InvocationFailure {
                method: bound.qualified_name(),
                message: format!("expects {} argument(s), got {}", bound.arity(), argc),
            }),
            Ok(bound) => Ok(bound.qualified_name()),
            Err(e) if e.kind == InvocationErrorKind::MethodNotFound => Ok(method.to_string()),
            Err(e) => Err(CallError::from_invocation(method, e)),
        }
    }

    fn handle_result(message: Message, pending: &PendingCalls) {
        match message.payload {
            Payload::InvocationResult(InvocationResult {
                call_id,
                origin: Origin::Local,
                result,
            }) => {
                pending.complete(&call_id, result);
            }
            Payload::InvocationResult(_) => {}
            other => warn!(
                topic = %message.topic,
                "[hb-05] Unexpected payload on result topic: {}",
                other.summary()
            ),
        }
    }
}

#[async_trait]
impl Subsystem for CallSubsystem {
    fn id(&self) -> SubsystemId {
        SubsystemId::Call
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        *self.status.write() = SubsystemStatus::Starting;
        self.pending.reopen();

        let mut results = self
            .bus
            .subscribe(SubsystemId::Call, TopicPattern::exact(topics::CALL_RESULT));
        let pending = Arc::clone(&self.pending);

        *worker = Some(BusWorker::spawn(self.name(), move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    next = results.recv() => match next {
                        Some(message) => Self::handle_result(message, &pending),
                        None => break,
                    },
                }
            }
        }));

        *self.status.write() = SubsystemStatus::Running;
        info!(
            timeout_ms = millis(self.default_timeout),
            "[hb-05] Call subsystem started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        let aborted = self.pending.close();
        if aborted > 0 {
            info!(aborted, "[hb-05] Aborted outstanding calls");
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
            *self.status.write() = SubsystemStatus::Stopped;
            info!("[hb-05] Call subsystem stopped");
        }
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        *self.status.read()
    }
}
