//! Binding subsystem: answers `call:request` with `call:result`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_bus::{BusWorker, ServiceBus};
use shared_types::{
    topics, InvocationRequest, InvocationResult, Message, Payload, Subsystem, SubsystemError,
    SubsystemId, SubsystemStatus, TopicPattern,
};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::registry::BindingRegistry;

/// Invokes registered methods on request and publishes their results.
pub struct BindingSubsystem {
    bus: Arc<ServiceBus>,
    registry: Arc<BindingRegistry>,
    status: RwLock<SubsystemStatus>,
    worker: Mutex<Option<BusWorker>>,
    invocations: Arc<AtomicU64>,
}

impl BindingSubsystem {
    pub fn new(bus: Arc<ServiceBus>, registry: Arc<BindingRegistry>) -> Self {
        Self {
            bus,
            registry,
            status: RwLock::new(SubsystemStatus::Registered),
            worker: Mutex::new(None),
            invocations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The registry this subsystem serves.
    #[must_use]
    pub fn registry(&self) -> Arc<BindingRegistry> {
        Arc::clone(&self.registry)
    }

    /// Number of requests handled so far.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Run one request to completion and publish its result.
    pub fn execute(bus: &ServiceBus, registry: &BindingRegistry, request: InvocationRequest) {
        let InvocationRequest {
            call_id,
            method,
            args,
            origin,
        } = request;

        let result = registry.invoke(&method, args);
        if let Err(e) = &result {
            debug!(%call_id, %method, "Invocation failed: {}", e);
        }

        bus.publish_from(
            SubsystemId::Binding,
            topics::CALL_RESULT,
            Payload::InvocationResult(InvocationResult {
                call_id,
                origin,
                result,
            }),
        );
    }

    fn dispatch(
        message: Message,
        bus: &Arc<ServiceBus>,
        registry: &Arc<BindingRegistry>,
        inflight: &mut JoinSet<()>,
        invocations: &AtomicU64,
    ) {
        let Payload::InvocationRequest(request) = message.payload else {
            warn!(
                topic = %message.topic,
                sender = %message.sender,
                "[hb-03] Ignoring non-request payload"
            );
            return;
        };

        invocations.fetch_add(1, Ordering::Relaxed);
        let bus = Arc::clone(bus);
        let registry = Arc::clone(registry);
        inflight.spawn_blocking(move || Self::execute(&bus, &registry, request));
    }
}

#[async_trait]
impl Subsystem for BindingSubsystem {
    fn id(&self) -> SubsystemId {
        SubsystemId::Binding
    }

    async fn start(&self) -> Result<(), SubsystemError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }
        *self.status.write() = SubsystemStatus::Starting;

        let mut requests = self
            .bus
            .subscribe(SubsystemId::Binding, TopicPattern::exact(topics::CALL_REQUEST));
        let bus = Arc::clone(&self.bus);
        let registry = Arc::clone(&self.registry);
        let invocations = Arc::clone(&self.invocations);

        *worker = Some(BusWorker::spawn(self.name(), move |mut shutdown| async move {
            let mut inflight = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    next = requests.recv() => match next {
                        Some(message) => {
                            Self::dispatch(message, &bus, &registry, &mut inflight, &invocations);
                        }
                        None => break,
                    },
                    Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                        if let Err(e) = joined {
                            error!("[hb-03] Invocation task failed: {}", e);
                        }
                    }
                }
            }
            inflight.abort_all();
        }));

        *self.status.write() = SubsystemStatus::Running;
        info!(
            methods = self.registry.len(),
            "[hb-03] Binding subsystem started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SubsystemError> {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
            *self.status.write() = SubsystemStatus::Stopped;
            info!("[hb-03] Binding subsystem stopped");
        }
        Ok(())
    }

    fn status(&self) -> SubsystemStatus {
        *self.status.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{CallId, InvocationErrorKind, Origin};
    use shared_bus::Subscription;
    use std::time::Duration;
    use tokio::time::timeout;

    fn registry() -> Arc<BindingRegistry> {
        Arc::new(
            BindingRegistry::builder()
                .bind("Calculator", "Add", |a: i64, b: i64| Ok::<_, String>(a + b))
                .unwrap()
                .bind("Clock", "Sleep", |ms: u64| {
                    std::thread::sleep(Duration::from_millis(ms));
                    Ok::<_, String>(ms)
                })
                .unwrap()
                .build(),
        )
    }

    async fn started() -> (Arc<ServiceBus>, BindingSubsystem, Subscription) {
        let bus = Arc::new(ServiceBus::new());
        bus.start();
        let results = bus.subscribe(SubsystemId::Call, topics::CALL_RESULT);
        let binding = BindingSubsystem::new(Arc::clone(&bus), registry());
        binding.start().await.unwrap();
        (bus, binding, results)
    }

    fn request(id: &str, method: &str, args: Vec<serde_json::Value>, origin: Origin) -> Payload {
        Payload::InvocationRequest(InvocationRequest {
            call_id: CallId::new(id),
            method: method.into(),
            args,
            origin,
        })
    }

    async fn next_result(results: &mut Subscription) -> InvocationResult {
        let message = timeout(Duration::from_secs(1), results.recv())
            .await
            .expect("result within a second")
            .expect("bus open");
        match message.payload {
            Payload::InvocationResult(result) => result,
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_result_is_tagged() {
        let (bus, _binding, mut results) = started().await;
        bus.publish_from(
            SubsystemId::Call,
            topics::CALL_REQUEST,
            request("c-1", "Add", vec![json!(2), json!(3)], Origin::Remote),
        );

        let result = next_result(&mut results).await;
        assert_eq!(result.call_id, CallId::new("c-1"));
        assert_eq!(result.origin, Origin::Remote);
        assert_eq!(result.result, Ok(json!(5)));
    }

    #[tokio::test]
    async fn test_unknown_method_reports_not_found() {
        let (bus, binding, mut results) = started().await;
        bus.publish_from(
            SubsystemId::Call,
            topics::CALL_REQUEST,
            request("c-2", "Nope", vec![], Origin::Local),
        );

        let result = next_result(&mut results).await;
        assert_eq!(result.call_id, CallId::new("c-2"));
        assert_eq!(
            result.result.unwrap_err().kind,
            InvocationErrorKind::MethodNotFound
        );
        assert_eq!(binding.invocations(), 1);
    }

    #[tokio::test]
    async fn test_slow_invocation_does_not_block_others() {
        let (bus, _binding, mut results) = started().await;
        bus.publish_from(
            SubsystemId::Call,
            topics::CALL_REQUEST,
            request("slow", "Sleep", vec![json!(300)], Origin::Local),
        );
        bus.publish_from(
            SubsystemId::Call,
            topics::CALL_REQUEST,
            request("fast", "Add", vec![json!(1), json!(1)], Origin::Local),
        );

        let first = next_result(&mut results).await;
        assert_eq!(first.call_id, CallId::new("fast"));
        let second = next_result(&mut results).await;
        assert_eq!(second.call_id, CallId::new("slow"));
    }

    #[tokio::test]
    async fn test_foreign_payload_is_ignored() {
        let (bus, binding, mut results) = started().await;
        bus.publish_from(SubsystemId::Application, topics::CALL_REQUEST, Payload::Value(json!(1)));
        bus.publish_from(
            SubsystemId::Call,
            topics::CALL_REQUEST,
            request("c-3", "Add", vec![json!(1), json!(2)], Origin::Local),
        );
        assert_eq!(next_result(&mut results).await.result, Ok(json!(3)));
        assert_eq!(binding.status(), SubsystemStatus::Running);
    }

    #[tokio::test]
    async fn test_stop_releases_subscription() {
        let (bus, binding, _results) = started().await;
        assert_eq!(bus.subscribers_for(topics::CALL_REQUEST), 1);
        binding.stop().await.unwrap();
        binding.stop().await.unwrap();
        assert_eq!(bus.subscribers_for(topics::CALL_REQUEST), 0);
        assert_eq!(binding.status(), SubsystemStatus::Stopped);
    }
}
