//! # Lifecycle Tests
//!
//! Startup order, the ready signal, rollback on startup failure and
//! shutdown behavior of a fully wired application.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use app_runtime::{AppConfig, AppError, Application, LoopbackTransport, Phase};
use async_trait::async_trait;
use hb_02_dispatcher::{InboundHandler, Transport};
use hb_03_binding::BindingRegistry;
use hb_04_event::EventNotification;
use parking_lot::Mutex;
use serde_json::json;
use shared_bus::BusState;
use shared_types::{
    topics, CallError, Envelope, EnvelopeKind, MethodDescriptor, SubsystemId, SubsystemStatus,
    TransportError,
};

fn quiet_config() -> AppConfig {
    AppConfig {
        suppress_logging: true,
        call_timeout_ms: 2_000,
        ..AppConfig::default()
    }
}

fn calculator() -> BindingRegistry {
    BindingRegistry::builder()
        .bind("Calculator", "Add", |a: i64, b: i64| Ok::<_, String>(a + b))
        .unwrap()
        .bind("Calculator", "Slow", || {
            std::thread::sleep(Duration::from_millis(300));
            Ok::<_, String>(true)
        })
        .unwrap()
        .build()
}

async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Transport whose `start()` always fails.
struct RefusingTransport;

#[async_trait]
impl Transport for RefusingTransport {
    async fn start(&self, _methods: Vec<MethodDescriptor>) -> Result<(), TransportError> {
        Err(TransportError::Bind {
            address: "localhost:8080".into(),
            reason: "address in use".into(),
        })
    }

    async fn send(&self, _envelope: Envelope) -> Result<(), TransportError> {
        Ok(())
    }

    fn set_inbound_handler(&self, _handler: InboundHandler) {}

    async fn stop(&self) {}

    fn url(&self) -> String {
        "refusing://".into()
    }
}

#[tokio::test]
async fn test_subsystems_start_in_order_before_transport() {
    // Arrange
    let config = quiet_config();
    let transport = LoopbackTransport::new(&config);
    let app = Application::builder()
        .config(config)
        .bindings(calculator())
        .transport(transport.clone())
        .build()
        .unwrap();

    // Act
    app.start().await.unwrap();

    // Assert
    assert_eq!(app.phase(), Phase::Running);
    let subsystems = app.subsystems();
    let ids: Vec<SubsystemId> = subsystems.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, SubsystemId::startup_order());
    assert!(subsystems
        .iter()
        .all(|(_, status)| *status == SubsystemStatus::Running));

    assert!(transport.is_running());
    let methods: Vec<String> = transport
        .methods()
        .iter()
        .map(MethodDescriptor::qualified_name)
        .collect();
    assert_eq!(methods, ["Calculator.Add", "Calculator.Slow"]);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_startup_hook_emit_arrives_before_ready_event() {
    // Arrange: the hook runs before any subsystem has subscribed.
    let config = quiet_config();
    let transport = LoopbackTransport::new(&config);
    let mut client = transport.connect();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Application::builder()
        .config(config)
        .transport(transport)
        .on_startup(|runtime| runtime.emit("hook:started", json!({"ok": true})))
        .build()
        .unwrap();

    for name in ["hook:started", topics::READY_EVENT] {
        let seen = Arc::clone(&seen);
        app.events()
            .on(name, move |event: &EventNotification| seen.lock().push(event.name.clone()));
    }

    // Act
    app.start().await.unwrap();

    // Assert: both listeners fire, and the relay preserves emit order.
    assert!(eventually(|| seen.lock().len() == 2).await);
    let mut heard = seen.lock().clone();
    heard.sort();
    assert_eq!(heard, [topics::READY_EVENT, "hook:started"]);

    let mut relayed = Vec::new();
    while let Some(envelope) = client.recv_timeout(Duration::from_millis(200)).await {
        relayed.push(envelope.payload["name"].clone());
    }
    assert_eq!(relayed, [json!("hook:started"), json!(topics::READY_EVENT)]);
    assert!(app.runtime().is_ready());
    assert_eq!(app.runtime().held(), 0);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_ready_event_reaches_remote_client() {
    let config = quiet_config();
    let transport = LoopbackTransport::new(&config);
    let mut client = transport.connect();
    let app = Application::builder()
        .config(config)
        .transport(transport.clone())
        .build()
        .unwrap();

    app.start().await.unwrap();

    let envelope = client
        .recv_timeout(Duration::from_secs(1))
        .await
        .expect("Should receive the ready event");
    assert_eq!(envelope.kind, EnvelopeKind::Event);
    assert_eq!(envelope.payload["name"], topics::READY_EVENT);

    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_transport_failure_rolls_back_startup() {
    // Arrange
    let app = Application::builder()
        .config(quiet_config())
        .transport(Arc::new(RefusingTransport))
        .build()
        .unwrap();

    // Act
    let err = app.start().await.unwrap_err();

    // Assert
    match err {
        AppError::Startup(e) => assert_eq!(e.subsystem, SubsystemId::Transport),
        other => panic!("expected a startup error, got {other:?}"),
    }
    assert_eq!(app.phase(), Phase::Failed);
    assert!(app
        .subsystems()
        .iter()
        .all(|(_, status)| *status == SubsystemStatus::Stopped));
    assert_eq!(app.bus().state(), BusState::Stopped);
    assert_eq!(app.bus().subscriber_count(), 0);

    // A failed application cannot be restarted.
    assert!(matches!(
        app.start().await,
        Err(AppError::InvalidPhase { phase: Phase::Failed, .. })
    ));
    app.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_aborts_outstanding_calls_and_is_idempotent() {
    // Arrange
    let hook_runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hook_runs);
    let app = Application::builder()
        .config(quiet_config())
        .bindings(calculator())
        .on_shutdown(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();
    app.start().await.unwrap();

    let calls = app.calls();
    let outstanding = tokio::spawn(async move { calls.issue("Slow", Vec::new()).await });
    assert!(eventually(|| app.calls().pending_count() == 1).await);

    // Act
    app.stop().await.unwrap();
    app.stop().await.unwrap();

    // Assert
    let result = tokio::time::timeout(Duration::from_secs(1), outstanding)
        .await
        .expect("Caller should be released by shutdown")
        .unwrap();
    assert!(matches!(result, Err(CallError::CallAborted { .. })));
    assert_eq!(app.calls().pending_count(), 0);
    assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    assert_eq!(app.phase(), Phase::Stopped);
    assert_eq!(app.bus().state(), BusState::Stopped);
}

#[tokio::test]
async fn test_runtime_quit_ends_run() {
    let app = Arc::new(
        Application::builder()
            .config(quiet_config())
            .build()
            .unwrap(),
    );
    let runner = {
        let app = Arc::clone(&app);
        tokio::spawn(async move { app.run_until(std::future::pending::<()>()).await })
    };

    assert!(eventually(|| app.phase() == Phase::Running).await);
    app.runtime().quit();

    tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("run_until should return after quit")
        .unwrap()
        .unwrap();
    assert_eq!(app.phase(), Phase::Stopped);
}
