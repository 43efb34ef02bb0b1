//! # Application Orchestrator
//!
//! Single owner of the bus, the runtime handle, the five core subsystems and
//! the transport.
//!
//! ## Lifecycle
//!
//! ```text
//! Configure ─→ Start ─→ Ready ─→ Run ─→ ShutdownCallback ─→ Stop
//!  builder     bus        flush    wait     on_shutdown        transport
//!  validate    runtime    loaded   signal                      subsystems (reverse)
//!              hook       transport                            bus
//!              hb-01..05
//! ```
//!
//! The subsystems start in the fixed order Logging → Dispatcher → Binding →
//! Event → Call. The transport starts only after all five are subscribed.
//! A failure anywhere in Start rolls back what was already started.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use hb_01_logging::LoggingSubsystem;
use hb_02_dispatcher::{DispatcherSubsystem, Transport};
use hb_03_binding::{BindingRegistry, BindingSubsystem};
use hb_04_event::EventSubsystem;
use hb_05_call::CallSubsystem;
use parking_lot::Mutex;
use serde_json::Value;
use shared_bus::ServiceBus;
use shared_types::{topics, SubsystemError, SubsystemId, SubsystemStatus};
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::AppError;
use crate::registry::SubsystemRegistry;
use crate::runtime::{Runtime, StartupHook};
use crate::transport::LoopbackTransport;

/// Hook run once during teardown.
pub type ShutdownHook = Box<dyn FnOnce() + Send>;

/// Lifecycle phase of an [`Application`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built and validated, not started.
    Configured,
    /// Bus, runtime and subsystems coming up.
    Starting,
    /// Everything up, transport serving.
    Running,
    /// Teardown in progress.
    ShuttingDown,
    /// Torn down.
    Stopped,
    /// Start failed and was rolled back.
    Failed,
}

/// Bus and subsystem counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStats {
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub subscriptions: usize,
    pub pending_calls: usize,
    pub event_listeners: usize,
}

/// Builder for [`Application`].
#[derive(Default)]
pub struct ApplicationBuilder {
    config: AppConfig,
    bindings: Option<BindingRegistry>,
    transport: Option<Arc<dyn Transport>>,
    on_startup: Option<StartupHook>,
    on_shutdown: Option<ShutdownHook>,
}

impl ApplicationBuilder {
    #[must_use]
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    /// Methods the UI and the call subsystem may invoke.
    #[must_use]
    pub fn bindings(mut self, bindings: BindingRegistry) -> Self {
        self.bindings = Some(bindings);
        self
    }

    /// Transport to serve on. Defaults to a [`LoopbackTransport`].
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Run `hook` once the runtime is up, before any subsystem starts.
    #[must_use]
    pub fn on_startup<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Runtime) + Send + 'static,
    {
        self.on_startup = Some(Box::new(hook));
        self
    }

    /// Run `hook` once at the start of teardown.
    #[must_use]
    pub fn on_shutdown<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_shutdown = Some(Box::new(hook));
        self
    }

    /// Validate the configuration and wire the subsystems.
    pub fn build(self) -> Result<Application, AppError> {
        self.config.validate()?;

        let bus = Arc::new(ServiceBus::with_policy(self.config.mailbox_policy()));
        bus.set_debug(self.config.debug_mode);

        let runtime = Runtime::new(Arc::clone(&bus));
        let bindings = Arc::new(self.bindings.unwrap_or_default());
        let transport = self
            .transport
            .unwrap_or_else(|| LoopbackTransport::new(&self.config));

        let logging = Arc::new(LoggingSubsystem::new(Arc::clone(&bus)));
        let dispatcher = Arc::new(DispatcherSubsystem::new(
            Arc::clone(&bus),
            Arc::clone(&transport),
        ));
        let binding = Arc::new(BindingSubsystem::new(Arc::clone(&bus), Arc::clone(&bindings)));
        let events = Arc::new(EventSubsystem::new(Arc::clone(&bus)));
        let calls = Arc::new(CallSubsystem::new(
            Arc::clone(&bus),
            Arc::clone(&bindings),
            self.config.call_timeout(),
        ));

        let mut registry = SubsystemRegistry::new();
        registry.register(logging.clone())?;
        registry.register(dispatcher.clone())?;
        registry.register(binding.clone())?;
        registry.register(events.clone())?;
        registry.register(calls.clone())?;

        Ok(Application {
            config: self.config,
            bus,
            runtime,
            bindings,
            transport,
            registry,
            logging,
            dispatcher,
            events,
            calls,
            phase: Mutex::new(Phase::Configured),
            on_startup: Mutex::new(self.on_startup),
            on_shutdown: Mutex::new(self.on_shutdown),
        })
    }
}

/// The assembled application.
pub struct Application {
    config: AppConfig,
    bus: Arc<ServiceBus>,
    runtime: Runtime,
    bindings: Arc<BindingRegistry>,
    transport: Arc<dyn Transport>,
    registry: SubsystemRegistry,
    logging: Arc<LoggingSubsystem>,
    dispatcher: Arc<DispatcherSubsystem>,
    events: Arc<EventSubsystem>,
    calls: Arc<CallSubsystem>,
    phase: Mutex<Phase>,
    on_startup: Mutex<Option<StartupHook>>,
    on_shutdown: Mutex<Option<ShutdownHook>>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .field("subsystems", &self.registry.statuses())
            .finish_non_exhaustive()
    }
}

impl Application {
    #[must_use]
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::default()
    }

    /// Bring everything up. On failure every started piece is stopped again
    /// and the error is returned; the application cannot be restarted.
    pub async fn start(&self) -> Result<(), AppError> {
        self.transition(&[Phase::Configured], Phase::Starting, "start")?;

        if let Err(e) = self.bring_up().await {
            error!("Startup failed: {}", e);
            self.bus.stop();
            *self.phase.lock() = Phase::Failed;
            return Err(AppError::Startup(e));
        }

        *self.phase.lock() = Phase::Running;
        Ok(())
    }

    async fn bring_up(&self) -> Result<(), SubsystemError> {
        self.bus.start();
        let hook = self.on_startup.lock().take();
        self.runtime.start(hook);

        self.registry.start_all().await?;

        self.runtime.mark_ready();
        self.runtime.emit(topics::READY_EVENT, Value::Null);

        if let Err(e) = self.transport.start(self.bindings.describe()).await {
            if let Err(stop_err) = self.registry.stop_all().await {
                warn!("Rollback after transport failure incomplete: {}", stop_err);
            }
            return Err(SubsystemError::startup(SubsystemId::Transport, e.to_string()));
        }

        self.print_banner();
        Ok(())
    }

    fn print_banner(&self) {
        if self.config.suppress_logging {
            return;
        }
        info!("===========================================");
        info!("  Hybrid Backend Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("  Bound methods: {}", self.bindings.len());
        info!("===========================================");
        info!("Running at {}", self.transport.url());
    }

    /// Start, wait for `shutdown` or `Runtime::quit()`, then stop.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::select! {
            () = shutdown => info!("Shutdown signal received"),
            () = self.runtime.quit_requested() => {}
        }
        self.stop().await
    }

    /// Start and run until Ctrl-C or `Runtime::quit()`.
    pub async fn run(&self) -> Result<(), AppError> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Tear down. Safe to call repeatedly and in any phase.
    pub async fn stop(&self) -> Result<(), AppError> {
        {
            let mut phase = self.phase.lock();
            let current = *phase;
            match current {
                Phase::Running => *phase = Phase::ShuttingDown,
                Phase::Configured => {
                    *phase = Phase::Stopped;
                    self.bus.stop();
                    return Ok(());
                }
                Phase::Starting => {
                    return Err(AppError::InvalidPhase {
                        action: "stop",
                        phase: current,
                    })
                }
                Phase::ShuttingDown | Phase::Stopped | Phase::Failed => return Ok(()),
            }
        }
        info!("Initiating graceful shutdown...");

        let hook = self.on_shutdown.lock().take();
        if let Some(hook) = hook {
            hook();
        }

        self.transport.stop().await;
        if let Err(e) = self.registry.stop_all().await {
            warn!("Subsystem shutdown incomplete: {}", e);
        }
        self.bus.stop();

        *self.phase.lock() = Phase::Stopped;
        info!("Shutdown complete");
        Ok(())
    }

    fn transition(&self, from: &[Phase], to: Phase, action: &'static str) -> Result<(), AppError> {
        let mut phase = self.phase.lock();
        if !from.contains(&*phase) {
            return Err(AppError::InvalidPhase {
                action,
                phase: *phase,
            });
        }
        *phase = to;
        Ok(())
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    #[must_use]
    pub fn bus(&self) -> Arc<ServiceBus> {
        Arc::clone(&self.bus)
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    #[must_use]
    pub fn bindings(&self) -> Arc<BindingRegistry> {
        Arc::clone(&self.bindings)
    }

    #[must_use]
    pub fn events(&self) -> Arc<EventSubsystem> {
        Arc::clone(&self.events)
    }

    #[must_use]
    pub fn calls(&self) -> Arc<CallSubsystem> {
        Arc::clone(&self.calls)
    }

    #[must_use]
    pub fn logging(&self) -> Arc<LoggingSubsystem> {
        Arc::clone(&self.logging)
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<DispatcherSubsystem> {
        Arc::clone(&self.dispatcher)
    }

    /// Registry view of one subsystem.
    #[must_use]
    pub fn subsystem_status(&self, id: SubsystemId) -> Option<SubsystemStatus> {
        self.registry.status(id)
    }

    /// Subsystems in start order with their status.
    #[must_use]
    pub fn subsystems(&self) -> Vec<(SubsystemId, SubsystemStatus)> {
        self.registry.statuses()
    }

    #[must_use]
    pub fn stats(&self) -> AppStats {
        AppStats {
            messages_published: self.bus.messages_published(),
            messages_dropped: self.bus.messages_dropped(),
            subscriptions: self.bus.subscriber_count(),
            pending_calls: self.calls.pending_count(),
            event_listeners: self.events.listeners().len(),
        }
    }
}
