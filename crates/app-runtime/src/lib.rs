//! # Application Runtime Library
//!
//! Orchestration for the hybrid backend: configuration, the subsystem
//! registry, the [`Runtime`] handle given to application hooks, the
//! in-process loopback transport and the [`Application`] that ties them
//! together. The `app-runtime` binary is a thin wrapper around it.
//!
//! ## Startup Order
//!
//! 1. Validate configuration
//! 2. Start the service bus
//! 3. Start the runtime and run the startup hook
//! 4. Start hb-01 Logging → hb-02 Dispatcher → hb-03 Binding → hb-04 Event → hb-05 Call
//! 5. Release held runtime messages and emit `app:loaded`
//! 6. Start the transport with the bound method surface

pub mod app;
pub mod config;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod transport;

pub use app::{AppStats, Application, ApplicationBuilder, Phase, ShutdownHook};
pub use config::{AppConfig, ConfigError};
pub use error::AppError;
pub use registry::{DynSubsystem, SubsystemRegistry};
pub use runtime::{Runtime, StartupHook};
pub use transport::{LoopbackTransport, RemoteClient};
