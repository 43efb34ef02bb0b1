//! # Hybrid Backend Runtime
//!
//! Demo entry point. Binds a small calculator, starts every subsystem over
//! the loopback transport and runs until Ctrl-C.

use anyhow::{Context, Result};
use app_runtime::{AppConfig, Application};
use hb_03_binding::BindingRegistry;
use serde_json::json;
use shared_types::LogLevel;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn calculator() -> Result<BindingRegistry> {
    let registry = BindingRegistry::builder()
        .bind("Calculator", "Add", |a: i64, b: i64| Ok::<_, String>(a + b))?
        .bind("Calculator", "Sub", |a: i64, b: i64| Ok::<_, String>(a - b))?
        .bind("Calculator", "Mul", |a: i64, b: i64| Ok::<_, String>(a * b))?
        .bind("Calculator", "Div", |a: i64, b: i64| {
            if b == 0 {
                Err("division by zero".to_string())
            } else {
                Ok(a / b)
            }
        })?
        .build();
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("Invalid HB_* environment")?;

    let default_level = if config.debug_mode {
        "debug"
    } else if config.suppress_logging {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = Application::builder()
        .config(config)
        .bindings(calculator().context("Failed to bind calculator")?)
        .on_startup(|runtime| {
            runtime.log(LogLevel::Info, "Calculator backend starting");
            runtime.emit("backend:hello", json!({ "methods": ["Add", "Sub", "Mul", "Div"] }));
        })
        .on_shutdown(|| info!("Calculator backend shutting down"))
        .build()
        .context("Failed to build application")?;

    app.run().await.context("Application failed")?;
    Ok(())
}
