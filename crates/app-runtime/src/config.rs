//! # Application Configuration
//!
//! Defaults, environment overrides and validation.
//!
//! | variable              | field              | default     |
//! |-----------------------|--------------------|-------------|
//! | `HB_PORT`             | `port`             | `8080`      |
//! | `HB_BIND_ADDRESS`     | `bind_address`     | `localhost` |
//! | `HB_DEBUG`            | `debug_mode`       | `false`     |
//! | `HB_QUIET`            | `suppress_logging` | `false`     |
//! | `HB_CALL_TIMEOUT_MS`  | `call_timeout_ms`  | `30000`     |
//! | `HB_MAILBOX_CAPACITY` | `mailbox_capacity` | unbounded   |

use std::time::Duration;

use shared_bus::MailboxPolicy;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("{key}={value:?} is not a valid value")]
    InvalidValue { key: &'static str, value: String },

    #[error("port must be non-zero")]
    ZeroPort,

    #[error("bind address must not be empty")]
    EmptyBindAddress,

    #[error("call timeout must be non-zero")]
    ZeroCallTimeout,

    #[error("mailbox capacity must be non-zero when set")]
    ZeroMailboxCapacity,
}

/// Complete application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Port the transport listens on.
    pub port: u16,
    /// Address the transport binds.
    pub bind_address: String,
    /// Trace every bus message.
    pub debug_mode: bool,
    /// Skip the startup banner and connection line.
    pub suppress_logging: bool,
    /// Default bound for `CallSubsystem::issue`.
    pub call_timeout_ms: u64,
    /// Per-subscriber mailbox size. `None` is unbounded.
    pub mailbox_capacity: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "localhost".to_string(),
            debug_mode: false,
            suppress_logging: false,
            call_timeout_ms: 30_000,
            mailbox_capacity: None,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by `HB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `HB_*` key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("HB_PORT") {
            config.port = parse("HB_PORT", &port)?;
        }
        if let Some(address) = lookup("HB_BIND_ADDRESS") {
            config.bind_address = address;
        }
        if let Some(debug) = lookup("HB_DEBUG") {
            config.debug_mode = parse_flag("HB_DEBUG", &debug)?;
        }
        if let Some(quiet) = lookup("HB_QUIET") {
            config.suppress_logging = parse_flag("HB_QUIET", &quiet)?;
        }
        if let Some(timeout) = lookup("HB_CALL_TIMEOUT_MS") {
            config.call_timeout_ms = parse("HB_CALL_TIMEOUT_MS", &timeout)?;
        }
        if let Some(capacity) = lookup("HB_MAILBOX_CAPACITY") {
            config.mailbox_capacity = Some(parse("HB_MAILBOX_CAPACITY", &capacity)?);
        }

        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::EmptyBindAddress);
        }
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::ZeroCallTimeout);
        }
        if self.mailbox_capacity == Some(0) {
            return Err(ConfigError::ZeroMailboxCapacity);
        }
        Ok(())
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    #[must_use]
    pub fn mailbox_policy(&self) -> MailboxPolicy {
        match self.mailbox_capacity {
            Some(capacity) => MailboxPolicy::Bounded(capacity),
            None => MailboxPolicy::Unbounded,
        }
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
