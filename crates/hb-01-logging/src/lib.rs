//! # HB-01 Logging
//!
//! Subscribes to the `log:*` topic family (one sub-topic per severity) and
//! forwards each message body to the process logger at the matching level.
//!
//! Messages typically come from the remote UI through the dispatcher, but
//! any subsystem may publish on `log:<level>`.
//!
//! - A message that cannot be turned into a log line is reported as a
//!   warning; the subsystem keeps running.
//! - Nothing is published back onto the bus.

pub mod subsystem;

pub use subsystem::{LogForwardError, LoggingSubsystem, FRONTEND_TARGET};
