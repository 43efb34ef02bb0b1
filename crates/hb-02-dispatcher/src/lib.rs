//! # HB-02 Dispatcher
//!
//! Adapter between the service bus and the external transport. Holds no
//! business logic: it only translates messages to envelopes and back.
//!
//! ## Outbound
//!
//! | bus topic     | condition       | envelope kind |
//! |---------------|-----------------|---------------|
//! | `event:emit`  | always          | `event`       |
//! | `call:result` | origin `Remote` | `callResult`  |
//!
//! ## Inbound
//!
//! | envelope kind | bus topic       | origin   |
//! |---------------|-----------------|----------|
//! | `event`       | `event:in`      | `Remote` |
//! | `call`        | `call:request`  | `Remote` |
//! | `log`         | `log:<level>`   | n/a      |
//!
//! Transport failures and malformed envelopes are logged and dropped; they
//! never stop the dispatcher.

pub mod codec;
pub mod ports;
pub mod subsystem;

pub use codec::{decode_inbound, encode_outbound, InboundError};
pub use ports::{InboundHandler, Transport};
pub use subsystem::DispatcherSubsystem;
