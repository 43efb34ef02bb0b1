//! # Shared Bus - Service Bus for Inter-Subsystem Communication
//!
//! Subsystems never hold references to each other. They publish `Message`s on
//! topics and subscribe to topic patterns; the bus routes between them.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Subsystem A  │                    │ Subsystem B  │
//! │              │    publish()       │   mailbox    │
//! │              │ ──────┐            │   + loop     │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  ServiceBus  │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! ## Delivery Model
//!
//! - Every subscription owns a mailbox; `publish` only enqueues, so a slow
//!   subscriber never stalls the publisher or any other subscriber.
//! - Per topic, messages from one publisher reach each subscriber in publish
//!   order.
//! - A subscription only sees messages published after it was created.
//! - `stop()` closes every mailbox: subscribers drain what was accepted and
//!   then see end-of-sequence.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod mailbox;
pub mod publisher;
pub mod subscriber;
pub mod worker;

pub use mailbox::MailboxPolicy;
pub use publisher::{BusState, ServiceBus};
pub use subscriber::{Subscription, SubscriptionError, SubscriptionId};
pub use worker::{BusWorker, ShutdownSignal};
