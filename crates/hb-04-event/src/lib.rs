//! # HB-04 Event
//!
//! Named events in both directions between backend and remote UI.
//!
//! - `emit()` publishes on `event:emit`; the dispatcher relays it out.
//! - Events from the remote UI arrive on `event:in`.
//! - Every event seen on the `event:` family is fanned out to the local
//!   listeners registered for its name.
//!
//! Delivery iterates a snapshot of the listener list taken when the event is
//! dispatched. A listener added while a batch is being delivered only sees
//! later events; one removed before dispatch sees nothing. Each callback
//! runs on its own blocking task, so a slow listener holds up neither its
//! neighbours nor later events.

pub mod listeners;
pub mod subsystem;

pub use listeners::{
    ClaimedListener, EventCallback, EventNotification, ListenerId, ListenerOptions, ListenerRegistry, ListenerScope,
};
pub use subsystem::EventSubsystem;
