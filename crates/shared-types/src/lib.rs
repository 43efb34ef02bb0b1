//! # Shared Types Crate
//!
//! All cross-subsystem types live here: the bus `Message`, the topic-specific
//! payloads, topic patterns, the transport `Envelope`, the error taxonomy and
//! the `Subsystem` trait.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: subsystems never define their own wire types.
//! - **Sender Identity**: every `Message` carries the `SubsystemId` of its
//!   publisher; payloads do not repeat it.
//! - **Origin Tagging**: invocation and event payloads record whether they
//!   started in the backend or in the remote UI, which is what the dispatcher
//!   uses to decide what leaves the process.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod ipc;
pub mod subsystem_trait;
pub mod topic;

pub use entities::*;
pub use envelope::{Envelope, EnvelopeKind};
pub use errors::*;
pub use ipc::*;
pub use subsystem_trait::{Subsystem, SubsystemError, SubsystemErrorKind, SubsystemStatus};
pub use topic::{topics, TopicPattern};
