//! # HB-05 Call
//!
//! Tracks calls issued by backend code until their result arrives.
//!
//! ## Flow
//!
//! 1. `issue()` resolves the method against the binding registry and checks
//!    the argument count when the method is known
//! 2. A fresh `CallId` is recorded in the pending store with a oneshot
//!    responder
//! 3. An `InvocationRequest` (origin `Local`) is published on `call:request`
//! 4. The worker receives `call:result`, finds the record and resolves the
//!    caller
//! 5. The caller gets the result, `CallTimeout` when the bound elapses, or
//!    `CallAborted` when the subsystem stops first
//!
//! A `CallId` is never shared by two outstanding records. Results for ids
//! that are no longer pending (duplicates, expired calls) are discarded.

pub mod pending;
pub mod subsystem;

pub use pending::{PendingCalls, PendingStats};
pub use subsystem::CallSubsystem;
