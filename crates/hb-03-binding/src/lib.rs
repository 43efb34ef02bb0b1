//! # HB-03 Binding
//!
//! Owns the registry of backend methods the remote UI (and the call
//! subsystem) may invoke, and runs those invocations.
//!
//! ## Registration
//!
//! The registry is populated once, before the subsystem starts, through an
//! explicit typed registration step. Argument and return types are checked
//! by the compiler; arity is recorded so bad requests fail before the
//! method runs.
//!
//! ```ignore
//! use hb_03_binding::BindingRegistry;
//!
//! let registry = BindingRegistry::builder()
//!     .bind("Calculator", "Add", |a: i64, b: i64| Ok::<_, String>(a + b))?
//!     .bind("Greeter", "Hello", |name: String| Ok::<_, String>(format!("Hello {name}")))?
//!     .build();
//! ```
//!
//! ## Invocation Flow
//!
//! 1. `call:request` arrives with `{call_id, method, args}`
//! 2. The method is resolved (qualified `Owner.Method`, or a unique bare name)
//! 3. The invocation runs on its own blocking task; failures and panics are
//!    converted into an error result
//! 4. An `InvocationResult` tagged with the same `call_id` is published on
//!    `call:result`

pub mod invoker;
pub mod registry;
pub mod subsystem;

pub use invoker::{Invoker, IntoInvoker};
pub use registry::{BindingRegistry, BindingRegistryBuilder, BoundMethod, RegistrationError};
pub use subsystem::BindingSubsystem;
