//! # Binding Registry
//!
//! Read-only mapping from method names to invokers. Built once through
//! [`BindingRegistryBuilder`], then shared behind `Arc` and read
//! concurrently without locking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use shared_types::{InvocationError, MethodDescriptor};
use thiserror::Error;
use tracing::debug;

use crate::invoker::{IntoInvoker, Invoker};

/// Errors raised while building the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// Owner or method is empty or not identifier-like.
    #[error("Invalid binding name: {0:?}")]
    InvalidName(String),

    /// The `(owner, method)` pair is already registered.
    #[error("Duplicate binding: {0}")]
    Duplicate(String),
}

/// One registered method.
#[derive(Clone)]
pub struct BoundMethod {
    owner: String,
    method: String,
    arity: usize,
    invoker: Invoker,
}

impl BoundMethod {
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// `Owner.Method`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.method)
    }

    #[must_use]
    pub fn descriptor(&self) -> MethodDescriptor {
        MethodDescriptor {
            owner: self.owner.clone(),
            method: self.method.clone(),
            arity: self.arity,
        }
    }

    /// Check arity, then run the invoker. Panics are caught and reported as
    /// `InvocationFailure`.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, InvocationError> {
        if args.len() != self.arity {
            return Err(InvocationError::failure(format!(
                "{} expects {} argument(s), got {}",
                self.qualified_name(),
                self.arity,
                args.len()
            )));
        }

        let invoker = &self.invoker;
        match catch_unwind(AssertUnwindSafe(|| invoker(args))) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(InvocationError::failure(format!(
                    "{} panicked: {}",
                    self.qualified_name(),
                    reason
                )))
            }
        }
    }
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMethod")
            .field("owner", &self.owner)
            .field("method", &self.method)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// The registry of invokable methods.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    /// Keyed by qualified name.
    methods: BTreeMap<String, BoundMethod>,
    /// Bare method name to the qualified names that define it.
    by_method: HashMap<String, Vec<String>>,
}

impl BindingRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> BindingRegistryBuilder {
        BindingRegistryBuilder::default()
    }

    /// Resolve `name`: an exact `Owner.Method`, or a bare method name defined
    /// by exactly one owner.
    pub fn lookup(&self, name: &str) -> Result<&BoundMethod, InvocationError> {
        if let Some(bound) = self.methods.get(name) {
            return Ok(bound);
        }

        match self.by_method.get(name).map(Vec::as_slice) {
            Some([qualified]) => self
                .methods
                .get(qualified)
                .ok_or_else(|| InvocationError::method_not_found(name)),
            Some(candidates) if candidates.len() > 1 => Err(InvocationError {
                kind: shared_types::InvocationErrorKind::MethodNotFound,
                message: format!(
                    "method name {name} is ambiguous, use one of: {}",
                    candidates.join(", ")
                ),
            }),
            _ => Err(InvocationError::method_not_found(name)),
        }
    }

    /// Look up and invoke.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, InvocationError> {
        let bound = self.lookup(name)?;
        debug!(method = %bound.qualified_name(), args = args.len(), "Invoking bound method");
        bound.call(args)
    }

    /// Whether `name` resolves.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Public description of every method, sorted by qualified name.
    #[must_use]
    pub fn describe(&self) -> Vec<MethodDescriptor> {
        self.methods.values().map(BoundMethod::descriptor).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Builder validating every registration.
#[derive(Default)]
pub struct BindingRegistryBuilder {
    registry: BindingRegistry,
}

impl BindingRegistryBuilder {
    /// Register a typed closure.
    pub fn bind<Args, F>(self, owner: &str, method: &str, f: F) -> Result<Self, RegistrationError>
    where
        F: IntoInvoker<Args>,
    {
        self.bind_raw(owner, method, F::ARITY, f.into_invoker())
    }

    /// Register an untyped invoker with a declared arity.
    pub fn bind_raw(
        mut self,
        owner: &str,
        method: &str,
        arity: usize,
        invoker: Invoker,
    ) -> Result<Self, RegistrationError> {
        validate_name(owner)?;
        validate_name(method)?;

        let qualified = format!("{owner}.{method}");
        if self.registry.methods.contains_key(&qualified) {
            return Err(RegistrationError::Duplicate(qualified));
        }

        self.registry
            .by_method
            .entry(method.to_string())
            .or_default()
            .push(qualified.clone());
        self.registry.methods.insert(
            qualified,
            BoundMethod {
                owner: owner.to_string(),
                method: method.to_string(),
                arity,
                invoker,
            },
        );
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> BindingRegistry {
        self.registry
    }
}

fn validate_name(name: &str) -> Result<(), RegistrationError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' => {
            chars.all(|c| c.is_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RegistrationError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::InvocationErrorKind;
    use std::sync::Arc;

    fn calculator() -> BindingRegistry {
        BindingRegistry::builder()
            .bind("Calculator", "Add", |a: i64, b: i64| Ok::<_, String>(a + b))
            .unwrap()
            .bind("Calculator", "Panic", || -> Result<i64, String> { panic!("kaboom") })
            .unwrap()
            .bind("Greeter", "Hello", |name: String| Ok::<_, String>(format!("Hello {name}")))
            .unwrap()
            .build()
    }

    #[test]
    fn test_invoke_unqualified_and_qualified() {
        let registry = calculator();
        assert_eq!(registry.invoke("Add", vec![json!(2), json!(3)]), Ok(json!(5)));
        assert_eq!(
            registry.invoke("Calculator.Add", vec![json!(2), json!(3)]),
            Ok(json!(5))
        );
    }

    #[test]
    fn test_missing_method() {
        let err = calculator().invoke("DoesNotExist", vec![]).unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::MethodNotFound);
    }

    #[test]
    fn test_arity_checked_before_call() {
        let err = calculator().invoke("Add", vec![json!(1)]).unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::InvocationFailure);
        assert!(err.message.contains("expects 2"));
    }

    #[test]
    fn test_panic_is_caught() {
        let err = calculator().invoke("Panic", vec![]).unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::InvocationFailure);
        assert!(err.message.contains("kaboom"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let result = BindingRegistry::builder()
            .bind("A", "X", || Ok::<_, String>(1))
            .unwrap()
            .bind("A", "X", || Ok::<_, String>(2));
        assert_eq!(result.err(), Some(RegistrationError::Duplicate("A.X".into())));
    }

    #[test]
    fn test_invalid_names_rejected() {
        for (owner, method) in [("", "X"), ("A", ""), ("A.B", "X"), ("A", "1x")] {
            let result = BindingRegistry::builder().bind(owner, method, || Ok::<_, String>(()));
            assert!(matches!(result, Err(RegistrationError::InvalidName(_))));
        }
    }

    #[test]
    fn test_ambiguous_bare_name() {
        let registry = BindingRegistry::builder()
            .bind("A", "Run", || Ok::<_, String>(1))
            .unwrap()
            .bind("B", "Run", || Ok::<_, String>(2))
            .unwrap()
            .build();
        let err = registry.invoke("Run", vec![]).unwrap_err();
        assert_eq!(err.kind, InvocationErrorKind::MethodNotFound);
        assert!(err.message.contains("ambiguous"));
        assert_eq!(registry.invoke("B.Run", vec![]), Ok(json!(2)));
    }

    #[test]
    fn test_describe_sorted() {
        let names: Vec<String> = calculator()
            .describe()
            .iter()
            .map(MethodDescriptor::qualified_name)
            .collect();
        assert_eq!(names, ["Calculator.Add", "Calculator.Panic", "Greeter.Hello"]);
    }

    #[test]
    fn test_bind_raw() {
        let echo: Invoker = Arc::new(|args: Vec<Value>| Ok(Value::Array(args)));
        let registry = BindingRegistry::builder()
            .bind_raw("Echo", "All", 2, echo)
            .unwrap()
            .build();
        assert_eq!(
            registry.invoke("All", vec![json!(1), json!("a")]),
            Ok(json!([1, "a"]))
        );
    }
}
