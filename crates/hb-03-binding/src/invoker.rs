//! Typed closures to uniform invokers.
//!
//! Every bound method is stored as an `Invoker`: a function from positional
//! JSON arguments to a JSON result. `IntoInvoker` builds one from a plain
//! closure whose arguments are `DeserializeOwned` and whose result is
//! `Result<R: Serialize, E: Display>`.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared_types::InvocationError;

/// Uniform callable stored in the registry.
pub type Invoker = Arc<dyn Fn(Vec<Value>) -> Result<Value, InvocationError> + Send + Sync>;

/// Conversion from a typed closure into an [`Invoker`].
///
/// `Args` is the tuple of argument types; it only exists to keep the
/// implementations for different arities apart.
pub trait IntoInvoker<Args>: Send + Sync + 'static {
    /// Number of positional arguments.
    const ARITY: usize;

    fn into_invoker(self) -> Invoker;
}

fn decode_arg<T: DeserializeOwned>(value: Option<Value>, index: usize) -> Result<T, InvocationError> {
    let value = value.ok_or_else(|| InvocationError::failure(format!("missing argument {index}")))?;
    serde_json::from_value(value)
        .map_err(|e| InvocationError::failure(format!("argument {index}: {e}")))
}

fn encode_output<R: Serialize, E: fmt::Display>(output: Result<R, E>) -> Result<Value, InvocationError> {
    let value = output.map_err(|e| InvocationError::failure(e.to_string()))?;
    serde_json::to_value(value)
        .map_err(|e| InvocationError::failure(format!("result encoding failed: {e}")))
}

macro_rules! impl_into_invoker {
    ($arity:expr; $($name:ident : $ty:ident),*) => {
        impl<F, R, E, $($ty,)*> IntoInvoker<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> Result<R, E> + Send + Sync + 'static,
            R: Serialize + 'static,
            E: fmt::Display + 'static,
            $($ty: DeserializeOwned + 'static,)*
        {
            const ARITY: usize = $arity;

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn into_invoker(self) -> Invoker {
                Arc::new(move |args: Vec<Value>| {
                    let mut args = args.into_iter();
                    let mut index = 0usize;
                    $(
                        let $name: $ty = decode_arg(args.next(), index)?;
                        index += 1;
                    )*
                    encode_output((self)($($name),*))
                })
            }
        }
    };
}

impl_into_invoker!(0;);
impl_into_invoker!(1; a: A);
impl_into_invoker!(2; a: A, b: B);
impl_into_invoker!(3; a: A, b: B, c: C);
impl_into_invoker!(4; a: A, b: B, c: C, d: D);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoker<Args, F: IntoInvoker<Args>>(f: F) -> (usize, Invoker) {
        (F::ARITY, f.into_invoker())
    }

    #[test]
    fn test_two_arguments() {
        let (arity, add) = invoker(|a: i64, b: i64| Ok::<_, String>(a + b));
        assert_eq!(arity, 2);
        assert_eq!(add(vec![json!(2), json!(3)]), Ok(json!(5)));
    }

    #[test]
    fn test_zero_arguments() {
        let (arity, ping) = invoker(|| Ok::<_, String>("pong"));
        assert_eq!(arity, 0);
        assert_eq!(ping(vec![]), Ok(json!("pong")));
    }

    #[test]
    fn test_wrong_argument_type() {
        let (_, add) = invoker(|a: i64, b: i64| Ok::<_, String>(a + b));
        let err = add(vec![json!("two"), json!(3)]).unwrap_err();
        assert!(err.message.starts_with("argument 0"));
    }

    #[test]
    fn test_method_error_becomes_failure() {
        let (_, div) = invoker(|a: i64, b: i64| {
            if b == 0 {
                Err("division by zero".to_string())
            } else {
                Ok(a / b)
            }
        });
        let err = div(vec![json!(1), json!(0)]).unwrap_err();
        assert_eq!(err, InvocationError::failure("division by zero"));
    }
}
