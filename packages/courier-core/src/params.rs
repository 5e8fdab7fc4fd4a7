//! Formal-parameter model and client-side pre-flight validation.
//!
//! Stubs validate call arguments against these descriptions before any
//! network I/O, so malformed calls fail locally and immediately.

use rmpv::Value;

use crate::error::RpcError;

/// Wire-level kind a formal parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Integer,
    Float,
    Str,
    Binary,
    List,
    Map,
    /// Accepts any non-nil value.
    Any,
}

impl ValueKind {
    /// Whether a concrete (non-nil) value is assignable to this kind.
    /// Integers are assignable to `Float`; nothing else widens.
    #[must_use]
    pub fn admits(self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Bool => matches!(value, Value::Boolean(_)),
            Self::Integer => matches!(value, Value::Integer(_)),
            Self::Float => matches!(value, Value::F32(_) | Value::F64(_) | Value::Integer(_)),
            Self::Str => matches!(value, Value::String(_)),
            Self::Binary => matches!(value, Value::Binary(_)),
            Self::List => matches!(value, Value::Array(_)),
            Self::Map => matches!(value, Value::Map(_)),
        }
    }
}

/// One formal parameter of a remote method.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ValueKind,
    /// Whether `Value::Nil` is an acceptable argument.
    pub nullable: bool,
}

impl ParamSpec {
    #[must_use]
    pub const fn new(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            nullable: false,
        }
    }

    #[must_use]
    pub const fn nullable(name: &'static str, kind: ValueKind) -> Self {
        Self {
            name,
            kind,
            nullable: true,
        }
    }
}

/// Validates call arguments against the formal parameters.
///
/// Checks, in order: argument count, nil against non-nullable parameters,
/// and kind assignability. Runs before any request is built.
///
/// # Errors
///
/// Returns [`RpcError::ArgumentMismatch`] naming the offending parameter.
pub fn validate_arguments(
    method: &str,
    params: &[ParamSpec],
    args: &[Value],
) -> Result<(), RpcError> {
    if args.len() != params.len() {
        return Err(RpcError::ArgumentMismatch(format!(
            "method {method} expects {} arguments, got {}",
            params.len(),
            args.len()
        )));
    }
    for (param, arg) in params.iter().zip(args) {
        if matches!(arg, Value::Nil) {
            if param.nullable {
                continue;
            }
            return Err(RpcError::ArgumentMismatch(format!(
                "nil is not assignable to parameter {} of {method}",
                param.name
            )));
        }
        if !param.kind.admits(arg) {
            return Err(RpcError::ArgumentMismatch(format!(
                "argument for parameter {} of {method} has the wrong kind",
                param.name
            )));
        }
    }
    Ok(())
}
