//! Failure taxonomy shared by both sides of the wire.
//!
//! [`RpcError`] is the caller-visible error; [`ErrorPayload`] is its wire
//! form. The mapping between the two is total and preserves kind and
//! message, so a client can branch on a failure programmatically without
//! any knowledge of the server's internal fault representation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;

/// Classifies every failure an RPC call can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Pre-flight or server-side argument count/decode failure.
    ArgumentMismatch,
    /// No binding for the requested service id.
    ServiceNotFound,
    /// The service exists but the named method does not.
    MethodNotFound,
    /// The target method itself faulted.
    InvocationFailure,
    /// The client-side wait was aborted.
    Cancelled,
    /// Scope provider has no binding for the requested id.
    NotRegistered,
    /// Scope provider misuse (resolve without scope, double begin, ...).
    ScopeState,
    /// Socket-level fault, never conflated with application failures.
    Transport,
    /// Encode/decode fault at the codec boundary.
    Codec,
}

/// Wire form of a failure: enough to reconstruct a caller-visible error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorPayload {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Caller-visible failure for an RPC call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("method not found: {0}")]
    MethodNotFound(String),
    #[error("invocation failed: {0}")]
    InvocationFailure(String),
    #[error("call cancelled")]
    Cancelled,
    #[error("service not registered: {0}")]
    NotRegistered(String),
    #[error("scope state error: {0}")]
    ScopeState(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("codec error: {0}")]
    Codec(String),
}

impl RpcError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ArgumentMismatch(_) => ErrorKind::ArgumentMismatch,
            Self::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::InvocationFailure(_) => ErrorKind::InvocationFailure,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NotRegistered(_) => ErrorKind::NotRegistered,
            Self::ScopeState(_) => ErrorKind::ScopeState,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Codec(_) => ErrorKind::Codec,
        }
    }

    /// The failure message without the kind prefix added by `Display`.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::ArgumentMismatch(m)
            | Self::ServiceNotFound(m)
            | Self::MethodNotFound(m)
            | Self::InvocationFailure(m)
            | Self::NotRegistered(m)
            | Self::ScopeState(m)
            | Self::Transport(m)
            | Self::Codec(m) => m,
            Self::Cancelled => "call cancelled",
        }
    }

    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.kind(), self.message())
    }
}

impl From<ErrorPayload> for RpcError {
    fn from(payload: ErrorPayload) -> Self {
        let ErrorPayload { kind, message } = payload;
        match kind {
            ErrorKind::ArgumentMismatch => Self::ArgumentMismatch(message),
            ErrorKind::ServiceNotFound => Self::ServiceNotFound(message),
            ErrorKind::MethodNotFound => Self::MethodNotFound(message),
            ErrorKind::InvocationFailure => Self::InvocationFailure(message),
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::NotRegistered => Self::NotRegistered(message),
            ErrorKind::ScopeState => Self::ScopeState(message),
            ErrorKind::Transport => Self::Transport(message),
            ErrorKind::Codec => Self::Codec(message),
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        Self::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip_preserves_kind_and_message() {
        let errors = [
            RpcError::ArgumentMismatch("bad arg".into()),
            RpcError::ServiceNotFound("svc".into()),
            RpcError::MethodNotFound("svc.m".into()),
            RpcError::InvocationFailure("boom".into()),
            RpcError::Cancelled,
            RpcError::NotRegistered("svc".into()),
            RpcError::ScopeState("no scope".into()),
            RpcError::Transport("refused".into()),
            RpcError::Codec("truncated".into()),
        ];
        for err in errors {
            let back = RpcError::from(err.to_payload());
            assert_eq!(back.kind(), err.kind());
            assert_eq!(back.message(), err.message());
        }
    }

    #[test]
    fn kind_serializes_as_kebab_case() {
        let payload = ErrorPayload::new(ErrorKind::ServiceNotFound, "x");
        let bytes = rmp_serde::to_vec_named(&payload).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("service-not-found"));
    }

    #[test]
    fn display_includes_message() {
        let err = RpcError::InvocationFailure("boom".into());
        assert_eq!(err.to_string(), "invocation failed: boom");
    }
}
