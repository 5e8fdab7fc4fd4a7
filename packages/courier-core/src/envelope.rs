//! Request and response envelopes crossing the wire.
//!
//! Envelopes are serialized as named `MsgPack` maps by the default codec
//! (`rmp_serde::to_vec_named()`), so field names are part of the wire
//! contract. Argument and return slots hold opaque `rmpv::Value`s; typed
//! marshaling happens at the call sites, not here.

use rmpv::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorPayload;

/// A single RPC call travelling client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation token, generated once at creation. Immutable after the
    /// request is sent; identifies exactly one in-flight call.
    pub id: Uuid,
    /// Stable service identifier, independent of process layout.
    pub service: String,
    /// Target method name on the service.
    pub method: String,
    /// Ordered arguments, one opaque value per formal parameter.
    pub args: Vec<Value>,
}

impl RequestEnvelope {
    /// Creates a request with a fresh correlation id.
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: service.into(),
            method: method.into(),
            args,
        }
    }
}

/// The single reply for one request.
///
/// Exactly one of `return_value`/`error` is populated; the constructors
/// enforce it. A method without a return value reports success as
/// `Value::Nil`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Equals the originating request's id.
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub return_value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorPayload>,
}

impl ResponseEnvelope {
    /// Builds a success reply carrying the encoded return value.
    #[must_use]
    pub fn ok(id: Uuid, return_value: Value) -> Self {
        Self {
            id,
            return_value: Some(return_value),
            error: None,
        }
    }

    /// Builds a failure reply carrying the error payload.
    #[must_use]
    pub fn error(id: Uuid, payload: ErrorPayload) -> Self {
        Self {
            id,
            return_value: None,
            error: Some(payload),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
