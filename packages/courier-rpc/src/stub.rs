//! Typed call stubs: descriptors plus dispatch helpers on the client.
//!
//! A stub type holds one `const` [`MethodDescriptor`] per remote method
//! and forwards through [`RpcClient::invoke`] or its variants. Arguments
//! are validated against the descriptor before any network I/O, so a
//! malformed call never leaves the process.

use rmpv::Value;
use serde::de::DeserializeOwned;

use courier_core::codec::from_value;
use courier_core::envelope::{RequestEnvelope, ResponseEnvelope};
use courier_core::error::RpcError;
use courier_core::params::{validate_arguments, ParamSpec};

use crate::client::RpcClient;

/// Static description of one remote method as a stub sees it.
#[derive(Debug, Clone, Copy)]
pub struct MethodDescriptor {
    /// Service id the request envelope carries.
    pub service: &'static str,
    /// Local stub method name, used in diagnostics.
    pub name: &'static str,
    /// Wire method name when it differs from `name`. Lets an async
    /// stub method wrap a remote method registered under the plain name.
    pub wire_name: Option<&'static str>,
    /// Formal parameters, validated before dispatch.
    pub params: &'static [ParamSpec],
}

impl MethodDescriptor {
    #[must_use]
    pub const fn new(
        service: &'static str,
        name: &'static str,
        params: &'static [ParamSpec],
    ) -> Self {
        Self {
            service,
            name,
            wire_name: None,
            params,
        }
    }

    /// Descriptor whose stub name wraps a differently-named wire method.
    #[must_use]
    pub const fn wrapping(
        service: &'static str,
        name: &'static str,
        wire_name: &'static str,
        params: &'static [ParamSpec],
    ) -> Self {
        Self {
            service,
            name,
            wire_name: Some(wire_name),
            params,
        }
    }

    /// The method name placed in the request envelope.
    #[must_use]
    pub fn envelope_method(&self) -> &'static str {
        self.wire_name.unwrap_or(self.name)
    }
}

fn into_result(response: ResponseEnvelope) -> Result<Value, RpcError> {
    if let Some(payload) = response.error {
        return Err(RpcError::from(payload));
    }
    response.return_value.ok_or_else(|| {
        RpcError::Transport("response carried neither return value nor error".to_string())
    })
}

impl RpcClient {
    /// Dispatches a validated call and decodes the return value.
    ///
    /// # Errors
    ///
    /// `ArgumentMismatch` before any I/O when the arguments do not fit
    /// the descriptor; otherwise whatever the call or decode surfaces.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        desc: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<T, RpcError> {
        let value = into_result(self.dispatch_checked(desc, args).await?)?;
        Ok(from_value(value)?)
    }

    /// Dispatches a validated call whose remote method returns nothing.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`RpcClient::invoke`].
    pub async fn invoke_unit(
        &self,
        desc: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<(), RpcError> {
        into_result(self.dispatch_checked(desc, args).await?).map(|_| ())
    }

    /// Blocking form of [`RpcClient::invoke`] for synchronous callers.
    ///
    /// Must run on a thread outside the runtime's workers, for example a
    /// plain `std::thread` or `spawn_blocking` closure.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`RpcClient::invoke`].
    ///
    /// # Panics
    ///
    /// Panics when called from within an async context.
    pub fn invoke_blocking<T: DeserializeOwned>(
        &self,
        desc: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<T, RpcError> {
        self.runtime().clone().block_on(self.invoke(desc, args))
    }

    /// Blocking form of [`RpcClient::invoke_unit`].
    ///
    /// # Errors
    ///
    /// Same failure surface as [`RpcClient::invoke_unit`].
    ///
    /// # Panics
    ///
    /// Panics when called from within an async context.
    pub fn invoke_blocking_unit(
        &self,
        desc: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<(), RpcError> {
        self.runtime().clone().block_on(self.invoke_unit(desc, args))
    }

    async fn dispatch_checked(
        &self,
        desc: &MethodDescriptor,
        args: Vec<Value>,
    ) -> Result<ResponseEnvelope, RpcError> {
        validate_arguments(desc.name, desc.params, &args)?;
        self.call(RequestEnvelope::new(
            desc.service,
            desc.envelope_method(),
            args,
        ))
        .await
    }
}
