//! Method dispatch tables: explicit per-service registration.
//!
//! Every remotely callable method is registered at startup as a typed
//! invoker closure keyed by (service id, method name). The invoker owns
//! per-argument decoding and return encoding, so the dispatcher never
//! needs runtime type lookup.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use courier_core::codec::{from_value, to_value};
use courier_core::error::RpcError;
use courier_core::params::ParamSpec;

use crate::scope::ServiceInstance;

type Invoker =
    Arc<dyn Fn(ServiceInstance, Vec<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

fn downcast<S: Any + Send + Sync>(instance: ServiceInstance) -> Result<Arc<S>, RpcError> {
    instance.downcast::<S>().map_err(|_| {
        RpcError::InvocationFailure("service instance has an unexpected concrete type".to_string())
    })
}

fn decode_arg<T: DeserializeOwned>(param: &ParamSpec, value: Value) -> Result<T, RpcError> {
    from_value(value).map_err(|e| {
        RpcError::ArgumentMismatch(format!("cannot decode parameter {}: {e}", param.name))
    })
}

fn encode_return<R: Serialize>(value: &R) -> Result<Value, RpcError> {
    to_value(value).map_err(|e| RpcError::Codec(format!("cannot encode return value: {e}")))
}

fn invocation_failure(err: &anyhow::Error) -> RpcError {
    RpcError::InvocationFailure(err.to_string())
}

fn arity_guard(expected: usize, got: usize) -> Result<(), RpcError> {
    if expected == got {
        Ok(())
    } else {
        Err(RpcError::ArgumentMismatch(format!(
            "invoker expects {expected} arguments, got {got}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Method
// ---------------------------------------------------------------------------

/// One registered remote method: formal parameters plus a typed invoker.
///
/// Unit-returning handlers encode success as `Value::Nil`.
#[derive(Clone)]
pub struct Method {
    name: String,
    params: Vec<ParamSpec>,
    invoker: Invoker,
}

impl Method {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Invokes the registered handler with already-counted arguments.
    /// Per-argument decoding happens inside the typed invoker.
    ///
    /// # Errors
    ///
    /// `ArgumentMismatch` on a decode failure, `InvocationFailure` when
    /// the handler itself faults.
    pub fn invoke(
        &self,
        instance: ServiceInstance,
        args: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, RpcError>> {
        (self.invoker)(instance, args)
    }

    /// Synchronous handler taking no arguments.
    pub fn sync0<S, R, F>(name: &str, handler: F) -> Self
    where
        S: Any + Send + Sync,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: Vec::new(),
            invoker: Arc::new(move |instance, args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(0, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let out = handler(service).map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Synchronous handler taking one argument.
    pub fn sync1<S, A0, R, F>(name: &str, p0: ParamSpec, handler: F) -> Self
    where
        S: Any + Send + Sync,
        A0: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A0) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: vec![p0],
            invoker: Arc::new(move |instance, mut args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(1, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let a0: A0 = decode_arg(&p0, args.remove(0))?;
                    let out = handler(service, a0).map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Synchronous handler taking two arguments.
    pub fn sync2<S, A0, A1, R, F>(name: &str, p0: ParamSpec, p1: ParamSpec, handler: F) -> Self
    where
        S: Any + Send + Sync,
        A0: DeserializeOwned + Send + 'static,
        A1: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A0, A1) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: vec![p0, p1],
            invoker: Arc::new(move |instance, mut args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(2, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let a1: A1 = decode_arg(&p1, args.remove(1))?;
                    let a0: A0 = decode_arg(&p0, args.remove(0))?;
                    let out = handler(service, a0, a1).map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Synchronous handler taking three arguments.
    pub fn sync3<S, A0, A1, A2, R, F>(
        name: &str,
        p0: ParamSpec,
        p1: ParamSpec,
        p2: ParamSpec,
        handler: F,
    ) -> Self
    where
        S: Any + Send + Sync,
        A0: DeserializeOwned + Send + 'static,
        A1: DeserializeOwned + Send + 'static,
        A2: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A0, A1, A2) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: vec![p0, p1, p2],
            invoker: Arc::new(move |instance, mut args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(3, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let a2: A2 = decode_arg(&p2, args.remove(2))?;
                    let a1: A1 = decode_arg(&p1, args.remove(1))?;
                    let a0: A0 = decode_arg(&p0, args.remove(0))?;
                    let out = handler(service, a0, a1, a2).map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Asynchronous handler taking no arguments. The worker awaits it to
    /// completion before the response is produced.
    pub fn async0<S, R, F, Fut>(name: &str, handler: F) -> Self
    where
        S: Any + Send + Sync,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: Vec::new(),
            invoker: Arc::new(move |instance, args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(0, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let out = handler(service).await.map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Asynchronous handler taking one argument.
    pub fn async1<S, A0, R, F, Fut>(name: &str, p0: ParamSpec, handler: F) -> Self
    where
        S: Any + Send + Sync,
        A0: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A0) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: vec![p0],
            invoker: Arc::new(move |instance, mut args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(1, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let a0: A0 = decode_arg(&p0, args.remove(0))?;
                    let out = handler(service, a0)
                        .await
                        .map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Asynchronous handler taking two arguments.
    pub fn async2<S, A0, A1, R, F, Fut>(name: &str, p0: ParamSpec, p1: ParamSpec, handler: F) -> Self
    where
        S: Any + Send + Sync,
        A0: DeserializeOwned + Send + 'static,
        A1: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A0, A1) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: vec![p0, p1],
            invoker: Arc::new(move |instance, mut args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(2, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let a1: A1 = decode_arg(&p1, args.remove(1))?;
                    let a0: A0 = decode_arg(&p0, args.remove(0))?;
                    let out = handler(service, a0, a1)
                        .await
                        .map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }

    /// Asynchronous handler taking three arguments.
    pub fn async3<S, A0, A1, A2, R, F, Fut>(
        name: &str,
        p0: ParamSpec,
        p1: ParamSpec,
        p2: ParamSpec,
        handler: F,
    ) -> Self
    where
        S: Any + Send + Sync,
        A0: DeserializeOwned + Send + 'static,
        A1: DeserializeOwned + Send + 'static,
        A2: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<S>, A0, A1, A2) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        Self {
            name: name.to_string(),
            params: vec![p0, p1, p2],
            invoker: Arc::new(move |instance, mut args| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    arity_guard(3, args.len())?;
                    let service = downcast::<S>(instance)?;
                    let a2: A2 = decode_arg(&p2, args.remove(2))?;
                    let a1: A1 = decode_arg(&p1, args.remove(1))?;
                    let a0: A0 = decode_arg(&p0, args.remove(0))?;
                    let out = handler(service, a0, a1, a2)
                        .await
                        .map_err(|e| invocation_failure(&e))?;
                    encode_return(&out)
                })
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// MethodTable
// ---------------------------------------------------------------------------

/// Dispatch table mapping (service id, method name) to typed invokers.
///
/// Built once before the server starts, then shared read-only with every
/// worker.
#[derive(Default, Clone)]
pub struct MethodTable {
    services: HashMap<String, HashMap<String, Arc<Method>>>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method under a service id. A later registration with
    /// the same name replaces the earlier one.
    pub fn insert(&mut self, service: &str, method: Method) {
        self.services
            .entry(service.to_string())
            .or_default()
            .insert(method.name.clone(), Arc::new(method));
    }

    /// Whether any method is registered under the service id.
    #[must_use]
    pub fn has_service(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    #[must_use]
    pub fn lookup(&self, service: &str, method: &str) -> Option<Arc<Method>> {
        self.services.get(service)?.get(method).cloned()
    }
}
