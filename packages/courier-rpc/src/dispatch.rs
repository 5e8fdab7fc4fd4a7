//! Request dispatch: one decoded request in, exactly one response out.
//!
//! The dispatcher runs inside a worker, after the run loop has handed the
//! frame off and before the reply is queued for the socket owner. It never
//! fails outward: every fault, including a handler panic, becomes an error
//! response carrying the originating request id.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, warn};

use courier_core::envelope::{RequestEnvelope, ResponseEnvelope};
use courier_core::error::RpcError;

use crate::registry::MethodTable;
use crate::scope::{ScopeError, ScopeProvider, ServiceScope};

/// Observes or rewrites requests before dispatch.
pub type RequestHook = Arc<dyn Fn(RequestEnvelope) -> RequestEnvelope + Send + Sync>;

/// Observes or rewrites responses after dispatch, with the request in view.
pub type ResponseHook =
    Arc<dyn Fn(&RequestEnvelope, ResponseEnvelope) -> ResponseEnvelope + Send + Sync>;

/// Turns decoded requests into responses against a dispatch table.
///
/// Cheap to clone through its inner `Arc`s; one instance is shared by all
/// workers.
#[derive(Clone)]
pub struct Dispatcher {
    methods: Arc<MethodTable>,
    scopes: Arc<dyn ScopeProvider>,
    request_hook: Option<RequestHook>,
    response_hook: Option<ResponseHook>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(methods: MethodTable, scopes: Arc<dyn ScopeProvider>) -> Self {
        Self {
            methods: Arc::new(methods),
            scopes,
            request_hook: None,
            response_hook: None,
        }
    }

    /// Installs a hook applied to each request before dispatch.
    #[must_use]
    pub fn with_request_hook(mut self, hook: RequestHook) -> Self {
        self.request_hook = Some(hook);
        self
    }

    /// Installs a hook applied to each response before it is queued.
    #[must_use]
    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.response_hook = Some(hook);
        self
    }

    /// Handles one request to completion. Infallible by construction: any
    /// fault is folded into the error slot of the response.
    ///
    /// The scope opens before anything else touches the request and
    /// closes on every exit path, unresolvable services included.
    pub async fn handle(&self, request: RequestEnvelope) -> ResponseEnvelope {
        let (request, result) = match self.scopes.begin_scope() {
            Ok(mut scope) => {
                let request = match &self.request_hook {
                    Some(hook) => hook(request),
                    None => request,
                };
                debug!(id = %request.id, service = %request.service, method = %request.method, "dispatching");
                let result = self.execute(scope.as_mut(), &request).await;
                // Teardown failure is reported, never substituted for the
                // invocation outcome.
                if let Err(teardown) = scope.end() {
                    warn!(id = %request.id, "scope teardown failed: {teardown}");
                }
                (request, result)
            }
            Err(e) => (request, Err(RpcError::ScopeState(e.to_string()))),
        };
        let response = match result {
            Ok(value) => ResponseEnvelope::ok(request.id, value),
            Err(err) => {
                debug!(id = %request.id, kind = ?err.kind(), "request failed: {err}");
                ResponseEnvelope::error(request.id, err.to_payload())
            }
        };
        match &self.response_hook {
            Some(hook) => hook(&request, response),
            None => response,
        }
    }

    async fn execute(
        &self,
        scope: &mut dyn ServiceScope,
        request: &RequestEnvelope,
    ) -> Result<rmpv::Value, RpcError> {
        if !self.methods.has_service(&request.service) {
            return Err(RpcError::ServiceNotFound(request.service.clone()));
        }

        let instance = scope.resolve(&request.service).map_err(|e| match e {
            ScopeError::NotRegistered(id) => RpcError::ServiceNotFound(id),
            other => RpcError::ScopeState(other.to_string()),
        })?;

        let method = self
            .methods
            .lookup(&request.service, &request.method)
            .ok_or_else(|| {
                RpcError::MethodNotFound(format!("{}.{}", request.service, request.method))
            })?;

        if method.arity() != request.args.len() {
            return Err(RpcError::ArgumentMismatch(format!(
                "{}.{} expects {} arguments, got {}",
                request.service,
                request.method,
                method.arity(),
                request.args.len()
            )));
        }

        let invocation = method.invoke(instance, request.args.clone());
        match AssertUnwindSafe(invocation).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(RpcError::InvocationFailure(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}
