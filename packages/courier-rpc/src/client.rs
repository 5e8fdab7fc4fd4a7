//! RPC client: one connection per call, correlated replies, cancellation.
//!
//! Every call dials its own dealer connection, so replies arrive on the
//! socket that sent the request. Correlation ids are still checked
//! through a shared pending-call table; a reply whose id matches no
//! registered call is a transport fault, never silently accepted.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{oneshot, watch};
use tracing::debug;
use uuid::Uuid;

use courier_core::codec::Codec;
use courier_core::envelope::{RequestEnvelope, ResponseEnvelope};
use courier_core::error::RpcError;

use crate::config::{ClientConfig, Endpoint};
use crate::transport::DealerSocket;

/// In-flight calls awaiting their correlated reply.
#[derive(Default)]
struct PendingCalls {
    waiters: DashMap<Uuid, oneshot::Sender<ResponseEnvelope>>,
}

impl PendingCalls {
    fn register(&self, id: Uuid) -> oneshot::Receiver<ResponseEnvelope> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id, tx);
        rx
    }

    /// Routes a reply to its waiter. False when the id matches no call.
    fn complete(&self, response: ResponseEnvelope) -> bool {
        match self.waiters.remove(&response.id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => false,
        }
    }

    fn forget(&self, id: Uuid) {
        self.waiters.remove(&id);
    }

    fn len(&self) -> usize {
        self.waiters.len()
    }
}

/// Calls one remote endpoint.
///
/// Cheap to clone; clones share the pending table and the cancellation
/// signal. Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct RpcClient {
    endpoint: Endpoint,
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    pending: Arc<PendingCalls>,
    cancel_tx: Arc<watch::Sender<bool>>,
    runtime: tokio::runtime::Handle,
}

impl RpcClient {
    /// Creates a client for the endpoint. Captures the current runtime
    /// handle for the blocking call path.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(endpoint: Endpoint, config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            endpoint,
            config,
            codec,
            pending: Arc::new(PendingCalls::default()),
            cancel_tx: Arc::new(cancel_tx),
            runtime: tokio::runtime::Handle::current(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Aborts every in-flight and future call with [`RpcError::Cancelled`].
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Number of calls currently awaiting a reply.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }

    /// Sends one request and waits for its correlated reply.
    ///
    /// # Errors
    ///
    /// `Transport` for socket faults and correlation violations, `Codec`
    /// for encode/decode faults, `Cancelled` when [`RpcClient::cancel`]
    /// fires before the reply arrives.
    pub async fn call(&self, request: RequestEnvelope) -> Result<ResponseEnvelope, RpcError> {
        // Subscribe before any work so a cancel landing at any later
        // point is observed by `wait_for` below.
        let mut cancel_rx = self.cancel_tx.subscribe();
        if *cancel_rx.borrow() {
            return Err(RpcError::Cancelled);
        }
        let id = request.id;
        let reply_rx = self.pending.register(id);
        debug!(%id, service = %request.service, method = %request.method, "call started");

        let response = match self.round_trip(&request, &mut cancel_rx).await {
            Ok(response) => response,
            Err(e) => {
                self.pending.forget(id);
                return Err(e);
            }
        };

        if response.id != id {
            self.pending.forget(id);
            return Err(RpcError::Transport(format!(
                "correlation violation: sent {id}, reply carries {}",
                response.id
            )));
        }
        // Route through the pending table so correlation is enforced in
        // one place even with per-call sockets.
        if !self.pending.complete(response) {
            return Err(RpcError::Transport(format!(
                "reply for {id} matched no pending call"
            )));
        }
        reply_rx
            .await
            .map_err(|_| RpcError::Transport(format!("reply channel for {id} dropped")))
    }

    async fn round_trip(
        &self,
        request: &RequestEnvelope,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<ResponseEnvelope, RpcError> {
        let bytes = self.codec.encode_request(request)?;
        let exchange = async {
            let mut socket = DealerSocket::connect(&self.endpoint, self.config.max_frame_bytes)
                .await
                .map_err(|e| RpcError::Transport(format!("connect {}: {e}", self.endpoint)))?;
            socket
                .send(Bytes::from(bytes))
                .await
                .map_err(|e| RpcError::Transport(format!("send failed: {e}")))?;
            socket
                .recv()
                .await
                .map_err(|e| RpcError::Transport(format!("receive failed: {e}")))
        };
        // `wait_for` checks the current value first, so a cancel that
        // fired while connecting or sending still aborts the call.
        let frame = tokio::select! {
            received = exchange => received?,
            _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                debug!(id = %request.id, "call cancelled");
                return Err(RpcError::Cancelled);
            }
        };
        Ok(self.codec.decode_response(&frame)?)
    }
}
