//! RPC server: socket ownership, run loop, and worker fan-out.
//!
//! One task owns the router socket for the server's whole lifetime. It
//! alternates between draining the outbound reply queue and waiting one
//! bounded tick for an inbound frame, so shutdown is observed within a
//! tick even on an idle socket. Decoded requests are handed to workers;
//! workers push replies back through the queue instead of ever touching
//! the socket.

use std::sync::Arc;

use anyhow::{bail, Context};
use arc_swap::ArcSwap;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use courier_core::codec::Codec;
use courier_core::envelope::ResponseEnvelope;
use courier_core::error::{ErrorKind, ErrorPayload};

use crate::config::{Endpoint, ServerConfig};
use crate::dispatch::Dispatcher;
use crate::transport::{Identity, RouterSocket};

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
    Stopping,
}

/// Decides where request workers run.
///
/// The run loop hands each decoded request to the spawner and moves on;
/// a slow handler therefore never delays the socket.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, work: BoxFuture<'static, ()>);
}

/// Default spawner: one tokio task per request.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskPerRequest;

impl WorkerSpawner for TaskPerRequest {
    fn spawn(&self, work: BoxFuture<'static, ()>) {
        tokio::spawn(work);
    }
}

/// Listens on one endpoint and serves requests through a [`Dispatcher`].
pub struct RpcServer {
    endpoint: Endpoint,
    config: ServerConfig,
    codec: Arc<dyn Codec>,
    dispatcher: Arc<Dispatcher>,
    spawner: Arc<dyn WorkerSpawner>,
    state: Arc<ArcSwap<ServerState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    run_task: Option<JoinHandle<()>>,
    local_addr: Option<std::net::SocketAddr>,
}

impl RpcServer {
    #[must_use]
    pub fn new(
        endpoint: Endpoint,
        config: ServerConfig,
        codec: Arc<dyn Codec>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            endpoint,
            config,
            codec,
            dispatcher: Arc::new(dispatcher),
            spawner: Arc::new(TaskPerRequest),
            state: Arc::new(ArcSwap::from_pointee(ServerState::Stopped)),
            shutdown_tx: None,
            run_task: None,
            local_addr: None,
        }
    }

    /// Replaces the default task-per-request worker spawner.
    #[must_use]
    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        **self.state.load()
    }

    /// The bound address once started. Carries the actual port when the
    /// endpoint asked for port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.local_addr
    }

    /// Binds the endpoint and starts the run loop.
    ///
    /// # Errors
    ///
    /// Fails when the server is not stopped or the address cannot be
    /// bound.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        if self.state() != ServerState::Stopped {
            bail!("server is already started");
        }
        let socket = RouterSocket::bind(
            &self.endpoint,
            self.config.max_frame_bytes,
            self.config.peer_channel_capacity,
        )
        .await
        .with_context(|| format!("binding {}", self.endpoint))?;
        self.local_addr = Some(socket.local_addr());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);
        self.state.store(Arc::new(ServerState::Running));
        info!(addr = %socket.local_addr(), "server listening");

        self.run_task = Some(tokio::spawn(run_loop(
            socket,
            self.config.clone(),
            Arc::clone(&self.codec),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.spawner),
            shutdown_rx,
        )));
        Ok(())
    }

    /// Signals shutdown and waits for the run loop to exit. A no-op when
    /// the server is not running.
    pub async fn stop(&mut self) {
        if self.state() != ServerState::Running {
            return;
        }
        self.state.store(Arc::new(ServerState::Stopping));
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(run_task) = self.run_task.take() {
            if let Err(e) = run_task.await {
                warn!("run loop task failed: {e}");
            }
        }
        self.local_addr = None;
        self.state.store(Arc::new(ServerState::Stopped));
        info!("server stopped");
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

/// The single socket owner. Replies drained here are the only writes the
/// socket ever sees; `biased` keeps shutdown and queued replies ahead of
/// new inbound work.
async fn run_loop(
    mut socket: RouterSocket,
    config: ServerConfig,
    codec: Arc<dyn Codec>,
    dispatcher: Arc<Dispatcher>,
    spawner: Arc<dyn WorkerSpawner>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (reply_tx, mut reply_rx) = mpsc::channel::<(Identity, Bytes)>(config.outbound_capacity);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                debug!("run loop observed shutdown");
                break;
            }
            reply = reply_rx.recv() => {
                // Senders are never all dropped while the loop holds reply_tx.
                if let Some((identity, frame)) = reply {
                    // Delivery must not await: a stalled peer would hold
                    // up replies to every other peer. An undeliverable
                    // frame is dropped.
                    if let Err(e) = socket.try_send(identity, frame) {
                        debug!(identity = identity.0, "reply dropped: {e}");
                    }
                }
            }
            inbound = socket.recv_timeout(config.receive_tick) => match inbound {
                Ok(Some((identity, frame))) => {
                    let codec = Arc::clone(&codec);
                    let dispatcher = Arc::clone(&dispatcher);
                    let reply_tx = reply_tx.clone();
                    spawner.spawn(Box::pin(async move {
                        handle_frame(identity, frame, &*codec, &dispatcher, &reply_tx).await;
                    }));
                }
                Ok(None) => {} // idle tick, loop back to re-check shutdown
                Err(e) => {
                    warn!("socket receive failed, run loop exiting: {e}");
                    break;
                }
            },
        }
    }
}

/// Worker body: decode, dispatch, encode, queue the reply.
async fn handle_frame(
    identity: Identity,
    frame: Bytes,
    codec: &dyn Codec,
    dispatcher: &Dispatcher,
    reply_tx: &mpsc::Sender<(Identity, Bytes)>,
) {
    let request = match codec.decode_request(&frame) {
        Ok(request) => request,
        Err(e) => {
            // No envelope means no correlation id to reply with.
            warn!(identity = identity.0, "undecodable request dropped: {e}");
            return;
        }
    };
    let response = dispatcher.handle(request).await;
    let encoded = match codec.encode_response(&response) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(id = %response.id, "response encode failed: {e}");
            let fallback = ResponseEnvelope::error(
                response.id,
                ErrorPayload::new(ErrorKind::Codec, format!("response encode failed: {e}")),
            );
            match codec.encode_response(&fallback) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(id = %response.id, "fallback encode failed, dropping reply: {e}");
                    return;
                }
            }
        }
    };
    if reply_tx.send((identity, Bytes::from(encoded))).await.is_err() {
        debug!(identity = identity.0, "run loop gone, reply dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rmpv::Value;

    use courier_core::codec::MsgPackCodec;
    use courier_core::envelope::RequestEnvelope;
    use courier_core::params::{ParamSpec, ValueKind};

    use crate::registry::{Method, MethodTable};
    use crate::scope::DefaultScopeProvider;
    use crate::transport::DealerSocket;

    use super::*;

    struct Math;

    fn test_server() -> RpcServer {
        let provider = DefaultScopeProvider::new();
        provider.register_singleton("math", Math);
        let mut table = MethodTable::new();
        table.insert(
            "math",
            Method::sync1::<Math, i64, i64, _>(
                "double",
                ParamSpec::new("x", ValueKind::Integer),
                |_, x| Ok(x * 2),
            ),
        );
        table.insert(
            "math",
            Method::async1::<Math, u64, &'static str, _, _>(
                "nap",
                ParamSpec::new("millis", ValueKind::Integer),
                |_, millis: u64| async move {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    Ok("rested")
                },
            ),
        );
        let dispatcher = Dispatcher::new(table, Arc::new(provider));
        RpcServer::new(
            Endpoint {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            ServerConfig {
                receive_tick: Duration::from_millis(50),
                ..ServerConfig::default()
            },
            Arc::new(MsgPackCodec),
            dispatcher,
        )
    }

    async fn call_raw(addr: std::net::SocketAddr, request: &RequestEnvelope) -> ResponseEnvelope {
        let codec = MsgPackCodec;
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        };
        let mut dealer = DealerSocket::connect(&endpoint, 1024 * 1024).await.unwrap();
        let bytes = codec.encode_request(request).unwrap();
        dealer.send(Bytes::from(bytes)).await.unwrap();
        let reply = dealer.recv().await.unwrap();
        codec.decode_response(&reply).unwrap()
    }

    #[tokio::test]
    async fn lifecycle_stopped_running_stopped() {
        let mut server = test_server();
        assert_eq!(server.state(), ServerState::Stopped);
        server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert!(server.local_addr().is_some());
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.local_addr().is_none());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut server = test_server();
        server.start().await.unwrap();
        assert!(server.start().await.is_err());
        server.stop().await;
    }

    #[tokio::test]
    async fn stop_when_stopped_is_a_noop() {
        let mut server = test_server();
        server.stop().await;
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[tokio::test]
    async fn serves_a_raw_request() {
        let mut server = test_server();
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let request = RequestEnvelope::new("math", "double", vec![Value::from(21)]);
        let response = call_raw(addr, &request).await;
        assert_eq!(response.id, request.id);
        assert_eq!(response.return_value, Some(Value::from(42)));

        server.stop().await;
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_a_fast_one() {
        let mut server = test_server();
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        let slow = tokio::spawn(async move {
            call_raw(addr, &RequestEnvelope::new("math", "nap", vec![Value::from(300)])).await
        });
        // Give the slow request a head start, then race it with a fast one.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        let fast = call_raw(addr, &RequestEnvelope::new("math", "double", vec![Value::from(1)])).await;
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(fast.return_value, Some(Value::from(2)));
        assert_eq!(
            slow.await.unwrap().return_value,
            Some(Value::from("rested"))
        );

        server.stop().await;
    }

    #[tokio::test]
    async fn undecodable_frame_is_dropped_and_service_continues() {
        let mut server = test_server();
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: addr.port(),
        };

        let mut dealer = DealerSocket::connect(&endpoint, 1024 * 1024).await.unwrap();
        dealer
            .send(Bytes::from_static(&[0xc1, 0x00, 0xff]))
            .await
            .unwrap();

        // The garbage gets no reply; a well-formed call still succeeds.
        let response = call_raw(addr, &RequestEnvelope::new("math", "double", vec![Value::from(3)])).await;
        assert_eq!(response.return_value, Some(Value::from(6)));

        server.stop().await;
    }

    #[tokio::test]
    async fn custom_spawner_receives_the_work() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingSpawner {
            spawned: AtomicU32,
        }
        impl WorkerSpawner for CountingSpawner {
            fn spawn(&self, work: BoxFuture<'static, ()>) {
                self.spawned.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(work);
            }
        }

        let spawner = Arc::new(CountingSpawner {
            spawned: AtomicU32::new(0),
        });
        let mut server = test_server().with_spawner(Arc::clone(&spawner) as Arc<dyn WorkerSpawner>);
        server.start().await.unwrap();
        let addr = server.local_addr().unwrap();

        call_raw(addr, &RequestEnvelope::new("math", "double", vec![Value::from(2)])).await;
        assert_eq!(spawner.spawned.load(Ordering::SeqCst), 1);

        server.stop().await;
    }
}
