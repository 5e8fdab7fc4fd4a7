//! Courier RPC: a message-queue style remote-procedure-call framework.
//!
//! A caller invokes a method on a hand-written service stub; the stub
//! builds a request envelope and sends it over a framed socket to a
//! server whose run loop fans requests out to per-request workers. Each
//! worker resolves the target service inside a request scope, invokes the
//! registered method, and queues the reply back through the single
//! socket-owning loop.
//!
//! Module map:
//! - [`transport`]: ROUTER/DEALER-style framed socket primitives
//! - [`client`]: per-call connections with correlated replies
//! - [`stub`]: client-side call interception and return-shape dispatch
//! - [`server`]: socket-owning run loop and worker fan-out
//! - [`dispatch`]: method resolution, coercion, and error mapping
//! - [`registry`]: the (service, method) dispatch table
//! - [`scope`]: per-request service lifetimes

pub mod client;
pub mod config;
pub mod dispatch;
pub mod registry;
pub mod scope;
pub mod server;
pub mod stub;
pub mod transport;

pub use client::RpcClient;
pub use config::{ClientConfig, Endpoint, EndpointParseError, ServerConfig};
pub use dispatch::Dispatcher;
pub use registry::{Method, MethodTable};
pub use scope::{
    DefaultScopeProvider, ScopeError, ScopeProvider, ServiceInstance, ServiceScope,
};
pub use server::{RpcServer, ServerState, TaskPerRequest, WorkerSpawner};
pub use stub::MethodDescriptor;
