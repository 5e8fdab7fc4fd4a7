//! End-to-end demo: a server hosting two services and a client driving
//! them through typed stubs, including a blocking call from a plain
//! thread and a small concurrent burst.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rmpv::Value;
use serde::{Deserialize, Serialize};
use tracing::info;

use courier_core::codec::MsgPackCodec;
use courier_core::params::{ParamSpec, ValueKind};
use courier_rpc::{
    ClientConfig, DefaultScopeProvider, Dispatcher, Endpoint, Method, MethodDescriptor,
    MethodTable, RpcClient, RpcServer, ServerConfig,
};

#[derive(Debug, Parser)]
#[command(name = "courier-demo", about = "Run a demo RPC server and exercise it")]
struct Args {
    /// Connection string the server binds and the client dials.
    #[arg(long, default_value = "tcp://127.0.0.1:7741")]
    connect: String,
    /// Number of concurrent calls in the burst phase.
    #[arg(long, default_value_t = 16)]
    burst: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ExampleDto {
    int_value: i32,
    long_value: i64,
    text: String,
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

struct CustomService;

impl CustomService {
    fn get_string(&self, n: i64) -> String {
        format!("no. {n}")
    }

    fn get_dto(&self, n: i32, text: String) -> ExampleDto {
        ExampleDto {
            int_value: n,
            long_value: i64::from(n) * 1000,
            text,
        }
    }

    fn get_int(&self, n: i64) -> i64 {
        n * 8 + 2
    }
}

struct BinaryService;

impl BinaryService {
    fn print_utf8(&self, payload: &[u8]) -> anyhow::Result<()> {
        let text = std::str::from_utf8(payload).context("payload is not UTF-8")?;
        info!("binary payload says: {text}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stub
// ---------------------------------------------------------------------------

struct CustomServiceStub {
    client: RpcClient,
}

impl CustomServiceStub {
    const GET_STRING: MethodDescriptor = MethodDescriptor::new(
        "demo.custom",
        "get_string",
        &[ParamSpec::new("n", ValueKind::Integer)],
    );
    const GET_DTO: MethodDescriptor = MethodDescriptor::new(
        "demo.custom",
        "get_dto",
        &[
            ParamSpec::new("n", ValueKind::Integer),
            ParamSpec::new("text", ValueKind::Str),
        ],
    );
    const GET_INT: MethodDescriptor = MethodDescriptor::new(
        "demo.custom",
        "get_int",
        &[ParamSpec::new("n", ValueKind::Integer)],
    );
    const GET_INT_ASYNC: MethodDescriptor = MethodDescriptor::wrapping(
        "demo.custom",
        "get_int_async",
        "get_int_slow",
        &[ParamSpec::new("n", ValueKind::Integer)],
    );

    async fn get_string(&self, n: i64) -> Result<String, courier_core::error::RpcError> {
        self.client
            .invoke(&Self::GET_STRING, vec![Value::from(n)])
            .await
    }

    async fn get_dto(
        &self,
        n: i32,
        text: &str,
    ) -> Result<ExampleDto, courier_core::error::RpcError> {
        self.client
            .invoke(&Self::GET_DTO, vec![Value::from(n), Value::from(text)])
            .await
    }

    async fn get_int(&self, n: i64) -> Result<i64, courier_core::error::RpcError> {
        self.client
            .invoke(&Self::GET_INT, vec![Value::from(n)])
            .await
    }

    async fn get_int_async(&self, n: i64) -> Result<i64, courier_core::error::RpcError> {
        self.client
            .invoke(&Self::GET_INT_ASYNC, vec![Value::from(n)])
            .await
    }

    fn get_int_blocking(&self, n: i64) -> Result<i64, courier_core::error::RpcError> {
        self.client
            .invoke_blocking(&Self::GET_INT, vec![Value::from(n)])
    }
}

fn build_dispatcher() -> Dispatcher {
    let provider = DefaultScopeProvider::new();
    provider.register_scoped("demo.custom", || CustomService);
    provider.register_singleton("demo.binary", BinaryService);

    let mut table = MethodTable::new();
    table.insert(
        "demo.custom",
        Method::sync1::<CustomService, i64, String, _>(
            "get_string",
            ParamSpec::new("n", ValueKind::Integer),
            |svc, n| Ok(svc.get_string(n)),
        ),
    );
    table.insert(
        "demo.custom",
        Method::sync2::<CustomService, i32, String, ExampleDto, _>(
            "get_dto",
            ParamSpec::new("n", ValueKind::Integer),
            ParamSpec::new("text", ValueKind::Str),
            |svc, n, text| Ok(svc.get_dto(n, text)),
        ),
    );
    table.insert(
        "demo.custom",
        Method::sync1::<CustomService, i64, i64, _>(
            "get_int",
            ParamSpec::new("n", ValueKind::Integer),
            |svc, n| Ok(svc.get_int(n)),
        ),
    );
    table.insert(
        "demo.custom",
        Method::async1::<CustomService, i64, i64, _, _>(
            "get_int_slow",
            ParamSpec::new("n", ValueKind::Integer),
            |_, _n: i64| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(1200)
            },
        ),
    );
    table.insert(
        "demo.binary",
        // The payload stays an opaque value so the raw bytes survive
        // without a serde detour through an integer sequence.
        Method::sync1::<BinaryService, Value, (), _>(
            "print_utf8",
            ParamSpec::new("payload", ValueKind::Binary),
            |svc, payload: Value| {
                let bytes = payload
                    .as_slice()
                    .context("payload is not a binary value")?;
                svc.print_utf8(bytes)
            },
        ),
    );
    Dispatcher::new(table, Arc::new(provider))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let endpoint = Endpoint::parse(&args.connect).context("parsing --connect")?;

    let mut server = RpcServer::new(
        endpoint.clone(),
        ServerConfig::default(),
        Arc::new(MsgPackCodec),
        build_dispatcher(),
    );
    server.start().await?;

    let client = RpcClient::new(endpoint, ClientConfig::default(), Arc::new(MsgPackCodec));
    let stub = CustomServiceStub {
        client: client.clone(),
    };

    info!("get_string(5) = {:?}", stub.get_string(5).await?);
    info!("get_int(5)    = {}", stub.get_int(5).await?);
    info!("get_dto       = {:?}", stub.get_dto(7, "seven").await?);
    info!("get_int_async = {}", stub.get_int_async(0).await?);

    const PRINT_UTF8: MethodDescriptor = MethodDescriptor::new(
        "demo.binary",
        "print_utf8",
        &[ParamSpec::new("payload", ValueKind::Binary)],
    );
    client
        .invoke_unit(
            &PRINT_UTF8,
            vec![Value::from(b"hello from the wire".to_vec())],
        )
        .await?;

    // Concurrent burst: every call carries its own correlation id.
    let mut calls = Vec::with_capacity(args.burst);
    for n in 0..args.burst as i64 {
        let stub_client = client.clone();
        calls.push(tokio::spawn(async move {
            let stub = CustomServiceStub {
                client: stub_client,
            };
            stub.get_int(n).await
        }));
    }
    for (n, call) in calls.into_iter().enumerate() {
        let got = call.await??;
        anyhow::ensure!(got == n as i64 * 8 + 2, "burst call {n} returned {got}");
    }
    info!("burst of {} calls completed", args.burst);

    // Blocking call from a plain thread, the synchronous caller path.
    let blocking_stub = CustomServiceStub {
        client: client.clone(),
    };
    let blocking = std::thread::spawn(move || blocking_stub.get_int_blocking(5));
    let got = blocking.join().expect("blocking thread panicked")?;
    info!("blocking get_int(5) = {got}");

    server.stop().await;
    Ok(())
}
