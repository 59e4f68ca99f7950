//! Shared harness: a line-oriented client driving a server over an
//! in-memory duplex pipe, plus a few test handlers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use siteops_server::rpc::{ParamSchema, PropertySchema, ProtocolError, SchemaType};
use siteops_server::{
    CloseReason, Handler, HandlerResult, RequestContext, Server, ServerBuilder, ServerConfig,
    ServerResult,
};

// ─────────────────────── helpers ───────────────────────

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn build(config: ServerConfig, setup: impl FnOnce(ServerBuilder) -> ServerBuilder) -> Arc<Server> {
    Arc::new(setup(Server::builder(config)).build().unwrap())
}

pub fn default_server() -> Arc<Server> {
    build(ServerConfig::default(), |b| b)
}

pub fn request(id: impl Into<Value>, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id.into(), "method": method, "params": params })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

pub fn init_params() -> Value {
    json!({
        "clientInfo": { "name": "test-client", "version": "1.0" },
        "capabilities": {},
        "protocolVersion": "2024-06-01"
    })
}

/// A client connected to `server` over an in-memory pipe.
pub struct TestClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    pub task: JoinHandle<ServerResult<CloseReason>>,
}

impl TestClient {
    pub fn connect(server: &Arc<Server>) -> Self {
        let (client, server_side) = tokio::io::duplex(256 * 1024);
        let (server_reader, server_writer) = tokio::io::split(server_side);
        let server = Arc::clone(server);
        let task = tokio::spawn(async move {
            server
                .serve_connection(server_reader, server_writer, Some("test".to_string()))
                .await
        });
        let (reader, writer) = tokio::io::split(client);
        Self {
            reader: BufReader::new(reader),
            writer,
            task,
        }
    }

    /// Connect and complete the handshake.
    pub async fn connect_initialized(server: &Arc<Server>) -> Self {
        let mut client = Self::connect(server);
        let response = client.call(0, "initialize", init_params()).await;
        assert!(response.get("result").is_some(), "initialize failed: {response}");
        client
    }

    pub async fn send(&mut self, message: &Value) {
        let mut line = serde_json::to_vec(message).unwrap();
        line.push(b'\n');
        self.send_raw(&line).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line from the server, or `None` on EOF.
    pub async fn next(&mut self) -> Option<Value> {
        self.next_within(RECV_TIMEOUT)
            .await
            .expect("timed out waiting for the server")
    }

    /// `Err(())` if nothing arrived within `wait`.
    pub async fn next_within(&mut self, wait: Duration) -> Result<Option<Value>, ()> {
        let mut line = String::new();
        match tokio::time::timeout(wait, self.reader.read_line(&mut line)).await {
            Err(_) => Err(()),
            Ok(read) => {
                if read.unwrap() == 0 {
                    Ok(None)
                } else {
                    Ok(Some(serde_json::from_str(&line).unwrap()))
                }
            }
        }
    }

    pub async fn recv(&mut self) -> Value {
        self.next().await.expect("connection closed unexpectedly")
    }

    pub async fn call(&mut self, id: impl Into<Value>, method: &str, params: Value) -> Value {
        self.send(&request(id, method, params)).await;
        self.recv().await
    }

    pub async fn expect_eof(&mut self) {
        assert!(self.next().await.is_none(), "expected EOF");
    }

    /// Close our write side and wait for the server to finish.
    pub async fn finish(mut self) -> CloseReason {
        let _ = self.writer.shutdown().await;
        self.join().await
    }

    pub async fn join(self) -> CloseReason {
        tokio::time::timeout(RECV_TIMEOUT, self.task)
            .await
            .expect("server did not close the connection")
            .unwrap()
            .unwrap()
    }
}

pub fn error_code(response: &Value) -> i64 {
    response["error"]["code"].as_i64().expect("not an error response")
}

// ─────────────────────── handlers ───────────────────────

/// Counts invocations; requires `domain: string`.
pub struct CountingHandler {
    pub calls: Arc<AtomicUsize>,
    schema: ParamSchema,
}

impl CountingHandler {
    pub fn new(calls: Arc<AtomicUsize>) -> Self {
        Self {
            calls,
            schema: ParamSchema::new()
                .require("domain")
                .property("domain", PropertySchema::of(SchemaType::String))
                .property(
                    "plan",
                    PropertySchema::of(SchemaType::String).one_of(["basic", "pro"]),
                ),
        }
    }
}

#[async_trait]
impl Handler for CountingHandler {
    fn schema(&self) -> Option<&ParamSchema> {
        Some(&self.schema)
    }

    async fn handle(&self, params: Value, _ctx: &RequestContext) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "created": params["domain"] }))
    }
}

/// Fails in the way named by `params.mode`.
pub struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, params: Value, _ctx: &RequestContext) -> HandlerResult {
        match params["mode"].as_str().unwrap_or_default() {
            "provider" => Err(ProtocolError::Provider {
                provider: "stripe".to_string(),
                message: "card declined".to_string(),
            }
            .into()),
            "custom" => Err(ProtocolError::Custom {
                code: -32050,
                message: "quota exhausted".to_string(),
                data: Some(json!({ "limit": 5 })),
            }
            .into()),
            "io" => Err(std::io::Error::other("disk full").into()),
            "anyhow" => Err(anyhow::anyhow!("cache poisoned").into()),
            "panic" => panic!("handler blew up"),
            _ => Ok(json!("ok")),
        }
    }
}

/// Sleeps for `params.ms` milliseconds, then answers.
pub struct SlowHandler;

#[async_trait]
impl Handler for SlowHandler {
    async fn handle(&self, params: Value, _ctx: &RequestContext) -> HandlerResult {
        let ms = params["ms"].as_u64().unwrap_or(1000);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!({ "slept": ms }))
    }
}

/// Starts an async operation and returns its id right away.
pub struct BackupHandler;

#[async_trait]
impl Handler for BackupHandler {
    async fn handle(&self, params: Value, ctx: &RequestContext) -> HandlerResult {
        let operation_id = ctx.start_operation(params).await?;
        Ok(json!({ "operationId": operation_id }))
    }
}

/// Waits `params.ms` milliseconds before starting its operation.
pub struct LateBackupHandler;

#[async_trait]
impl Handler for LateBackupHandler {
    async fn handle(&self, params: Value, ctx: &RequestContext) -> HandlerResult {
        let ms = params["ms"].as_u64().unwrap_or(200);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        let operation_id = ctx.start_operation(params).await?;
        Ok(json!({ "operationId": operation_id }))
    }
}
