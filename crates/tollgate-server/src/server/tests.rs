//! Server tests over an in-memory duplex pipe

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::protocol::{
    CANCELLED, CIRCUIT_OPEN, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    RATE_LIMITED, TIMEOUT,
};
use tollgate_core::config::TollgateConfig;
use tollgate_core::recovery::{BackoffKind, CircuitBreakerConfig, RetryConfig};
use tollgate_core::{OperationPolicy, ToolError, ToolHandler, ToolOutput, ToolRegistry};

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "returns its text argument"
    }

    async fn call(
        &self,
        arguments: Value,
        _attempt: u32,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(tollgate_core::tools::require_str(&arguments, "text")?))
    }
}

struct BrokenTool;

#[async_trait]
impl ToolHandler for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }

    fn description(&self) -> &str {
        "always unavailable"
    }

    async fn call(
        &self,
        _arguments: Value,
        _attempt: u32,
        _cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        Err(ToolError::unavailable("backend down"))
    }
}

/// Waits until cancelled, then reports a retryable failure
struct SlowTool {
    started: Arc<Notify>,
}

#[async_trait]
impl ToolHandler for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "takes a long time"
    }

    async fn call(
        &self,
        _arguments: Value,
        _attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        self.started.notify_one();
        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Timeout),
            _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(ToolOutput::text("done")),
        }
    }
}

fn config() -> TollgateConfig {
    let mut config = TollgateConfig::default();
    config.rate_limit.limit = 2;
    config.server.shutdown_timeout = Duration::from_secs(2);
    config.defaults = OperationPolicy::default().with_retry(Some(
        RetryConfig::limited(2)
            .with_strategy(BackoffKind::Constant)
            .with_initial_delay(Duration::from_millis(5)),
    ));
    config.operations = HashMap::from([
        (
            "broken".to_string(),
            config
                .defaults
                .clone()
                .with_circuit_breaker(CircuitBreakerConfig::new(1, Duration::from_secs(60), 1)),
        ),
        (
            "slow".to_string(),
            config.defaults.clone().with_timeout(Some(Duration::from_millis(50))),
        ),
    ]);
    config
}

fn app(started: Arc<Notify>) -> Arc<App> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool)).unwrap();
    registry.register(Arc::new(BrokenTool)).unwrap();
    registry.register(Arc::new(SlowTool { started })).unwrap();
    Arc::new(App::new(config(), registry).unwrap())
}

struct Session {
    input: tokio::io::WriteHalf<DuplexStream>,
    output: tokio::io::Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<TollgateResult<()>>,
}

impl Session {
    fn start(app: Arc<App>) -> Self {
        let (client, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (client_read, client_write) = tokio::io::split(client);
        let shutdown = CancellationToken::new();

        let server = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                Server::new(app)
                    .run(server_read, server_write, shutdown)
                    .await
            })
        };

        Self {
            input: client_write,
            output: BufReader::new(client_read).lines(),
            shutdown,
            server,
        }
    }

    async fn send(&mut self, message: impl std::fmt::Display) {
        self.input
            .write_all(format!("{}\n", message).as_bytes())
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Value {
        let line = self.output.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Close input and collect every remaining response, keyed by id
    async fn finish(mut self) -> HashMap<String, Value> {
        self.input.shutdown().await.unwrap();
        let mut responses = HashMap::new();
        while let Some(line) = self.output.next_line().await.unwrap() {
            let response: Value = serde_json::from_str(&line).unwrap();
            responses.insert(response["id"].to_string(), response);
        }
        self.server.await.unwrap().unwrap();
        responses
    }
}

fn request(id: i64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params})
}

fn call(id: i64, tool: &str, arguments: Value) -> Value {
    request(id, "tools/call", json!({"name": tool, "arguments": arguments}))
}

#[tokio::test]
async fn test_handshake_and_listing() {
    let mut session = Session::start(app(Arc::new(Notify::new())));
    session.send(request(1, "initialize", json!({}))).await;
    session.send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
    session.send(request(2, "ping", Value::Null)).await;
    session.send(request(3, "tools/list", Value::Null)).await;

    let responses = session.finish().await;
    assert_eq!(responses.len(), 3);
    assert_eq!(responses["1"]["result"]["serverInfo"]["name"], "tollgate");
    assert_eq!(responses["1"]["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(responses["2"]["result"], json!({}));

    let names: Vec<_> = responses["3"]["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["broken", "echo", "slow"]);
}

#[tokio::test]
async fn test_tool_call_and_rate_limit() {
    let mut session = Session::start(app(Arc::new(Notify::new())));
    for id in 1..=3 {
        session.send(call(id, "echo", json!({"text": "hi"}))).await;
    }
    let responses = session.finish().await;

    let (ok, limited): (Vec<_>, Vec<_>) = responses.values().partition(|r| r.get("result").is_some());
    assert_eq!(ok.len(), 2);
    assert_eq!(limited.len(), 1);
    for response in ok {
        assert_eq!(response["result"]["isError"], false);
        assert_eq!(response["result"]["content"][0]["text"], "hi");
    }
    assert_eq!(limited[0]["error"]["code"], RATE_LIMITED);
    assert_eq!(limited[0]["error"]["data"]["retryAfterMs"], 60_000);
}

#[tokio::test]
async fn test_client_id_param_selects_budget() {
    let mut session = Session::start(app(Arc::new(Notify::new())));
    for (id, client) in [(1, "a"), (2, "a"), (3, "b")] {
        session
            .send(request(
                id,
                "tools/call",
                json!({"name": "echo", "arguments": {"text": "x"}, "clientId": client}),
            ))
            .await;
    }
    let responses = session.finish().await;
    assert!(responses.values().all(|r| r.get("result").is_some()));
}

#[tokio::test]
async fn test_exhausted_then_circuit_open() {
    let app = app(Arc::new(Notify::new()));

    let mut session = Session::start(app.clone());
    session.send(call(1, "broken", json!({}))).await;
    let first = session.recv().await;
    assert_eq!(first["result"]["isError"], true);
    assert!(
        first["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("after 2 attempts")
    );

    session.send(call(2, "broken", json!({}))).await;
    let second = session.recv().await;
    assert_eq!(second["error"]["code"], CIRCUIT_OPEN);
    assert_eq!(second["error"]["data"]["state"], "open");
    assert!(second["error"]["data"]["retryAfterMs"].as_u64().unwrap() <= 60_000);

    session.send(request(3, "tollgate/stats", json!({"tool": "broken"}))).await;
    let stats = session.recv().await;
    let breakers = stats["result"]["breakers"].as_array().unwrap();
    assert_eq!(breakers.len(), 1);
    assert_eq!(breakers[0]["name"], "broken");
    assert_eq!(breakers[0]["state"], "open");
    assert_eq!(stats["result"]["rateLimit"]["current"], 2);
    assert_eq!(
        stats["result"]["metrics"]["series"]["retry_exhaustions_total{operation=\"broken\"}"],
        1
    );

    session.finish().await;
}

#[tokio::test]
async fn test_timeout_maps_to_error_code() {
    let mut session = Session::start(app(Arc::new(Notify::new())));
    session.send(call(1, "slow", json!({}))).await;
    let response = session.recv().await;
    assert_eq!(response["error"]["code"], TIMEOUT);
    assert_eq!(response["error"]["data"]["timeoutMs"], 50);
    session.finish().await;
}

#[tokio::test]
async fn test_protocol_errors() {
    let mut session = Session::start(app(Arc::new(Notify::new())));
    session.send("{ not json").await;
    session.send(json!({"jsonrpc": "2.0", "id": 2})).await;
    session.send(request(3, "tools/explode", json!({}))).await;
    session.send(request(4, "tools/call", json!({"arguments": {}}))).await;
    session.send(call(5, "missing", json!({}))).await;
    session.send(call(6, "echo", json!({"text": 3}))).await;
    session.send(request(7, "tools/call", Value::Null)).await;
    let responses = session.finish().await;

    assert_eq!(responses["null"]["error"]["code"], PARSE_ERROR);
    assert_eq!(responses["2"]["error"]["code"], INVALID_REQUEST);
    assert_eq!(responses["3"]["error"]["code"], METHOD_NOT_FOUND);
    assert_eq!(responses["4"]["error"]["code"], INVALID_PARAMS);
    assert_eq!(responses["5"]["error"]["code"], INVALID_PARAMS);
    assert!(
        responses["5"]["error"]["message"]
            .as_str()
            .unwrap()
            .contains("unknown tool")
    );
    assert_eq!(responses["6"]["error"]["code"], INVALID_PARAMS);
    assert_eq!(responses["7"]["error"]["code"], INVALID_PARAMS);
}

#[tokio::test]
async fn test_interrupt_cancels_in_flight_requests() {
    let started = Arc::new(Notify::new());
    let mut config = config();
    config.operations.remove("slow");
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(SlowTool {
            started: started.clone(),
        }))
        .unwrap();
    let app = Arc::new(App::new(config, registry).unwrap());

    let mut session = Session::start(app.clone());
    session.send(call(1, "slow", json!({}))).await;
    started.notified().await;
    session.shutdown.cancel();

    let response = session.recv().await;
    assert_eq!(response["error"]["code"], CANCELLED);
    session.server.await.unwrap().unwrap();
    assert!(app.store().unwrap().is_shut_down());
}

#[tokio::test]
async fn test_eof_lets_in_flight_requests_finish() {
    let mut session = Session::start(app(Arc::new(Notify::new())));
    session.send(call(1, "echo", json!({"text": "last"}))).await;
    let responses = session.finish().await;
    assert_eq!(responses["1"]["result"]["content"][0]["text"], "last");
}

#[test]
fn test_deliver_reports_stopped_writer() {
    let (tx, rx) = mpsc::unbounded_channel();
    assert!(deliver(&tx, Response::success(1.into(), json!({}))));

    drop(rx);
    assert!(!deliver(&tx, Response::success(2.into(), json!({}))));
}
