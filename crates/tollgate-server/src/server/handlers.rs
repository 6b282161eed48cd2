//! Request routing and method handlers

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::app::App;
use crate::protocol::{
    CANCELLED, CIRCUIT_OPEN, JSONRPC_VERSION, PROTOCOL_VERSION, RATE_LIMITED, Request, RequestId,
    Response, RpcError, TIMEOUT,
};
use tollgate_core::{PipelineError, ToolError, ToolOutput};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
    #[serde(default)]
    client_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatsParams {
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    client_id: Option<String>,
}

/// Handle one input line; notifications produce no response
pub async fn handle_line(app: &App, line: &str, cancel: &CancellationToken) -> Option<Response> {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "unparseable request");
            return Some(Response::error(None, RpcError::parse_error(e.to_string())));
        }
    };

    let id = value
        .get("id")
        .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
    let request: Request = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(e) => return Some(Response::error(id, RpcError::invalid_request(e.to_string()))),
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Some(Response::error(
            request.id,
            RpcError::invalid_request(format!("unsupported jsonrpc version '{}'", request.jsonrpc)),
        ));
    }

    let Some(id) = request.id else {
        tracing::debug!(method = %request.method, "notification ignored");
        return None;
    };

    tracing::debug!(id = %id, method = %request.method, "handling request");
    let response = match handle_request(app, &request.method, request.params, cancel).await {
        Ok(result) => Response::success(id, result),
        Err(error) => Response::error(Some(id), error),
    };
    Some(response)
}

async fn handle_request(
    app: &App,
    method: &str,
    params: Option<Value>,
    cancel: &CancellationToken,
) -> Result<Value, RpcError> {
    match method {
        "initialize" => Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": app.config().server.name,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": {} }
        })),
        "ping" => Ok(json!({})),
        "tools/list" => {
            let tools = to_value(app.dispatcher().registry().list())?;
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => call_tool(app, parse_params(params)?, cancel).await,
        "tollgate/stats" => {
            let params = match params {
                Some(_) => parse_params(params)?,
                None => StatsParams::default(),
            };
            stats(app, params).await
        }
        other => Err(RpcError::method_not_found(other)),
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    let params = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal_error(e.to_string()))
}

async fn call_tool(
    app: &App,
    params: CallToolParams,
    cancel: &CancellationToken,
) -> Result<Value, RpcError> {
    let arguments = params
        .arguments
        .unwrap_or_else(|| Value::Object(Map::new()));
    let client_id = params
        .client_id
        .as_deref()
        .unwrap_or(&app.config().server.client_id);

    match app
        .dispatcher()
        .dispatch(&params.name, arguments, client_id, cancel)
        .await
    {
        Ok(output) => Ok(tool_result(&output)),
        Err(error) => pipeline_error(error),
    }
}

fn tool_result(output: &ToolOutput) -> Value {
    let mut result = json!({
        "content": [{ "type": "text", "text": output.text }],
        "isError": false,
    });
    if output.truncated {
        result["truncated"] = Value::Bool(true);
    }
    result
}

fn tool_failure(message: String) -> Value {
    json!({
        "content": [{ "type": "text", "text": message }],
        "isError": true,
    })
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

/// Map a failed invocation to either an RPC error or an `isError` result
fn pipeline_error(error: PipelineError<ToolError>) -> Result<Value, RpcError> {
    let message = error.to_string();
    match error {
        PipelineError::RateLimited(e) => Err(RpcError::new(RATE_LIMITED, message).with_data(json!({
            "retryAfterMs": millis(e.retry_after),
            "limit": e.limit,
        }))),
        PipelineError::CircuitOpen {
            state, retry_after, ..
        } => Err(RpcError::new(CIRCUIT_OPEN, message).with_data(json!({
            "state": state,
            "retryAfterMs": retry_after.map(millis),
        }))),
        PipelineError::Timeout { timeout, .. } => Err(
            RpcError::new(TIMEOUT, message).with_data(json!({ "timeoutMs": millis(timeout) })),
        ),
        PipelineError::Cancelled(_) => Err(RpcError::new(CANCELLED, message)),
        PipelineError::Operation(ToolError::InvalidArguments(reason)) => {
            Err(RpcError::invalid_params(reason))
        }
        PipelineError::Operation(_) | PipelineError::RetryExhausted(_) => Ok(tool_failure(message)),
        PipelineError::Config(e) => Err(RpcError::internal_error(e.to_string())),
    }
}

async fn stats(app: &App, params: StatsParams) -> Result<Value, RpcError> {
    let pipeline = app.dispatcher().pipeline();
    let mut result = json!({
        "breakers": to_value(pipeline.breaker_stats())?,
        "metrics": to_value(app.metrics().snapshot())?,
    });

    if let Some(tool) = params.tool {
        let client_id = params
            .client_id
            .as_deref()
            .unwrap_or(&app.config().server.client_id);
        let usage = pipeline
            .rate_limit_stats(&tool, client_id)
            .await
            .map_err(|e| RpcError::internal_error(e.to_string()))?;
        result["rateLimit"] = to_value(usage)?;
    }
    Ok(result)
}
