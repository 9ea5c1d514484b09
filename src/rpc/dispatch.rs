use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::crawler::registration::UNKNOWN_NICKNAME;
use crate::crawler::CrawlerController;
use crate::tasks::{TaskError, TaskId};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC failures, each mapped to its error code
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),
}

impl RpcError {
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
            Self::TaskNotFound(_) => -32004,
        }
    }
}

impl From<TaskError> for RpcError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::NotFound(id) => Self::TaskNotFound(id.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Error member of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl From<&RpcError> for ErrorObject {
    fn from(e: &RpcError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
        }
    }
}

/// A method call, as read from the wire
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
}

/// A method response; exactly one of `result` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
    pub id: Value,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: &RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error.into()),
            id,
        }
    }
}

/// Named arguments of a call; positional params are matched to names in order
struct Args {
    method: &'static str,
    values: Map<String, Value>,
}

impl Args {
    fn bind(method: &'static str, params: Option<Value>, names: &[&str]) -> Result<Self, RpcError> {
        let values = match params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(Value::Array(items)) => {
                if items.len() > names.len() {
                    return Err(RpcError::InvalidParams(format!(
                        "{} takes at most {} arguments, got {}",
                        method,
                        names.len(),
                        items.len()
                    )));
                }
                names.iter().map(|name| name.to_string()).zip(items).collect()
            }
            Some(other) => {
                return Err(RpcError::InvalidParams(format!(
                    "params must be an array or an object, got {}",
                    other
                )))
            }
        };

        Ok(Self { method, values })
    }

    fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, RpcError> {
        match self.values.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| RpcError::InvalidParams(format!("{}: bad '{}': {}", self.method, name, e))),
        }
    }

    fn required<T: DeserializeOwned>(&self, name: &str) -> Result<T, RpcError> {
        self.optional(name)?
            .ok_or_else(|| RpcError::InvalidParams(format!("{}: missing '{}'", self.method, name)))
    }
}

/// Task ids are strings, but callers sometimes send them as numbers
fn task_id_arg(args: &Args) -> Result<TaskId, RpcError> {
    match args.required::<Value>("task_id")? {
        Value::String(id) => Ok(TaskId::from(id.as_str())),
        Value::Number(id) => Ok(TaskId::from(id.to_string().as_str())),
        other => Err(RpcError::InvalidParams(format!("task_id must be a string, got {}", other))),
    }
}

fn app_ids_arg(args: &Args) -> Result<Vec<i64>, RpcError> {
    let app_ids: Vec<i64> = args.required("app_ids")?;
    if app_ids.is_empty() {
        return Err(RpcError::InvalidParams(format!("{}: app_ids must not be empty", args.method)));
    }
    Ok(app_ids)
}

/// Routes decoded calls to the crawler controller
pub struct RpcDispatcher {
    controller: Arc<CrawlerController>,
}

impl RpcDispatcher {
    pub fn new(controller: Arc<CrawlerController>) -> Self {
        Self { controller }
    }

    /// Handle a raw request body.
    ///
    /// Always produces a JSON document: a response object, or an array of them
    /// for batch requests. Protocol failures are reported inside the payload.
    pub async fn handle_body(&self, body: &[u8]) -> Value {
        let document: Value = match serde_json::from_slice(body) {
            Ok(document) => document,
            Err(e) => {
                warn!("Unparseable RPC body: {}", e);
                return to_value(RpcResponse::failure(Value::Null, &RpcError::Parse(e.to_string())));
            }
        };

        match document {
            Value::Array(calls) if calls.is_empty() => to_value(RpcResponse::failure(
                Value::Null,
                &RpcError::InvalidRequest("empty batch".to_string()),
            )),
            Value::Array(calls) => {
                let mut responses = Vec::with_capacity(calls.len());
                for call in calls {
                    responses.push(to_value(self.handle_value(call).await));
                }
                Value::Array(responses)
            }
            call => to_value(self.handle_value(call).await),
        }
    }

    async fn handle_value(&self, call: Value) -> RpcResponse {
        let id = call.get("id").cloned().unwrap_or(Value::Null);

        let request: RpcRequest = match serde_json::from_value(call) {
            Ok(request) => request,
            Err(e) => return RpcResponse::failure(id, &RpcError::InvalidRequest(e.to_string())),
        };

        if request.jsonrpc.as_deref().is_some_and(|v| v != JSONRPC_VERSION) {
            return RpcResponse::failure(
                id,
                &RpcError::InvalidRequest(format!("unsupported jsonrpc version {:?}", request.jsonrpc)),
            );
        }

        self.handle(request).await
    }

    /// Execute one decoded call
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone().unwrap_or(Value::Null);
        debug!("RPC call {} (id {})", request.method, id);

        match self.call(&request.method, request.params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err(e) => {
                warn!("RPC call {} failed: {}", request.method, e);
                RpcResponse::failure(id, &e)
            }
        }
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        match method {
            "crawl_comment" => {
                let args = Args::bind("crawl_comment", params, &["app_ids"])?;
                let app_ids = app_ids_arg(&args)?;
                let task_id = self.controller.submit_crawl(&app_ids).await;
                Ok(json!({
                    "task_id": task_id,
                    "message": format!("Crawling comments for apps {:?} started", app_ids),
                }))
            }
            "sentiment_analysis" => {
                let args = Args::bind("sentiment_analysis", params, &["app_ids"])?;
                let app_ids = app_ids_arg(&args)?;
                let task_id = self.controller.submit_analysis(&app_ids).await;
                Ok(json!({
                    "task_id": task_id,
                    "message": format!("Sentiment analysis for apps {:?} started", app_ids),
                }))
            }
            "check_task_status" => {
                let args = Args::bind("check_task_status", params, &["task_id"])?;
                let task_id = task_id_arg(&args)?;
                let record = self.controller.task_status(&task_id).await?;

                let mut result = json!({
                    "status": record.status,
                    "description": record.description,
                });
                if let Some(error) = record.error {
                    result["error"] = Value::String(error);
                }
                Ok(result)
            }
            "check_add_url" => {
                let args = Args::bind("check_add_url", params, &["crawl_url", "crawl_app_nickname"])?;
                let crawl_url: String = args.required("crawl_url")?;
                let nickname: String = args.optional("crawl_app_nickname")?
                    .unwrap_or_else(|| UNKNOWN_NICKNAME.to_string());

                let report = self.controller.register_url(&crawl_url, &nickname).await;
                Ok(json!({
                    "status": report.status.short_code(),
                    "message": report.message,
                }))
            }
            other => Err(RpcError::MethodNotFound(other.to_string())),
        }
    }
}

fn to_value(response: RpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or_else(|e| {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "error": {"code": -32603, "message": format!("Internal error: {}", e)},
            "id": Value::Null,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::controller::tests::{app, controller, three_items, FakeDrivers};
    use crate::storage::MemoryCommentStore;
    use std::time::Duration;

    fn dispatcher() -> RpcDispatcher {
        let store = Arc::new(MemoryCommentStore::with_targets(vec![app(42)]));
        let drivers = Arc::new(FakeDrivers::new(three_items()));
        RpcDispatcher::new(Arc::new(controller(store, drivers)))
    }

    async fn call(dispatcher: &RpcDispatcher, body: Value) -> Value {
        dispatcher.handle_body(body.to_string().as_bytes()).await
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RpcError::Parse(String::new()).code(), -32700);
        assert_eq!(RpcError::MethodNotFound(String::new()).code(), -32601);
        assert_eq!(RpcError::from(TaskError::NotFound(TaskId::from("x"))).code(), -32004);
    }

    #[tokio::test]
    async fn test_crawl_then_poll_until_completed() {
        let dispatcher = dispatcher();

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "crawl_comment", "params": {"app_ids": [42]}, "id": 1
        })).await;
        assert_eq!(response["id"], 1);
        let task_id = response["result"]["task_id"].as_str().unwrap().to_string();

        let mut status = String::new();
        for _ in 0..200 {
            let response = call(&dispatcher, json!({
                "jsonrpc": "2.0", "method": "check_task_status", "params": [task_id], "id": 2
            })).await;
            status = response["result"]["status"].as_str().unwrap().to_string();
            if status == "completed" || status == "failed" {
                assert!(response["result"].get("error").is_none());
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(status, "completed");
    }

    #[tokio::test]
    async fn test_unknown_task_is_an_error_payload() {
        let dispatcher = dispatcher();

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "check_task_status", "params": {"task_id": "does-not-exist"}, "id": 3
        })).await;

        assert_eq!(response["error"]["code"], -32004);
        assert!(response.get("result").is_none());
        assert_eq!(response["id"], 3);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let dispatcher = dispatcher();

        let response = dispatcher.handle_body(b"{not json").await;
        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);

        let response = call(&dispatcher, json!({"jsonrpc": "2.0", "method": "drop_tables", "id": 4})).await;
        assert_eq!(response["error"]["code"], -32601);

        let response = call(&dispatcher, json!({"jsonrpc": "2.0", "params": [], "id": 5})).await;
        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["id"], 5);

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "crawl_comment", "params": {"app_ids": "42"}, "id": 6
        })).await;
        assert_eq!(response["error"]["code"], -32602);

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "crawl_comment", "params": [[]], "id": 7
        })).await;
        assert_eq!(response["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_check_add_url_default_nickname() {
        let dispatcher = dispatcher();

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "check_add_url",
            "params": ["https://cafebazaar.ir/app/com.bank.mobile"], "id": 8
        })).await;
        assert_eq!(response["result"]["status"], "Valid");

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "check_add_url",
            "params": {"crawl_url": "https://cafebazaar.ir/app/com.bank.mobile", "crawl_app_nickname": "unknown"},
            "id": 9
        })).await;
        assert_eq!(response["result"]["status"], "Duplicate");

        let response = call(&dispatcher, json!({
            "jsonrpc": "2.0", "method": "check_add_url", "params": ["https://example.org/app/x"], "id": 10
        })).await;
        assert_eq!(response["result"]["status"], "host-error");
    }

    #[tokio::test]
    async fn test_batch_request() {
        let dispatcher = dispatcher();

        let response = call(&dispatcher, json!([
            {"jsonrpc": "2.0", "method": "sentiment_analysis", "params": [[42]], "id": "a"},
            {"jsonrpc": "2.0", "method": "nope", "id": "b"}
        ])).await;

        let responses = response.as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert!(responses[0]["result"]["task_id"].is_string());
        assert_eq!(responses[1]["error"]["code"], -32601);

        let response = call(&dispatcher, json!([])).await;
        assert_eq!(response["error"]["code"], -32600);
    }
}
