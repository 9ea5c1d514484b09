use anyhow::{Result, Context};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::rpc::dispatch::{RpcResponse, JSONRPC_VERSION};

/// Minimal JSON-RPC client for the crawler service
pub struct RpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` and return its result; an error payload becomes an `Err`
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": JSONRPC_VERSION,
            "method": method,
            "params": params,
            "id": id,
        });

        debug!("Calling {} at {}", method, self.url);

        let response = self.client.post(&self.url)
            .json(&request)
            .send()
            .await
            .context(format!("Failed to reach RPC server at {}", self.url))?
            .error_for_status()
            .context("RPC server returned an HTTP error")?
            .json::<RpcResponse>()
            .await
            .context("Failed to parse RPC response")?;

        match (response.result, response.error) {
            (_, Some(error)) => anyhow::bail!("RPC error {}: {}", error.code, error.message),
            (Some(result), None) => Ok(result),
            (None, None) => anyhow::bail!("RPC response carries neither result nor error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_call_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({"method": "crawl_comment", "params": {"app_ids": [1, 2]}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "result": {"task_id": "abc", "message": "started"},
                "id": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = RpcClient::new(&format!("{}/", server.uri())).unwrap();
        let result = client.call("crawl_comment", json!({"app_ids": [1, 2]})).await.unwrap();

        assert_eq!(result["task_id"], "abc");
    }

    #[tokio::test]
    async fn test_error_payload_becomes_err() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": "Method not found: nope"},
                "id": 1
            })))
            .mount(&server)
            .await;

        let client = RpcClient::new(&server.uri()).unwrap();
        let error = client.call("nope", json!([])).await.unwrap_err();

        assert!(error.to_string().contains("-32601"));
    }
}
