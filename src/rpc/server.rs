use anyhow::{Result, Context};
use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::rpc::RpcDispatcher;

/// Single-endpoint JSON-RPC front; every answer is HTTP 200
pub fn router(dispatcher: Arc<RpcDispatcher>) -> Router {
    Router::new()
        .route("/", post(handle_rpc))
        .with_state(dispatcher)
}

async fn handle_rpc(State(dispatcher): State<Arc<RpcDispatcher>>, body: Bytes) -> Json<Value> {
    Json(dispatcher.handle_body(&body).await)
}

/// Serve RPC calls on `bind_address` until Ctrl-C
pub async fn serve(dispatcher: Arc<RpcDispatcher>, bind_address: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .context(format!("Failed to bind to address {}", bind_address))?;

    info!("Server running on {}", bind_address);

    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
