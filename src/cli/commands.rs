use anyhow::{Result, Context};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::config::AppConfig;
use crate::crawler::controller::CrawlerController;
use crate::rpc::{self, RpcClient, RpcDispatcher};
use crate::tasks::{TaskId, TaskRecord, TaskStatus};

/// How often foreground commands poll their task
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Run the JSON-RPC server
pub async fn serve(config_path: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let bind_address = bind.unwrap_or_else(|| config.server.bind_address.clone());

    let controller = CrawlerController::from_config(&config).await
        .context("Failed to initialize crawler")?;
    let dispatcher = Arc::new(RpcDispatcher::new(Arc::new(controller)));

    rpc::serve(dispatcher, &bind_address).await
}

/// Crawl the given apps and wait for the task to finish
pub async fn crawl(config_path: Option<PathBuf>, app_ids: Vec<i64>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let controller = CrawlerController::from_config(&config).await
        .context("Failed to initialize crawler")?;

    let task_id = controller.submit_crawl(&app_ids).await;
    info!("Crawl task {} started", task_id);

    let record = controller.wait_for_task(&task_id, POLL_INTERVAL).await?;
    report(&task_id, &record)
}

/// Analyze the given apps and wait for the task to finish
pub async fn analyze(config_path: Option<PathBuf>, app_ids: Vec<i64>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let controller = CrawlerController::from_config(&config).await
        .context("Failed to initialize crawler")?;

    let task_id = controller.submit_analysis(&app_ids).await;
    info!("Analysis task {} started", task_id);

    let record = controller.wait_for_task(&task_id, POLL_INTERVAL).await?;
    report(&task_id, &record)
}

fn report(task_id: &TaskId, record: &TaskRecord) -> Result<()> {
    println!("Task ID: {}", task_id);
    println!("Status: {}", record.status);
    println!("Description: {}", record.description);
    println!("Last Updated: {}", record.updated_at);

    if record.status == TaskStatus::Failed {
        anyhow::bail!("Task {} failed: {}", task_id, record.error.as_deref().unwrap_or("unknown error"));
    }

    Ok(())
}

/// Call a method on a running server and print the result
pub async fn call(method: String, params: String, url: String) -> Result<()> {
    let params: Value = serde_json::from_str(&params)
        .context(format!("Params are not valid JSON: {}", params))?;

    let client = RpcClient::new(&url)?;
    let result = client.call(&method, params).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

/// Write the default configuration, keeping an existing file untouched
pub async fn init_config(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(AppConfig::default_path);

    if path.exists() {
        warn!("Configuration already exists at {}", path.display());
        println!("Configuration already exists: {}", path.display());
        return Ok(());
    }

    AppConfig::default().save_to_file(&path)?;
    println!("Created default configuration: {}", path.display());

    Ok(())
}

/// Show the current configuration
pub async fn show_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    println!("Current configuration:");
    println!("{}", serde_yaml::to_string(&config).context("Failed to serialize configuration")?);

    Ok(())
}
