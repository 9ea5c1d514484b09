use anyhow::{Result, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// An external sentiment classifier
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SentimentModel: Send + Sync {
    /// Classify a text, returning the model's raw label
    async fn classify(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
}

/// Classifier served over HTTP: `POST {"text": ...}` answered by `{"label": ...}`
pub struct HttpSentimentModel {
    client: Client,
    endpoint: String,
}

impl HttpSentimentModel {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl SentimentModel for HttpSentimentModel {
    async fn classify(&self, text: &str) -> Result<String> {
        let response = self.client.post(&self.endpoint)
            .json(&ClassifyRequest { text })
            .send()
            .await
            .context(format!("Failed to reach classifier at {}", self.endpoint))?
            .error_for_status()
            .context("Classifier returned an error status")?
            .json::<ClassifyResponse>()
            .await
            .context("Failed to parse classifier response")?;

        debug!("Classifier {} answered '{}'", self.endpoint, response.label);

        Ok(response.label)
    }
}
