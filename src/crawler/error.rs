use thiserror::Error;

/// Failures raised while crawling a single target
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Page could not be loaded, even after retrying
    #[error("failed to load {url} after {attempts} attempts: {message}")]
    TransientLoad {
        url: String,
        attempts: u32,
        message: String,
    },

    /// A single comment element had malformed or missing fields
    #[error("malformed comment element: {0}")]
    Extraction(String),

    /// Any other browser-side failure
    #[error("browser driver failure: {0}")]
    Driver(#[from] anyhow::Error),
}
