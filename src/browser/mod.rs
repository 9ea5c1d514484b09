pub mod behavior;
pub mod session;

use anyhow::Result;
use async_trait::async_trait;

use crate::crawler::task::RawCommentItem;

// Re-export common types
pub use behavior::BehaviorSimulator;
pub use session::WebDriverFactory;

/// Page-level capabilities the pagination crawler drives
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate to a URL, failing on timeout
    async fn load_page(&self, url: &str) -> Result<()>;

    /// Click the "load more" control; `false` when it's no longer available
    async fn click_load_more(&self) -> Result<bool>;

    /// Drop session cookies and re-assert the scroll position
    async fn reset_session(&self) -> Result<()>;

    /// Read every comment element currently rendered
    async fn extract_items(&self) -> Result<Vec<RawCommentItem>>;

    /// Release the underlying browser
    async fn close(&self) -> Result<()>;
}

/// Opens a fresh page driver for each crawl target
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn PageDriver>>;
}
