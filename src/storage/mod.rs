pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::analysis::Verdict;
use crate::cli::config::StorageSettings;
use crate::crawler::task::{Comment, CrawlSummary, CrawlTarget, NaturalKey, PendingComment};

// Re-export common types
pub use memory::MemoryCommentStore;
pub use postgres::PostgresCommentStore;

/// App to add to the registry of crawl targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRegistration {
    pub app_url: String,
    pub nickname: String,
}

/// What registering an app did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationOutcome {
    Added { app_id: i64 },
    Reactivated { app_id: i64 },
    Duplicate { app_id: i64 },
}

/// Persistence for apps and their comments.
///
/// `upsert_comments` silently discards comments whose natural key is already
/// stored, so re-crawling is idempotent and needs no application-level locking.
#[async_trait]
pub trait CommentStore: Send + Sync {
    /// Active, non-deleted apps among the given ids
    async fn crawl_targets(&self, app_ids: &[i64]) -> Result<Vec<CrawlTarget>>;

    /// Insert new comments, returning how many were actually new
    async fn upsert_comments(&self, comments: &[Comment]) -> Result<u64>;

    /// Record crawl counters on the app
    async fn record_crawl(&self, summary: &CrawlSummary, crawled_on: NaiveDate) -> Result<()>;

    /// Comments of an app that have no sentiment yet, oldest first
    async fn pending_comments(&self, app_id: i64) -> Result<Vec<PendingComment>>;

    /// Store the sentiment of a comment
    async fn store_verdict(&self, key: &NaturalKey, verdict: &Verdict) -> Result<()>;

    /// Add an app to the registry, or reactivate it if it was deleted
    async fn register_app(&self, app: &AppRegistration) -> Result<RegistrationOutcome>;
}

/// Factory for creating a CommentStore implementation
pub struct CommentStoreFactory;

impl CommentStoreFactory {
    /// Create a new CommentStore instance based on the settings
    pub async fn create(settings: &StorageSettings) -> Result<Arc<dyn CommentStore>> {
        match settings.backend.as_str() {
            "postgresql" => {
                let store = PostgresCommentStore::new(settings).await?;
                Ok(Arc::new(store))
            },
            "memory" => {
                Ok(Arc::new(MemoryCommentStore::new()))
            },
            _ => {
                anyhow::bail!("Unsupported storage backend: {}", settings.backend);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_builds_memory_store() {
        let settings = StorageSettings {
            backend: "memory".to_string(),
            ..Default::default()
        };

        let store = CommentStoreFactory::create(&settings).await.unwrap();
        assert!(store.crawl_targets(&[1]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_backend() {
        let settings = StorageSettings {
            backend: "mongodb".to_string(),
            ..Default::default()
        };

        assert!(CommentStoreFactory::create(&settings).await.is_err());
    }
}
