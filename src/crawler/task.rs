use serde::{Serialize, Deserialize};
use chrono::NaiveDate;
use std::fmt;

/// An app whose comment list should be crawled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlTarget {
    /// Identifier of the app in the app registry
    pub app_id: i64,

    /// Marketplace page of the app
    pub app_url: String,
}

/// Deduplication key of a comment.
///
/// Either the identifier the marketplace assigns to the comment element, or a
/// content hash when the element carries no identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn site(id: &str) -> Self {
        Self(id.trim().to_string())
    }

    pub fn content(hash_hex: &str) -> Self {
        Self(format!("h:{}", hash_hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NaturalKey {
    fn from(stored: String) -> Self {
        Self(stored)
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A comment ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub app_id: i64,
    pub user_name: String,
    pub text: String,

    /// Star rating on a 0-5 scale, `None` when the indicator could not be parsed
    pub rating: Option<f32>,

    pub date: NaiveDate,
    pub natural_key: NaturalKey,
    pub processed_by_secondary_model: bool,
}

/// Fields scraped from one rendered comment element, before parsing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCommentItem {
    pub element_id: Option<String>,
    pub username: Option<String>,
    pub body: Option<String>,
    pub meta: Option<String>,
    pub rating_style: Option<String>,
}

/// Comments collected from one target, plus extraction counters
#[derive(Debug, Clone, Default)]
pub struct CrawlBatch {
    pub comments: Vec<Comment>,

    /// Items rendered on the page, including the ones that failed extraction
    pub items_seen: usize,

    /// Items skipped because of malformed fields
    pub items_skipped: usize,

    /// Total "load more" clicks performed
    pub clicks: u32,
}

/// Outcome of persisting one target's batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlSummary {
    pub app_id: i64,
    pub scraped: usize,
    pub inserted: u64,
}

/// A stored comment still waiting for a sentiment verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingComment {
    pub natural_key: NaturalKey,
    pub text: String,
    pub rating: Option<f32>,
}
