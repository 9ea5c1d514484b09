use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

use crate::analysis::Verdict;
use crate::crawler::task::{Comment, CrawlSummary, CrawlTarget, NaturalKey, PendingComment};
use crate::storage::{AppRegistration, CommentStore, RegistrationOutcome};
use crate::utils::JalaliDate;

/// App registry row
#[derive(Debug, Clone, PartialEq)]
pub struct AppRecord {
    pub app_url: String,
    pub nickname: String,
    pub active: bool,
    pub deleted: bool,
    pub count_scraped_comments: usize,
    pub count_new_comments: u64,
    pub last_update_comment_scraping: Option<NaiveDate>,
    pub last_update_comment_scraping_jalali: Option<i32>,
}

#[derive(Debug, Clone)]
struct StoredComment {
    comment: Comment,
    date_jalali: i32,
    verdict: Option<Verdict>,
}

#[derive(Debug, Default)]
struct Inner {
    apps: BTreeMap<i64, AppRecord>,
    comments: Vec<StoredComment>,
    by_key: HashMap<NaturalKey, usize>,
}

/// Process-local store, used for development runs and tests
#[derive(Debug, Default)]
pub struct MemoryCommentStore {
    inner: Mutex<Inner>,
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given apps registered as active
    pub fn with_targets(targets: impl IntoIterator<Item = CrawlTarget>) -> Self {
        let mut inner = Inner::default();
        for target in targets {
            inner.apps.insert(target.app_id, AppRecord {
                nickname: nickname_of(&target.app_url),
                app_url: target.app_url,
                active: true,
                deleted: false,
                count_scraped_comments: 0,
                count_new_comments: 0,
                last_update_comment_scraping: None,
                last_update_comment_scraping_jalali: None,
            });
        }

        Self {
            inner: Mutex::new(inner),
        }
    }

    pub async fn comment_count(&self) -> usize {
        self.inner.lock().await.comments.len()
    }

    pub async fn natural_keys(&self) -> Vec<NaturalKey> {
        let mut keys: Vec<NaturalKey> = self.inner.lock().await.by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn verdict(&self, key: &NaturalKey) -> Option<Verdict> {
        let inner = self.inner.lock().await;
        inner.by_key.get(key).and_then(|&index| inner.comments[index].verdict)
    }

    /// Stored Jalali `YYYYMMDD` date of a comment
    pub async fn comment_date_jalali(&self, key: &NaturalKey) -> Option<i32> {
        let inner = self.inner.lock().await;
        inner.by_key.get(key).map(|&index| inner.comments[index].date_jalali)
    }

    pub async fn app(&self, app_id: i64) -> Option<AppRecord> {
        self.inner.lock().await.apps.get(&app_id).cloned()
    }

    /// Soft-delete an app, as the registry's maintenance jobs do
    pub async fn delete_app(&self, app_id: i64) {
        if let Some(app) = self.inner.lock().await.apps.get_mut(&app_id) {
            app.deleted = true;
        }
    }
}

fn nickname_of(app_url: &str) -> String {
    app_url.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string()
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn crawl_targets(&self, app_ids: &[i64]) -> Result<Vec<CrawlTarget>> {
        let inner = self.inner.lock().await;
        let mut targets: Vec<CrawlTarget> = inner.apps.iter()
            .filter(|(app_id, app)| app_ids.contains(app_id) && app.active && !app.deleted)
            .map(|(&app_id, app)| CrawlTarget {
                app_id,
                app_url: app.app_url.clone(),
            })
            .collect();
        targets.sort_by_key(|target| target.app_id);
        Ok(targets)
    }

    async fn upsert_comments(&self, comments: &[Comment]) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let mut inserted = 0;

        for comment in comments {
            if inner.by_key.contains_key(&comment.natural_key) {
                continue;
            }
            let index = inner.comments.len();
            inner.by_key.insert(comment.natural_key.clone(), index);
            inner.comments.push(StoredComment {
                comment: comment.clone(),
                date_jalali: JalaliDate::from(comment.date).as_number(),
                verdict: None,
            });
            inserted += 1;
        }

        debug!("Inserted {} of {} comments", inserted, comments.len());

        Ok(inserted)
    }

    async fn record_crawl(&self, summary: &CrawlSummary, crawled_on: NaiveDate) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.apps.get_mut(&summary.app_id) {
            Some(app) => {
                app.count_scraped_comments = summary.scraped;
                app.count_new_comments = summary.inserted;
                app.last_update_comment_scraping = Some(crawled_on);
                app.last_update_comment_scraping_jalali = Some(JalaliDate::from(crawled_on).as_number());
                Ok(())
            }
            None => anyhow::bail!("Unknown app_id {}", summary.app_id),
        }
    }

    async fn pending_comments(&self, app_id: i64) -> Result<Vec<PendingComment>> {
        let inner = self.inner.lock().await;
        Ok(inner.comments.iter()
            .filter(|stored| stored.comment.app_id == app_id && stored.verdict.is_none())
            .map(|stored| PendingComment {
                natural_key: stored.comment.natural_key.clone(),
                text: stored.comment.text.clone(),
                rating: stored.comment.rating,
            })
            .collect())
    }

    async fn store_verdict(&self, key: &NaturalKey, verdict: &Verdict) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let index = match inner.by_key.get(key) {
            Some(&index) => index,
            None => anyhow::bail!("Unknown comment {}", key),
        };

        let stored = &mut inner.comments[index];
        stored.verdict = Some(*verdict);
        stored.comment.processed_by_secondary_model = verdict.secondary_used;

        Ok(())
    }

    async fn register_app(&self, app: &AppRegistration) -> Result<RegistrationOutcome> {
        let mut inner = self.inner.lock().await;

        if let Some((&app_id, record)) = inner.apps.iter_mut().find(|(_, record)| record.nickname == app.nickname) {
            if record.deleted {
                record.deleted = false;
                record.active = true;
                record.app_url = app.app_url.clone();
                return Ok(RegistrationOutcome::Reactivated { app_id });
            }
            return Ok(RegistrationOutcome::Duplicate { app_id });
        }

        let app_id = inner.apps.keys().next_back().map_or(1, |last| last + 1);
        inner.apps.insert(app_id, AppRecord {
            app_url: app.app_url.clone(),
            nickname: app.nickname.clone(),
            active: true,
            deleted: false,
            count_scraped_comments: 0,
            count_new_comments: 0,
            last_update_comment_scraping: None,
            last_update_comment_scraping_jalali: None,
        });

        Ok(RegistrationOutcome::Added { app_id })
    }
}
