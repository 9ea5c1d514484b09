use chrono::{Local, NaiveDate};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use crate::browser::{BehaviorSimulator, PageDriver};
use crate::cli::config::CrawlerSettings;
use crate::crawler::error::CrawlError;
use crate::crawler::parse::{extract_comment, localized_url};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::task::{CrawlBatch, CrawlTarget, RawCommentItem};

/// Drives a "load more" comment list until it is exhausted
pub struct PaginationCrawler {
    /// Crawler settings
    config: CrawlerSettings,

    /// Retry policy for page loads
    page_load: RetryPolicy,

    /// Click pacing
    behavior: BehaviorSimulator,
}

impl PaginationCrawler {
    pub fn new(config: CrawlerSettings, page_load: RetryPolicy, behavior: BehaviorSimulator) -> Self {
        Self {
            config,
            page_load,
            behavior,
        }
    }

    /// Retrieve every comment of a target as a deduplicated batch
    pub async fn crawl(&self, driver: &dyn PageDriver, target: &CrawlTarget) -> Result<CrawlBatch, CrawlError> {
        let url = localized_url(&target.app_url, &self.config.locale);

        self.load(driver, &url).await?;
        info!("Loaded comment page for app_id {}", target.app_id);

        let clicks = self.exhaust_pagination(driver, target.app_id).await?;

        let items = driver.extract_items().await?;
        info!("Found {} comments for app_id {}", items.len(), target.app_id);

        let mut batch = self.build_batch(target.app_id, &items, Local::now().date_naive());
        batch.clicks = clicks;

        Ok(batch)
    }

    async fn load(&self, driver: &dyn PageDriver, url: &str) -> Result<(), CrawlError> {
        self.page_load
            .run("page load", || driver.load_page(url), |_| true)
            .await
            .map_err(|exhausted| {
                error!("Giving up on {} after {} attempts", url, exhausted.attempts);
                CrawlError::TransientLoad {
                    url: url.to_string(),
                    attempts: exhausted.attempts,
                    message: format!("{:#}", exhausted.last_error),
                }
            })
    }

    /// Click "load more" in bounded cycles, resetting the session between full
    /// cycles. Returns the total number of clicks.
    async fn exhaust_pagination(&self, driver: &dyn PageDriver, app_id: i64) -> Result<u32, CrawlError> {
        let cycle_size = self.config.cycle_size.max(1);
        let mut total_clicks = 0;
        let mut cycles = 0;

        loop {
            cycles += 1;
            let mut clicks = 0;

            while clicks < cycle_size {
                self.behavior.pause_before_click().await;

                match driver.click_load_more().await {
                    Ok(true) => {
                        clicks += 1;
                        total_clicks += 1;
                        debug!("Clicked 'load more' {} times for app_id {}", total_clicks, app_id);
                        self.behavior.pause_after_click().await;
                    }
                    Ok(false) => {
                        debug!("No more 'load more' control for app_id {}", app_id);
                        break;
                    }
                    Err(e) => {
                        warn!("'load more' click failed for app_id {}: {:#}", app_id, e);
                        break;
                    }
                }
            }

            // A short cycle means the list ran out
            if clicks < cycle_size {
                break;
            }

            if cycles >= self.config.max_cycles {
                warn!(
                    "Reached {} pagination cycles for app_id {}; extracting what is rendered",
                    cycles, app_id
                );
                break;
            }

            info!("Simulating session reset for app_id {} after {} clicks", app_id, total_clicks);
            driver.reset_session().await?;
        }

        Ok(total_clicks)
    }

    /// Parse scraped items, skipping malformed ones and repeated natural keys
    fn build_batch(&self, app_id: i64, items: &[RawCommentItem], today: NaiveDate) -> CrawlBatch {
        let mut seen = HashSet::new();
        let mut batch = CrawlBatch {
            items_seen: items.len(),
            ..Default::default()
        };

        for item in items {
            match extract_comment(app_id, item, &self.config.date_format, today) {
                Ok(comment) => {
                    if seen.insert(comment.natural_key.clone()) {
                        batch.comments.push(comment);
                    } else {
                        debug!("Comment {} rendered twice, keeping the first", comment.natural_key);
                    }
                }
                Err(e) => {
                    error!("Error processing comment for app_id {}: {}", app_id, e);
                    batch.items_skipped += 1;
                }
            }
        }

        batch
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted page: fails the first `load_failures` loads, then exposes
    /// `available_clicks` presses of "load more" before the control disappears.
    #[derive(Default)]
    pub(crate) struct FakePage {
        pub load_failures: u32,
        pub available_clicks: u32,
        pub items: Vec<RawCommentItem>,
        pub state: Mutex<FakeState>,
    }

    #[derive(Default, Debug)]
    pub(crate) struct FakeState {
        pub loads: Vec<String>,
        pub clicks: u32,
        pub resets: u32,
        pub closed: bool,
    }

    #[async_trait]
    impl PageDriver for FakePage {
        async fn load_page(&self, url: &str) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.loads.push(url.to_string());
            if state.loads.len() as u32 <= self.load_failures {
                return Err(anyhow!("timeout loading {}", url));
            }
            Ok(())
        }

        async fn click_load_more(&self) -> Result<bool> {
            let mut state = self.state.lock().unwrap();
            if state.clicks >= self.available_clicks {
                return Ok(false);
            }
            state.clicks += 1;
            Ok(true)
        }

        async fn reset_session(&self) -> Result<()> {
            self.state.lock().unwrap().resets += 1;
            Ok(())
        }

        async fn extract_items(&self) -> Result<Vec<RawCommentItem>> {
            Ok(self.items.clone())
        }

        async fn close(&self) -> Result<()> {
            self.state.lock().unwrap().closed = true;
            Ok(())
        }
    }

    pub(crate) fn raw_item(id: &str, rating_style: &str) -> RawCommentItem {
        RawCommentItem {
            element_id: Some(id.to_string()),
            username: Some(format!("user-{}", id)),
            body: Some(format!("comment body {}", id)),
            meta: Some("2024/01/15".to_string()),
            rating_style: Some(rating_style.to_string()),
        }
    }

    fn crawler(cycle_size: u32, max_cycles: u32) -> PaginationCrawler {
        let config = CrawlerSettings {
            cycle_size,
            max_cycles,
            ..Default::default()
        };
        let retry = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::none()
        };
        PaginationCrawler::new(config, retry, BehaviorSimulator::instant())
    }

    fn target() -> CrawlTarget {
        CrawlTarget {
            app_id: 42,
            app_url: "https://cafebazaar.ir/app/com.example?l=fa".to_string(),
        }
    }

    #[tokio::test]
    async fn test_crawl_without_load_more() {
        let page = FakePage {
            items: vec![raw_item("1", "width: 100%"), raw_item("2", "width: 40%"), raw_item("3", "width: 60%")],
            ..Default::default()
        };

        let batch = crawler(126, 40).crawl(&page, &target()).await.unwrap();

        assert_eq!(batch.comments.len(), 3);
        assert_eq!(batch.clicks, 0);
        let state = page.state.lock().unwrap();
        assert_eq!(state.loads, vec!["https://cafebazaar.ir/app/com.example?l=en".to_string()]);
        assert_eq!(state.resets, 0);
    }

    #[tokio::test]
    async fn test_full_cycles_trigger_session_reset() {
        // 7 clicks with cycles of 3: 3 + reset, 3 + reset, 1 -> exhausted
        let page = FakePage {
            available_clicks: 7,
            ..Default::default()
        };

        let batch = crawler(3, 40).crawl(&page, &target()).await.unwrap();

        assert_eq!(batch.clicks, 7);
        assert_eq!(page.state.lock().unwrap().resets, 2);
    }

    #[tokio::test]
    async fn test_exact_multiple_of_cycle_needs_one_more_cycle() {
        let page = FakePage {
            available_clicks: 6,
            ..Default::default()
        };

        let batch = crawler(3, 40).crawl(&page, &target()).await.unwrap();

        assert_eq!(batch.clicks, 6);
        assert_eq!(page.state.lock().unwrap().resets, 2);
    }

    #[tokio::test]
    async fn test_cycle_ceiling_bounds_the_loop() {
        let page = FakePage {
            available_clicks: 1000,
            ..Default::default()
        };

        let batch = crawler(5, 2).crawl(&page, &target()).await.unwrap();

        assert_eq!(batch.clicks, 10);
        assert_eq!(page.state.lock().unwrap().resets, 1);
    }

    #[tokio::test]
    async fn test_transient_load_failure_is_retried() {
        let page = FakePage {
            load_failures: 2,
            items: vec![raw_item("1", "width: 100%")],
            ..Default::default()
        };

        let batch = crawler(126, 40).crawl(&page, &target()).await.unwrap();

        assert_eq!(batch.comments.len(), 1);
        assert_eq!(page.state.lock().unwrap().loads.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_load_retries_abort_target() {
        let page = FakePage {
            load_failures: 10,
            ..Default::default()
        };

        let result = crawler(126, 40).crawl(&page, &target()).await;

        match result {
            Err(CrawlError::TransientLoad { attempts, url, .. }) => {
                assert_eq!(attempts, 3);
                assert!(url.ends_with("?l=en"));
            }
            other => panic!("expected TransientLoad, got {:?}", other.map(|b| b.comments.len())),
        }
        assert_eq!(page.state.lock().unwrap().clicks, 0);
    }

    #[tokio::test]
    async fn test_malformed_items_are_skipped_not_fatal() {
        let broken = RawCommentItem {
            body: None,
            ..raw_item("2", "width: 20%")
        };
        let page = FakePage {
            items: vec![raw_item("1", "width: 100%"), broken, raw_item("3", "garbage"), raw_item("1", "width: 100%")],
            ..Default::default()
        };

        let batch = crawler(126, 40).crawl(&page, &target()).await.unwrap();

        assert_eq!(batch.items_seen, 4);
        assert_eq!(batch.items_skipped, 1);
        // Duplicate "1" collapsed, malformed rating kept with unknown rating
        assert_eq!(batch.comments.len(), 2);
        assert_eq!(batch.comments[1].rating, None);
    }
}
