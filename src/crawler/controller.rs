use anyhow::{anyhow, Result, Context};
use chrono::Local;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::analysis::{HttpSentimentModel, SentimentAnalyzer};
use crate::browser::{BehaviorSimulator, DriverFactory, WebDriverFactory};
use crate::cli::config::{AppConfig, RegistrationSettings};
use crate::crawler::error::CrawlError;
use crate::crawler::paginator::PaginationCrawler;
use crate::crawler::registration::{self, RegistrationReport, RegistrationStatus, UNKNOWN_NICKNAME};
use crate::crawler::retry::RetryPolicy;
use crate::crawler::task::{CrawlSummary, CrawlTarget};
use crate::storage::{AppRegistration, CommentStore, CommentStoreFactory};
use crate::tasks::registry::panic_message;
use crate::tasks::{BatchKey, GateBook, TaskError, TaskId, TaskRecord, TaskRegistry};

/// Submits crawl and analysis tasks and answers status queries.
///
/// Every submission returns as soon as the task is registered; the work runs on
/// its own tokio task. An analysis waits until no crawl submitted before it is
/// still running for any of its apps.
pub struct CrawlerController {
    /// Comment and app persistence
    store: Arc<dyn CommentStore>,

    /// Opens one browser session per crawl target
    drivers: Arc<dyn DriverFactory>,

    /// Pagination loop shared by all crawl tasks
    crawler: Arc<PaginationCrawler>,

    /// Classification gateway shared by all analysis tasks
    analyzer: Arc<SentimentAnalyzer>,

    /// Status of every submitted task
    registry: Arc<TaskRegistry>,

    /// Crawl-before-analysis ordering, per app
    gates: Arc<GateBook>,

    /// Marketplace host accepted by URL registration
    registration: RegistrationSettings,
}

impl CrawlerController {
    pub fn new(
        store: Arc<dyn CommentStore>,
        drivers: Arc<dyn DriverFactory>,
        crawler: PaginationCrawler,
        analyzer: SentimentAnalyzer,
        registration: RegistrationSettings,
    ) -> Self {
        Self {
            store,
            drivers,
            crawler: Arc::new(crawler),
            analyzer: Arc::new(analyzer),
            registry: Arc::new(TaskRegistry::new()),
            gates: Arc::new(GateBook::new()),
            registration,
        }
    }

    /// Build a controller with the configured store, browser and classifiers
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let store = CommentStoreFactory::create(&config.storage).await?;

        let drivers = Arc::new(WebDriverFactory::new(
            config.browser.clone(),
            config.crawler.selectors.clone(),
        ));

        let crawler = PaginationCrawler::new(
            config.crawler.clone(),
            RetryPolicy::from(&config.retry.page_load),
            BehaviorSimulator::new(&config.crawler),
        );

        let timeout = Duration::from_secs(config.analysis.request_timeout_secs);
        let primary = HttpSentimentModel::new(&config.analysis.primary_url, timeout)
            .context("Failed to create primary classifier client")?;
        let secondary = HttpSentimentModel::new(&config.analysis.secondary_url, timeout)
            .context("Failed to create secondary classifier client")?;
        let analyzer = SentimentAnalyzer::new(
            Arc::new(primary),
            Arc::new(secondary),
            RetryPolicy::from(&config.retry.classification),
            config.analysis.item_delay(),
        );

        Ok(Self::new(store, drivers, crawler, analyzer, config.registration.clone()))
    }

    /// Submit a crawl of the given apps
    pub async fn submit_crawl(&self, app_ids: &[i64]) -> TaskId {
        let key = BatchKey::new(app_ids);

        // Clear before returning so an analysis submitted right after waits for this crawl
        let claims = self.gates.clear(&key).await;

        let work = crawl_batch(
            Arc::clone(&self.store),
            Arc::clone(&self.drivers),
            Arc::clone(&self.crawler),
            key.app_ids().to_vec(),
        );

        let id = self.registry
            .spawn(format!("Crawling comments for apps {}", key), work, move |status| {
                debug!("Crawl finished as {}, releasing analysis gates", status);
                for claim in claims {
                    claim.signal();
                }
            })
            .await;

        info!("Submitted crawl task {} for apps {}", id, key);
        id
    }

    /// Submit a sentiment analysis of the given apps
    pub async fn submit_analysis(&self, app_ids: &[i64]) -> TaskId {
        let key = BatchKey::new(app_ids);
        let gates = self.gates.gates(&key).await;

        let store = Arc::clone(&self.store);
        let analyzer = Arc::clone(&self.analyzer);
        let batch = key.clone();
        let work = async move {
            if gates.iter().any(|gate| !gate.is_signaled()) {
                info!("Waiting for crawls of apps {} to finish", batch);
            }
            for gate in &gates {
                gate.wait().await;
            }
            analyze_batch(store, analyzer, batch.app_ids().to_vec()).await
        };

        let id = self.registry
            .spawn(format!("Analyzing sentiment for apps {}", key), work, |_| {})
            .await;

        info!("Submitted analysis task {} for apps {}", id, key);
        id
    }

    /// Snapshot of a task
    pub async fn task_status(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        self.registry.status(id).await
    }

    /// Poll a task until it reaches a terminal state
    pub async fn wait_for_task(&self, id: &TaskId, poll_interval: Duration) -> Result<TaskRecord, TaskError> {
        loop {
            let record = self.registry.status(id).await?;
            if record.status.is_terminal() {
                return Ok(record);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Validate a marketplace URL and add its app to the crawl targets
    pub async fn register_url(&self, crawl_url: &str, nickname: &str) -> RegistrationReport {
        let package = match registration::package_name(crawl_url, &self.registration.allowed_host) {
            Ok(package) => package,
            Err(report) => {
                warn!("Rejected URL {}: {}", crawl_url, report.message);
                return report;
            }
        };

        let nickname = if nickname.trim().is_empty() || nickname == UNKNOWN_NICKNAME {
            package
        } else {
            nickname.trim().to_string()
        };

        let app = AppRegistration {
            app_url: crawl_url.trim().to_string(),
            nickname,
        };

        match self.store.register_app(&app).await {
            Ok(outcome) => {
                info!("Registered {} ({}): {:?}", app.nickname, app.app_url, outcome);
                RegistrationReport::from_outcome(outcome, &app.nickname, &app.app_url)
            }
            Err(e) => {
                error!("Failed to register {}: {:#}", app.app_url, e);
                RegistrationReport::new(
                    RegistrationStatus::ConnectionError,
                    format!("Something happened. Check the connection or validity of URL: {}", app.app_url),
                )
            }
        }
    }
}

/// Crawl every active target of a batch.
///
/// A failing target does not stop the others, but fails the task once the
/// whole batch has been attempted.
async fn crawl_batch(
    store: Arc<dyn CommentStore>,
    drivers: Arc<dyn DriverFactory>,
    crawler: Arc<PaginationCrawler>,
    app_ids: Vec<i64>,
) -> Result<String> {
    let targets = store.crawl_targets(&app_ids).await
        .context("Failed to fetch apps to crawl")?;

    if targets.is_empty() {
        anyhow::bail!("No active apps found among {:?}", app_ids);
    }

    let mut scraped = 0;
    let mut inserted = 0;
    let mut failures = Vec::new();

    for target in &targets {
        info!("Crawling comments for app at {}", target.app_url);

        match crawl_target(store.as_ref(), drivers.as_ref(), &crawler, target).await {
            Ok(summary) => {
                scraped += summary.scraped;
                inserted += summary.inserted;
            }
            Err(e) => {
                error!("Crawl of app_id {} failed: {:#}", target.app_id, e);
                failures.push(format!("app_id {}: {:#}", target.app_id, e));
            }
        }
    }

    if !failures.is_empty() {
        anyhow::bail!(
            "{} of {} apps failed: {}",
            failures.len(),
            targets.len(),
            failures.join("; ")
        );
    }

    Ok(format!(
        "Crawled {} apps: {} comments scraped, {} new",
        targets.len(),
        scraped,
        inserted
    ))
}

async fn crawl_target(
    store: &dyn CommentStore,
    drivers: &dyn DriverFactory,
    crawler: &PaginationCrawler,
    target: &CrawlTarget,
) -> Result<CrawlSummary> {
    let driver = drivers.open().await
        .context("Failed to open browser session")?;

    let result = AssertUnwindSafe(crawler.crawl(driver.as_ref(), target))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(CrawlError::Driver(anyhow!(panic_message(panic.as_ref())))));

    // Close the session whether the crawl succeeded, failed or panicked
    if let Err(e) = driver.close().await {
        warn!("Failed to close browser session for app_id {}: {:#}", target.app_id, e);
    }

    let batch = result?;
    let inserted = store.upsert_comments(&batch.comments).await
        .context(format!("Failed to store comments for app_id {}", target.app_id))?;

    let summary = CrawlSummary {
        app_id: target.app_id,
        scraped: batch.comments.len(),
        inserted,
    };

    store.record_crawl(&summary, Local::now().date_naive()).await
        .context(format!("Failed to record crawl for app_id {}", target.app_id))?;

    info!(
        "App_id {}: {} comments scraped ({} skipped), {} new",
        target.app_id, summary.scraped, batch.items_skipped, summary.inserted
    );

    Ok(summary)
}

async fn analyze_batch(
    store: Arc<dyn CommentStore>,
    analyzer: Arc<SentimentAnalyzer>,
    app_ids: Vec<i64>,
) -> Result<String> {
    let mut analyzed = 0;
    let mut resolved_by_secondary = 0;
    let mut failed = 0;

    for app_id in &app_ids {
        info!("Processing comments for app_id: {}", app_id);

        let summary = analyzer.analyze_app(store.as_ref(), *app_id).await?;
        if summary.analyzed == 0 && summary.failed == 0 {
            info!("No more comments to analyze for app_id {}", app_id);
        }

        analyzed += summary.analyzed;
        resolved_by_secondary += summary.resolved_by_secondary;
        failed += summary.failed;
    }

    if failed > 0 {
        warn!("{} verdicts could not be stored", failed);
    }

    Ok(format!(
        "Analyzed {} comments for {} apps ({} resolved by secondary model, {} not stored)",
        analyzed,
        app_ids.len(),
        resolved_by_secondary,
        failed
    ))
}
