use anyhow::{Result, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use tracing::{debug, info};

use crate::analysis::Verdict;
use crate::cli::config::StorageSettings;
use crate::crawler::task::{Comment, CrawlSummary, CrawlTarget, NaturalKey, PendingComment};
use crate::storage::{AppRegistration, CommentStore, RegistrationOutcome};
use crate::utils::JalaliDate;

/// PostgreSQL implementation of CommentStore
pub struct PostgresCommentStore {
    /// PostgreSQL connection pool
    pool: Pool<Postgres>,

    /// Schema name
    schema: String,
}

impl PostgresCommentStore {
    /// Create a new PostgreSQL store and make sure its tables exist
    pub async fn new(settings: &StorageSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        let store = Self {
            pool,
            schema: settings.schema_name.clone(),
        };

        store.ensure_schema().await?;

        debug!("Connected to PostgreSQL database");

        Ok(store)
    }

    /// Ensure the schema and tables exist
    async fn ensure_schema(&self) -> Result<()> {
        let statements = [
            format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema),
            format!(
                "CREATE TABLE IF NOT EXISTS {}.app_info (
                    app_id BIGSERIAL PRIMARY KEY,
                    app_url TEXT NOT NULL,
                    app_nickname TEXT NOT NULL,
                    active BOOLEAN NOT NULL DEFAULT TRUE,
                    deleted BOOLEAN NOT NULL DEFAULT FALSE,
                    count_scraped_comments BIGINT NOT NULL DEFAULT 0,
                    count_new_comments BIGINT NOT NULL DEFAULT 0,
                    last_update_comment_scraping DATE,
                    last_update_comment_scraping_jalali INTEGER,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.schema
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {}.comment (
                    comment_id BIGSERIAL PRIMARY KEY,
                    app_id BIGINT NOT NULL,
                    user_name TEXT NOT NULL,
                    comment_text TEXT NOT NULL,
                    comment_rating REAL,
                    comment_date DATE NOT NULL,
                    comment_date_jalali INTEGER,
                    natural_key TEXT NOT NULL UNIQUE,
                    second_model_processed BOOLEAN NOT NULL DEFAULT FALSE,
                    sentiment_result TEXT,
                    sentiment_score INTEGER,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
                self.schema
            ),
            format!(
                "ALTER TABLE {}.app_info ADD COLUMN IF NOT EXISTS last_update_comment_scraping_jalali INTEGER",
                self.schema
            ),
            format!(
                "ALTER TABLE {}.comment ADD COLUMN IF NOT EXISTS comment_date_jalali INTEGER",
                self.schema
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS comment_pending_idx
                 ON {}.comment (app_id) WHERE sentiment_score IS NULL",
                self.schema
            ),
        ];

        for statement in &statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context(format!("Failed to prepare schema: {}", self.schema))?;
        }

        debug!("Ensured schema exists: {}", self.schema);

        Ok(())
    }
}

#[async_trait]
impl CommentStore for PostgresCommentStore {
    async fn crawl_targets(&self, app_ids: &[i64]) -> Result<Vec<CrawlTarget>> {
        let query = format!(
            "SELECT app_id, app_url FROM {}.app_info
             WHERE app_id = ANY($1) AND active = TRUE AND deleted = FALSE
             ORDER BY app_id",
            self.schema
        );

        let rows: Vec<(i64, String)> = sqlx::query_as(&query)
            .bind(app_ids)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch apps to crawl")?;

        info!("Fetched {} apps to crawl", rows.len());

        Ok(rows.into_iter()
            .map(|(app_id, app_url)| CrawlTarget { app_id, app_url })
            .collect())
    }

    async fn upsert_comments(&self, comments: &[Comment]) -> Result<u64> {
        if comments.is_empty() {
            return Ok(0);
        }

        let query = format!(
            "INSERT INTO {}.comment
                (app_id, user_name, comment_text, comment_rating, comment_date, comment_date_jalali,
                 second_model_processed, natural_key)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (natural_key) DO NOTHING",
            self.schema
        );

        let mut tx = self.pool.begin().await
            .context("Failed to start transaction")?;
        let mut inserted = 0;

        for comment in comments {
            let result = sqlx::query(&query)
                .bind(comment.app_id)
                .bind(&comment.user_name)
                .bind(&comment.text)
                .bind(comment.rating)
                .bind(comment.date)
                .bind(JalaliDate::from(comment.date).as_number())
                .bind(comment.processed_by_secondary_model)
                .bind(comment.natural_key.as_str())
                .execute(&mut *tx)
                .await
                .context("Failed to insert comment")?;

            inserted += result.rows_affected();
        }

        tx.commit().await
            .context("Failed to commit comments")?;

        info!("Inserted {} new comments into the database", inserted);

        Ok(inserted)
    }

    async fn record_crawl(&self, summary: &CrawlSummary, crawled_on: NaiveDate) -> Result<()> {
        let query = format!(
            "UPDATE {}.app_info
             SET count_scraped_comments = $1, count_new_comments = $2,
                 last_update_comment_scraping = $3, last_update_comment_scraping_jalali = $4
             WHERE app_id = $5",
            self.schema
        );

        let result = sqlx::query(&query)
            .bind(summary.scraped as i64)
            .bind(summary.inserted as i64)
            .bind(crawled_on)
            .bind(JalaliDate::from(crawled_on).as_number())
            .bind(summary.app_id)
            .execute(&self.pool)
            .await
            .context("Failed to update app_info")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Unknown app_id {}", summary.app_id);
        }

        Ok(())
    }

    async fn pending_comments(&self, app_id: i64) -> Result<Vec<PendingComment>> {
        let query = format!(
            "SELECT natural_key, comment_text, comment_rating FROM {}.comment
             WHERE app_id = $1 AND sentiment_score IS NULL
             ORDER BY comment_id",
            self.schema
        );

        let rows: Vec<(String, String, Option<f32>)> = sqlx::query_as(&query)
            .bind(app_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch comments to analyze")?;

        Ok(rows.into_iter()
            .map(|(key, text, rating)| PendingComment {
                natural_key: NaturalKey::from(key),
                text,
                rating,
            })
            .collect())
    }

    async fn store_verdict(&self, key: &NaturalKey, verdict: &Verdict) -> Result<()> {
        let query = format!(
            "UPDATE {}.comment
             SET sentiment_result = $1, sentiment_score = $2, second_model_processed = $3
             WHERE natural_key = $4",
            self.schema
        );

        sqlx::query(&query)
            .bind(verdict.label.as_str())
            .bind(verdict.score)
            .bind(verdict.secondary_used)
            .bind(key.as_str())
            .execute(&self.pool)
            .await
            .context(format!("Failed to update sentiment for comment {}", key))?;

        Ok(())
    }

    async fn register_app(&self, app: &AppRegistration) -> Result<RegistrationOutcome> {
        let mut tx = self.pool.begin().await
            .context("Failed to start transaction")?;

        let existing: Option<(i64, bool)> = sqlx::query_as(&format!(
            "SELECT app_id, deleted FROM {}.app_info WHERE app_nickname = $1 FOR UPDATE",
            self.schema
        ))
        .bind(&app.nickname)
        .fetch_optional(&mut *tx)
        .await
        .context("Failed to look up app")?;

        let outcome = match existing {
            Some((app_id, true)) => {
                sqlx::query(&format!(
                    "UPDATE {}.app_info SET deleted = FALSE, active = TRUE, app_url = $1 WHERE app_id = $2",
                    self.schema
                ))
                .bind(&app.app_url)
                .bind(app_id)
                .execute(&mut *tx)
                .await
                .context("Failed to reactivate app")?;

                RegistrationOutcome::Reactivated { app_id }
            }
            Some((app_id, false)) => RegistrationOutcome::Duplicate { app_id },
            None => {
                let app_id: i64 = sqlx::query_scalar(&format!(
                    "INSERT INTO {}.app_info (app_url, app_nickname) VALUES ($1, $2) RETURNING app_id",
                    self.schema
                ))
                .bind(&app.app_url)
                .bind(&app.nickname)
                .fetch_one(&mut *tx)
                .await
                .context("Failed to insert app")?;

                RegistrationOutcome::Added { app_id }
            }
        };

        tx.commit().await
            .context("Failed to commit app registration")?;

        Ok(outcome)
    }
}
