use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::analysis::{SentimentLabel, SentimentModel, Verdict};
use crate::crawler::retry::RetryPolicy;
use crate::storage::CommentStore;

/// Ratings at or below this corroborate a negative tie-break
const VERY_LOW_RATING: f32 = 1.0;

/// Ratings at or above this corroborate a positive tie-break
const VERY_HIGH_RATING: f32 = 5.0;

/// Counters for one app's analysis run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub app_id: i64,
    pub analyzed: usize,
    pub resolved_by_secondary: usize,
    pub failed: usize,
}

/// Labels comments with a primary model, using a secondary model as tie-breaker
pub struct SentimentAnalyzer {
    primary: Arc<dyn SentimentModel>,
    secondary: Arc<dyn SentimentModel>,
    retry: RetryPolicy,

    /// Pause between comments to respect the models' rate limits
    item_delay: Duration,
}

impl SentimentAnalyzer {
    pub fn new(
        primary: Arc<dyn SentimentModel>,
        secondary: Arc<dyn SentimentModel>,
        retry: RetryPolicy,
        item_delay: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            retry,
            item_delay,
        }
    }

    /// Ask a model for a label; a model that keeps failing counts as no sentiment
    async fn ask(&self, model: &dyn SentimentModel, name: &str, text: &str) -> SentimentLabel {
        match self.retry.run(name, || model.classify(text), |_| true).await {
            Ok(raw) => SentimentLabel::parse(&raw),
            Err(exhausted) => {
                error!("{} failed after {} attempts: {:#}", name, exhausted.attempts, exhausted.last_error);
                SentimentLabel::NoSentiment
            }
        }
    }

    /// Classify one comment.
    ///
    /// The secondary verdict only replaces an uninformative primary label when
    /// the comment's rating points the same way; otherwise the primary label stands.
    pub async fn classify(&self, text: &str, rating: Option<f32>) -> Verdict {
        let primary = self.ask(self.primary.as_ref(), "primary model", text).await;
        if !primary.is_uninformative() {
            return Verdict::new(primary, false);
        }

        debug!("Primary model was uninformative ({}), asking secondary model", primary);
        let secondary = self.ask(self.secondary.as_ref(), "secondary model", text).await;

        match rating {
            Some(rating) if secondary.is_negative() && rating <= VERY_LOW_RATING => {
                Verdict::new(SentimentLabel::Negative, true)
            }
            Some(rating) if secondary.is_positive() && rating >= VERY_HIGH_RATING => {
                Verdict::new(SentimentLabel::Positive, true)
            }
            _ => Verdict::new(primary, false),
        }
    }

    /// Label every comment of an app that has no verdict yet
    pub async fn analyze_app(&self, store: &dyn CommentStore, app_id: i64) -> Result<AnalysisSummary> {
        let pending = store.pending_comments(app_id).await
            .context(format!("Failed to fetch comments to analyze for app_id {}", app_id))?;

        info!("Analyzing {} comments for app_id {}", pending.len(), app_id);

        let mut summary = AnalysisSummary {
            app_id,
            ..Default::default()
        };

        for (index, comment) in pending.iter().enumerate() {
            if index > 0 && !self.item_delay.is_zero() {
                sleep(self.item_delay).await;
            }

            let verdict = self.classify(&comment.text, comment.rating).await;

            match store.store_verdict(&comment.natural_key, &verdict).await {
                Ok(()) => {
                    summary.analyzed += 1;
                    if verdict.secondary_used {
                        summary.resolved_by_secondary += 1;
                    }
                    debug!("Comment {} labelled {} ({})", comment.natural_key, verdict.label, verdict.score);
                }
                Err(e) => {
                    warn!("Failed to store sentiment for comment {}: {:#}", comment.natural_key, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}
