use rand::{thread_rng, Rng};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::cli::config::CrawlerSettings;

/// Human-like pacing for the "load more" loop
#[derive(Debug, Clone)]
pub struct BehaviorSimulator {
    /// Min and max delay before each click, in milliseconds
    pre_click_delay: (u64, u64),

    /// Fixed pause after each click, in milliseconds
    post_click_delay: u64,
}

impl BehaviorSimulator {
    /// Create a new behavior simulator from the crawler settings
    pub fn new(config: &CrawlerSettings) -> Self {
        Self {
            pre_click_delay: config.pre_click_delay_ms,
            post_click_delay: config.post_click_delay_ms,
        }
    }

    /// A simulator that never waits
    pub fn instant() -> Self {
        Self {
            pre_click_delay: (0, 0),
            post_click_delay: 0,
        }
    }

    /// Pick a delay uniformly inside `(min, max)`; a degenerate range yields `min`
    pub fn random_delay(range: (u64, u64)) -> Duration {
        let (min, max) = range;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(thread_rng().gen_range(min..=max))
    }

    /// Randomized pause before clicking, so clicks don't arrive at a fixed rate
    pub async fn pause_before_click(&self) {
        let delay = Self::random_delay(self.pre_click_delay);
        if !delay.is_zero() {
            debug!("Waiting {:?} before click", delay);
            sleep(delay).await;
        }
    }

    /// Let the next page of comments render
    pub async fn pause_after_click(&self) {
        if self.post_click_delay > 0 {
            sleep(Duration::from_millis(self.post_click_delay)).await;
        }
    }
}
