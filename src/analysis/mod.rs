pub mod analyzer;
pub mod model;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export common types
pub use analyzer::SentimentAnalyzer;
pub use model::{HttpSentimentModel, SentimentModel};

/// Sentiment categories produced by the classifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    VeryNegative,
    Negative,
    Neutral,
    Mixed,
    Positive,
    VeryPositive,
    NoSentiment,
}

impl SentimentLabel {
    /// Map a raw model label; anything unrecognized means "no sentiment expressed"
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "very negative" => Self::VeryNegative,
            "negative" => Self::Negative,
            "neutral" => Self::Neutral,
            "mixed" => Self::Mixed,
            "positive" => Self::Positive,
            "very positive" => Self::VeryPositive,
            _ => Self::NoSentiment,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryNegative => "very negative",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
            Self::Mixed => "mixed",
            Self::Positive => "positive",
            Self::VeryPositive => "very positive",
            Self::NoSentiment => "no sentiment expressed",
        }
    }

    pub fn score(&self) -> i32 {
        match self {
            Self::VeryNegative => -2,
            Self::Negative => -1,
            Self::Neutral | Self::Mixed | Self::NoSentiment => 0,
            Self::Positive => 1,
            Self::VeryPositive => 2,
        }
    }

    /// Labels that carry no usable signal and go to the tie-breaker
    pub fn is_uninformative(&self) -> bool {
        matches!(self, Self::Neutral | Self::Mixed | Self::NoSentiment)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative | Self::VeryNegative)
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive | Self::VeryPositive)
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final sentiment stored for a comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub label: SentimentLabel,
    pub score: i32,

    /// Whether the secondary model decided the label
    pub secondary_used: bool,
}

impl Verdict {
    pub fn new(label: SentimentLabel, secondary_used: bool) -> Self {
        Self {
            label,
            score: label.score(),
            secondary_used,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        assert_eq!(SentimentLabel::parse("Very Positive"), SentimentLabel::VeryPositive);
        assert_eq!(SentimentLabel::parse("NEGATIVE"), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::parse(" mixed "), SentimentLabel::Mixed);
        assert_eq!(SentimentLabel::parse("borderline"), SentimentLabel::NoSentiment);
        assert_eq!(SentimentLabel::parse(""), SentimentLabel::NoSentiment);
    }

    #[test]
    fn test_score_table() {
        assert_eq!(SentimentLabel::VeryNegative.score(), -2);
        assert_eq!(SentimentLabel::Negative.score(), -1);
        assert_eq!(SentimentLabel::Neutral.score(), 0);
        assert_eq!(SentimentLabel::Mixed.score(), 0);
        assert_eq!(SentimentLabel::NoSentiment.score(), 0);
        assert_eq!(SentimentLabel::Positive.score(), 1);
        assert_eq!(SentimentLabel::VeryPositive.score(), 2);
    }

    #[test]
    fn test_labels_round_trip_through_their_text() {
        for label in [
            SentimentLabel::VeryNegative,
            SentimentLabel::Negative,
            SentimentLabel::Neutral,
            SentimentLabel::Mixed,
            SentimentLabel::Positive,
            SentimentLabel::VeryPositive,
            SentimentLabel::NoSentiment,
        ] {
            assert_eq!(SentimentLabel::parse(label.as_str()), label);
        }
    }
}
