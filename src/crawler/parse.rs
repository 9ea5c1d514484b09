use chrono::NaiveDate;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::warn;
use url::Url;

use crate::crawler::error::CrawlError;
use crate::crawler::task::{Comment, NaturalKey, RawCommentItem};

/// Query parameter the marketplace uses to select the page language
const LOCALE_PARAM: &str = "l";

/// Rewrite a target URL so the page is served in the given locale.
///
/// Any existing locale parameter is dropped; other query parameters are kept.
pub fn localized_url(app_url: &str, locale: &str) -> String {
    let mut url = match Url::parse(app_url) {
        Ok(url) => url,
        Err(_) => {
            // Can't parse, strip the suffix the marketplace appends
            let base = app_url.split("?l=").next().unwrap_or(app_url);
            return format!("{}?{}={}", base, LOCALE_PARAM, locale);
        }
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != LOCALE_PARAM)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = url.query_pairs_mut();
        pairs.clear();
        pairs.extend_pairs(kept.iter());
        pairs.append_pair(LOCALE_PARAM, locale);
    }

    url.to_string()
}

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent pattern"))
}

/// Parse the width style of the rating fill bar ("width: 80%;") into stars.
///
/// Returns `None` when the style is missing, malformed or out of range.
pub fn parse_rating(style: Option<&str>) -> Option<f32> {
    let style = style?;
    let captures = percent_pattern().captures(style)?;
    let percent: f32 = captures.get(1)?.as_str().parse().ok()?;

    if !(0.0..=100.0).contains(&percent) {
        return None;
    }

    Some(percent / 20.0)
}

/// Parse the comment date if it matches `format`
pub fn parse_exact_date(raw: Option<&str>, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw?.trim(), format).ok()
}

/// Parse the comment date, falling back to `today` when it doesn't match `format`
pub fn parse_date(raw: Option<&str>, format: &str, today: NaiveDate) -> NaiveDate {
    parse_exact_date(raw, format).unwrap_or_else(|| {
        if let Some(raw) = raw {
            warn!("Unparseable comment date '{}', using {}", raw.trim(), today);
        }
        today
    })
}

/// Derive the deduplication key for a comment.
///
/// Without a site id the key hashes user, text and the parsed date. Dates that
/// did not parse are left out: relative text like "2 days ago" and the today
/// fallback both change between crawls.
pub fn natural_key(element_id: Option<&str>, user_name: &str, text: &str, date: Option<NaiveDate>) -> NaturalKey {
    if let Some(id) = element_id.map(str::trim).filter(|id| !id.is_empty()) {
        return NaturalKey::site(id);
    }

    let mut hasher = Sha256::new();
    hasher.update(user_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    if let Some(date) = date {
        hasher.update([0u8]);
        hasher.update(date.format("%Y-%m-%d").to_string().as_bytes());
    }

    NaturalKey::content(&hex::encode(hasher.finalize()))
}

/// Turn one scraped element into a comment.
///
/// Username and body are required; rating and date degrade to fallbacks.
pub fn extract_comment(
    app_id: i64,
    item: &RawCommentItem,
    date_format: &str,
    today: NaiveDate,
) -> Result<Comment, CrawlError> {
    let user_name = item.username.as_deref()
        .map(str::trim)
        .ok_or_else(|| CrawlError::Extraction("missing username".to_string()))?;

    let text = item.body.as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| CrawlError::Extraction("missing body".to_string()))?;

    let rating = parse_rating(item.rating_style.as_deref());
    if rating.is_none() {
        warn!("Unexpected rating style {:?}, storing unknown rating", item.rating_style);
    }

    let parsed_date = parse_exact_date(item.meta.as_deref(), date_format);
    let date = parse_date(item.meta.as_deref(), date_format, today);

    Ok(Comment {
        app_id,
        user_name: user_name.to_string(),
        text: text.to_string(),
        rating,
        date,
        natural_key: natural_key(item.element_id.as_deref(), user_name, text, parsed_date),
        processed_by_secondary_model: false,
    })
}
