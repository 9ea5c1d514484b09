use serde::{Deserialize, Serialize};
use url::Url;

use crate::storage::RegistrationOutcome;

/// Nickname callers pass when they want it derived from the URL
pub const UNKNOWN_NICKNAME: &str = "unknown";

/// Result of a URL registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationStatus {
    Valid,
    DeletedBack,
    Duplicate,
    HostError,
    UrlError,
    ConnectionError,
}

impl RegistrationStatus {
    /// Short code returned to RPC callers
    pub fn short_code(&self) -> &'static str {
        match self {
            Self::Valid => "Valid",
            Self::DeletedBack => "deleted-back",
            Self::Duplicate => "Duplicate",
            Self::HostError => "host-error",
            Self::UrlError => "url-error",
            Self::ConnectionError => "Connection-Error",
        }
    }
}

/// Status plus a human readable explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationReport {
    pub status: RegistrationStatus,
    pub message: String,
}

impl RegistrationReport {
    pub fn new(status: RegistrationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Describe what the app registry did with an app
    pub fn from_outcome(outcome: RegistrationOutcome, nickname: &str, app_url: &str) -> Self {
        match outcome {
            RegistrationOutcome::Added { app_id } => Self::new(
                RegistrationStatus::Valid,
                format!("New URL is added as app_id {}", app_id),
            ),
            RegistrationOutcome::Reactivated { app_id } => Self::new(
                RegistrationStatus::DeletedBack,
                format!("Deleted app reactivated as app_id {}", app_id),
            ),
            RegistrationOutcome::Duplicate { .. } => Self::new(
                RegistrationStatus::Duplicate,
                format!("Duplicate app. {} with {} exists. Try again to add another application", nickname, app_url),
            ),
        }
    }
}

/// Validate a marketplace URL and return its package name (last path segment).
///
/// URLs without a scheme are read as `http://`.
pub fn package_name(raw_url: &str, allowed_host: &str) -> Result<String, RegistrationReport> {
    let raw_url = raw_url.trim();
    let with_scheme = if raw_url.starts_with("http://") || raw_url.starts_with("https://") {
        raw_url.to_string()
    } else {
        format!("http://{}", raw_url)
    };

    let url = Url::parse(&with_scheme).map_err(|e| {
        RegistrationReport::new(RegistrationStatus::UrlError, format!("The {} is not a valid URL: {}", raw_url, e))
    })?;

    if url.host_str() != Some(allowed_host) {
        return Err(RegistrationReport::new(
            RegistrationStatus::HostError,
            format!("The {} is not related to {}. Please try again", raw_url, allowed_host),
        ));
    }

    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| {
            RegistrationReport::new(
                RegistrationStatus::UrlError,
                format!("The {} does not point to an app page", raw_url),
            )
        })
}
