//! Collaborator seams between the report pipeline and the YouTube services.
//!
//! The pipeline only talks to these traits; [`crate::analytics::sender::YouTubeSender`]
//! implements them over HTTP and the tests implement them with scripted fakes.

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

use crate::analytics::models::{MetricSet, VideoRef};

const RATE_LIMITED_MESSAGE: &str = "User Rate Limit Exceeded";
const QUOTA_EXHAUSTED_MESSAGE: &str = "Daily Limit Exceeded";
const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid Credentials";

/// Failure of a call to one of the collaborators, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("daily quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Classifies a failure message by the phrases the Google APIs use for each condition.
    pub(crate) fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if message.contains(RATE_LIMITED_MESSAGE) {
            ApiError::RateLimited(message)
        } else if message.contains(QUOTA_EXHAUSTED_MESSAGE) {
            ApiError::QuotaExhausted(message)
        } else if message.contains(INVALID_CREDENTIALS_MESSAGE) {
            ApiError::InvalidCredentials(message)
        } else {
            ApiError::Transport(message)
        }
    }

    /// Classifies an error response body.
    ///
    /// Google error bodies look like
    /// `{"error": {"code": 403, "message": "...", "errors": [{"message": "...", "reason": "..."}]}}`;
    /// the top-level message and every nested message are considered. Bodies that
    /// are not in that shape are classified on their raw text.
    pub(crate) fn from_error_body(status: u16, body: &str) -> Self {
        let messages = error_messages(body);
        let joined = if messages.is_empty() {
            if body.trim().is_empty() {
                format!("HTTP {status} with empty body")
            } else {
                format!("HTTP {status}: {}", body.trim())
            }
        } else {
            format!("HTTP {status}: {}", messages.join("; "))
        };
        Self::from_message(joined)
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        ApiError::Transport(error.to_string())
    }
}

fn error_messages(body: &str) -> Vec<String> {
    let json = serde_json::from_str::<Value>(body).unwrap_or_default();
    let Some(error) = json.get("error") else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    if let Some(message) = error.get("message").and_then(Value::as_str) {
        messages.push(message.to_string());
    }
    if let Some(errors) = error.get("errors").and_then(Value::as_array) {
        for nested in errors {
            if let Some(message) = nested.get("message").and_then(Value::as_str) {
                if !messages.iter().any(|m| m == message) {
                    messages.push(message.to_string());
                }
            }
        }
    }
    messages
}

/// A channel owned by the authenticated account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ChannelSummary {
    pub(crate) id: String,
    /// Playlist holding every upload of the channel, if the API reported one.
    pub(crate) uploads_playlist_id: Option<String>,
}

/// One page of a playlist listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct PlaylistPage {
    pub(crate) video_ids: Vec<String>,
    pub(crate) next_page_token: Option<String>,
}

/// Lists channels and their uploads.
pub(crate) trait VideoDirectory {
    fn list_owned_channels(&self) -> Result<Vec<ChannelSummary>, ApiError>;

    fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<PlaylistPage, ApiError>;
}

/// Runs a single-day metrics report for one video.
pub(crate) trait ReportSource: Sync {
    fn query_report(&self, video: &VideoRef, date: NaiveDate) -> Result<MetricSet, ApiError>;
}

/// Renews the access token used by the other collaborators.
pub(crate) trait CredentialProvider: Sync {
    fn refresh_access_token(&self) -> Result<(), ApiError>;
}
