mod usage;
mod youtube;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

pub use self::usage::QuotaUsage;
pub use self::youtube::{YouTubeClient, MAX_PAGE_SIZE};

/// Error reasons the video API reports when the caller has run out of quota.
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "dailyLimitExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("the video API quota is exhausted: {0}")]
    QuotaExhausted(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Parameters of a video search scoped to a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub channel_id: String,
    pub page_token: Option<String>,
    pub max_results: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDetails {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
}

/// A remote listing of channel videos.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Lists a channel's videos, newest first.
    async fn search_videos(&self, query: &SearchQuery) -> Result<SearchListResponse, UpstreamError>;

    /// Looks a channel up by its id. Returns `None` if the channel does not exist.
    async fn channel_details(&self, channel_id: &str) -> Result<Option<ChannelDetails>, UpstreamError>;
}

// Every field the API documents is treated as optional: an item may come back with any of
// them missing.

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchListResponse {
    #[serde(default)]
    pub items: Vec<SearchResult>,
    pub next_page_token: Option<String>,
    pub prev_page_token: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SearchResult {
    pub id: Option<ResourceId>,
    pub snippet: Option<Snippet>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    pub title: Option<String>,
    pub published_at: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Thumbnails {
    pub default: Option<Thumbnail>,
    pub high: Option<Thumbnail>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Thumbnail {
    pub url: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChannelListResponse {
    #[serde(default)]
    pub items: Vec<ChannelResource>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChannelResource {
    pub id: Option<String>,
    pub snippet: Option<ChannelSnippet>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChannelSnippet {
    pub title: Option<String>,
    pub thumbnails: Option<Thumbnails>,
}

#[derive(Deserialize, Debug, Default)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize, Debug, Default)]
struct ErrorBody {
    message: Option<String>,

    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize, Debug, Default)]
struct ErrorDetail {
    reason: Option<String>,
}

/// Turns a non-success response of the video API into an [`UpstreamError`].
///
/// A failure counts as quota exhaustion if the status is `429 Too Many Requests`, if any of
/// the reported reasons is a quota reason, or if the message mentions the quota.
pub fn classify_failure(status: StatusCode, body: &str) -> UpstreamError {
    let error = serde_json::from_str::<ErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error)
        .unwrap_or_default();
    let message = error
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_owned());

    let quota_reason = error
        .errors
        .iter()
        .filter_map(|detail| detail.reason.as_deref())
        .any(|reason| QUOTA_REASONS.contains(&reason));

    if status == StatusCode::TOO_MANY_REQUESTS
        || quota_reason
        || message.to_lowercase().contains("quota")
    {
        UpstreamError::QuotaExhausted(message)
    } else {
        UpstreamError::Other(anyhow::anyhow!(
            "the video API responded with {status}: {message}"
        ))
    }
}
