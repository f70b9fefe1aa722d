use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::{ChannelRef, VideoSummary};
use crate::resolver::ResolvedPage;

/// The body of every failed request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "already_exists", message)
    }

    /// Details are logged by the caller, never returned.
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FeedResponse {
    pub videos: Vec<VideoSummary>,
    pub next_page_token: Option<String>,
    pub prev_page_token: Option<String>,
    pub is_cached: bool,
    pub is_expired: bool,
}

impl From<ResolvedPage> for FeedResponse {
    fn from(resolved: ResolvedPage) -> Self {
        let ResolvedPage { page, outcome } = resolved;

        Self {
            videos: page.videos,
            next_page_token: page.next_page_token,
            prev_page_token: page.prev_page_token,
            is_cached: outcome.is_cached(),
            is_expired: outcome.is_expired(),
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResponse {
    pub id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub added_at: OffsetDateTime,
}

impl From<ChannelRef> for ChannelResponse {
    fn from(channel: ChannelRef) -> Self {
        Self {
            id: channel.channel_id,
            title: channel.title,
            thumbnail_url: channel.thumbnail_url,
            added_at: channel.added,
        }
    }
}
