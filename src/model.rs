use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;

use crate::identity::UserId;

/// A single upstream video, with every field the feed needs present.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub thumbnail_url: String,

    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,

    pub channel_title: String,
    pub channel_id: String,
}

/// The unit of caching: one upstream result page for a `(channel_id, page_token)` key.
///
/// `page_token` is `None` for the first page of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePage {
    pub channel_id: String,
    pub page_token: Option<String>,
    pub videos: Vec<VideoSummary>,
    pub next_page_token: Option<String>,
    pub prev_page_token: Option<String>,
    pub last_updated: OffsetDateTime,
}

impl CachePage {
    /// Creates a page stamped with the current time.
    pub fn new(
        channel_id: String,
        page_token: Option<String>,
        videos: Vec<VideoSummary>,
        next_page_token: Option<String>,
        prev_page_token: Option<String>,
    ) -> Self {
        Self {
            channel_id,
            page_token,
            videos,
            next_page_token,
            prev_page_token,
            last_updated: OffsetDateTime::now_utc(),
        }
    }

    /// Whether the page was updated less than `max_age` before `now`.
    pub fn is_fresh(&self, now: OffsetDateTime, max_age: Duration) -> bool {
        now - self.last_updated < max_age
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef {
    pub channel_id: String,
    pub owner_id: UserId,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub added: OffsetDateTime,
}
