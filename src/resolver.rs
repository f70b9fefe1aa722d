use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn, Span};

use crate::model::{CachePage, VideoSummary};
use crate::storage::Storage;
use crate::upstream::{SearchQuery, SearchResult, UpstreamError, VideoSource};

/// How a resolved page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Served from the cache within its freshness window.
    FreshCache,

    /// Fetched from the video API just now.
    LiveFetch,

    /// Served from the cache past its freshness window because the quota is exhausted.
    StaleFallback,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FreshCache => "fresh-cache",
            Self::LiveFetch => "live-fetch",
            Self::StaleFallback => "stale-fallback",
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::FreshCache | Self::StaleFallback)
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::StaleFallback)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPage {
    pub page: CachePage,
    pub outcome: Outcome,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("the video API quota is exhausted and nothing is cached for the channel `{channel_id}`")]
    QuotaExhausted { channel_id: String },

    #[error("could not fetch videos from the video API")]
    Upstream(#[source] UpstreamError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Answers feed requests from the cache or the video API, whichever is appropriate.
pub struct FeedResolver {
    storage: Arc<Storage>,
    source: Arc<dyn VideoSource>,
    page_size: u32,
}

impl FeedResolver {
    pub fn new(storage: Arc<Storage>, source: Arc<dyn VideoSource>, page_size: u32) -> Self {
        Self {
            storage,
            source,
            page_size,
        }
    }

    /// Returns the page of `channel_id`'s videos at `page_token`.
    ///
    /// A cached page younger than `max_age` is served without contacting the video API.
    /// Otherwise the page is fetched and cached; if the quota is exhausted, the cached page
    /// is served regardless of its age.
    #[instrument(level = "DEBUG", skip(self), fields(outcome))]
    pub async fn resolve(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
        max_age: Duration,
    ) -> Result<ResolvedPage, ResolveError> {
        let resolved = self.resolve_inner(channel_id, page_token, max_age).await?;
        Span::current().record("outcome", resolved.outcome.as_str());

        Ok(resolved)
    }

    async fn resolve_inner(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
        max_age: Duration,
    ) -> Result<ResolvedPage, ResolveError> {
        let now = OffsetDateTime::now_utc();

        if let Some(page) = self.cached_page(channel_id, page_token).await? {
            if page.is_fresh(now, max_age) {
                debug!(last_updated = %page.last_updated, "Serving a fresh cached page");

                return Ok(ResolvedPage {
                    page,
                    outcome: Outcome::FreshCache,
                });
            }

            debug!(last_updated = %page.last_updated, "The cached page is stale");
        }

        let query = SearchQuery {
            channel_id: channel_id.into(),
            page_token: page_token.map(Into::into),
            max_results: self.page_size,
        };

        match self.source.search_videos(&query).await {
            Ok(response) => {
                let received = response.items.len();
                let page = CachePage::new(
                    channel_id.into(),
                    page_token.map(Into::into),
                    normalize(response.items),
                    response.next_page_token,
                    response.prev_page_token,
                );

                let mut tx = self.storage.begin().await?;
                tx.put_cached_page(&page).await?;
                tx.commit().await?;

                info!(
                    "Retrieved {} videos ({} dropped)",
                    page.videos.len(),
                    received - page.videos.len(),
                );

                Ok(ResolvedPage {
                    page,
                    outcome: Outcome::LiveFetch,
                })
            }

            Err(UpstreamError::QuotaExhausted(reason)) => {
                warn!("The video API quota is exhausted ({reason}); falling back to the cache");

                match self.cached_page(channel_id, page_token).await? {
                    Some(page) => Ok(ResolvedPage {
                        page,
                        outcome: Outcome::StaleFallback,
                    }),

                    None => Err(ResolveError::QuotaExhausted {
                        channel_id: channel_id.into(),
                    }),
                }
            }

            Err(e) => Err(ResolveError::Upstream(e)),
        }
    }

    async fn cached_page(&self, channel_id: &str, page_token: Option<&str>) -> Result<Option<CachePage>> {
        let mut tx = self.storage.begin().await?;
        let page = tx.get_cached_page(channel_id, page_token).await?;
        tx.commit().await?;

        Ok(page)
    }
}

/// Converts search results into video summaries, preserving their order.
///
/// Results missing any required field, or with an unparseable publication date, are dropped.
fn normalize(items: Vec<SearchResult>) -> Vec<VideoSummary> {
    let mut videos = Vec::with_capacity(items.len());

    for (idx, item) in items.into_iter().enumerate() {
        let idx = idx + 1;

        let Some(id) = item.id.and_then(|id| id.video_id) else {
            warn!("Dropping search result #{idx}: no video id");
            continue;
        };
        let Some(snippet) = item.snippet else {
            warn!(%id, "Dropping search result #{idx}: no snippet");
            continue;
        };

        let thumbnail_url = snippet
            .thumbnails
            .and_then(|thumbnails| thumbnails.high)
            .and_then(|thumbnail| thumbnail.url);

        let (Some(title), Some(thumbnail_url), Some(published_at), Some(channel_title), Some(channel_id)) = (
            snippet.title,
            thumbnail_url,
            snippet.published_at,
            snippet.channel_title,
            snippet.channel_id,
        ) else {
            warn!(%id, "Dropping search result #{idx}: a required field is missing");
            continue;
        };

        let published_at = match OffsetDateTime::parse(&published_at, &Rfc3339) {
            Ok(published_at) => published_at,

            Err(e) => {
                warn!(
                    %id,
                    "Dropping search result #{idx}: could not parse the publication date \
                        `{published_at}`: {e}",
                );
                continue;
            }
        };

        videos.push(VideoSummary {
            id,
            title,
            thumbnail_url,
            published_at,
            channel_title,
            channel_id,
        });
    }

    videos
}
