use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Result;
use axum::Json;
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::identity::Caller;
use crate::model::ChannelRef;
use crate::resolver::ResolveError;
use crate::server::convert_errors;
use crate::state::State as AppState;
use crate::upstream::UpstreamError;

use super::responses::{ApiError, ChannelResponse, FeedResponse};

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VideosQuery {
    channel_id: Option<String>,
    page_token: Option<String>,
}

pub async fn get_videos(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Query(query): Query<VideosQuery>,
) -> Result<Json<FeedResponse>, ApiError> {
    let channel_id = query
        .channel_id
        .filter(|channel_id| !channel_id.is_empty())
        .ok_or_else(|| ApiError::validation("the `channelId` parameter is required"))?;
    let page_token = query.page_token.filter(|page_token| !page_token.is_empty());

    let channel = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let channel = tx.get_channel(&caller, &channel_id).await?;
        tx.commit().await?;

        Ok(channel)
    })
    .await?;

    if channel.is_none() {
        return Err(ApiError::not_found(format!(
            "the channel `{channel_id}` is not in your list"
        )));
    }

    let resolved = state
        .resolver
        .resolve(
            &channel_id,
            page_token.as_deref(),
            state.cfg.cache.max_age.into(),
        )
        .await
        .map_err(resolve_error)?;

    Ok(Json(resolved.into()))
}

fn resolve_error(e: ResolveError) -> ApiError {
    match e {
        ResolveError::QuotaExhausted { channel_id } => {
            warn!(%channel_id, "The quota is exhausted and no cached videos are available");

            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "quota_exhausted",
                "the video API quota is exhausted and no cached videos are available",
            )
        }

        ResolveError::Upstream(e) => upstream_error(e),

        ResolveError::Storage(e) => {
            error!("Error occured while resolving a feed: {e:#}");

            ApiError::internal()
        }
    }
}

fn upstream_error(e: UpstreamError) -> ApiError {
    match e {
        UpstreamError::QuotaExhausted(reason) => {
            warn!("The video API quota is exhausted: {reason}");

            ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "quota_exhausted",
                "the video API quota is exhausted, try again later",
            )
        }

        UpstreamError::Other(e) => {
            error!("The video API request failed: {e:#}");

            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "upstream_failure",
                "could not fetch data from the video API",
            )
        }
    }
}

pub async fn get_channels(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Vec<ChannelResponse>>, ApiError> {
    let channels = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let channels = tx.get_channels(&caller).await?;
        tx.commit().await?;

        Ok(channels)
    })
    .await?;

    Ok(Json(channels.into_iter().map(Into::into).collect()))
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddChannelRequest {
    channel_id: Option<String>,
}

pub async fn add_channel(
    State(state): State<AppState>,
    Caller(caller): Caller,
    body: Result<Json<AddChannelRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ChannelResponse>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::validation(e.body_text()))?;
    let channel_id = body
        .channel_id
        .map(|channel_id| channel_id.trim().to_owned())
        .filter(|channel_id| !channel_id.is_empty())
        .ok_or_else(|| ApiError::validation("the `channelId` field is required"))?;

    let existing = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let channel = tx.get_channel(&caller, &channel_id).await?;
        tx.commit().await?;

        Ok(channel)
    })
    .await?;

    if existing.is_some() {
        return Err(ApiError::conflict(format!(
            "the channel `{channel_id}` is already in your list"
        )));
    }

    let details = match state.source.channel_details(&channel_id).await {
        Ok(Some(details)) => details,

        Ok(None) => {
            return Err(ApiError::not_found(format!(
                "the channel `{channel_id}` does not exist"
            )));
        }

        Err(e) => return Err(upstream_error(e)),
    };

    let channel = ChannelRef {
        channel_id: details.id,
        owner_id: caller,
        title: details.title,
        thumbnail_url: details.thumbnail_url,
        added: OffsetDateTime::now_utc(),
    };

    let added = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let added = tx.add_channel(&channel).await?;
        tx.commit().await?;

        Ok(added)
    })
    .await?;

    if !added {
        return Err(ApiError::conflict(format!(
            "the channel `{}` is already in your list",
            channel.channel_id
        )));
    }

    info!(owner = %channel.owner_id, channel_id = %channel.channel_id, "Added a channel");

    Ok((StatusCode::CREATED, Json(channel.into())))
}

pub async fn remove_channel(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(channel_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = convert_errors(async {
        let mut tx = state.storage.begin().await?;
        let removed = tx.remove_channel(&caller, &channel_id).await?;
        tx.commit().await?;

        Ok(removed)
    })
    .await?;

    if !removed {
        return Err(ApiError::not_found(format!(
            "the channel `{channel_id}` is not in your list"
        )));
    }

    info!(owner = %caller, %channel_id, "Removed a channel");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::identity::UserId;
    use crate::model::{CachePage, VideoSummary};
    use crate::resolver::tests::search_response;
    use crate::server::router;
    use crate::storage::Storage;
    use crate::upstream::{ChannelDetails, MockVideoSource};

    const ALICE: &str = "alice-token";
    const BOB: &str = "bob-token";

    async fn app(source: MockVideoSource) -> (Arc<Storage>, Router) {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let mut cfg = Config::default();
        cfg.tokens.insert(ALICE.into(), "alice".into());
        cfg.tokens.insert(BOB.into(), "bob".into());
        let state = AppState::with_source(cfg, storage.clone(), Arc::new(source));

        (storage, router(state))
    }

    async fn track(storage: &Storage, owner: &str, channel_id: &str) {
        let mut tx = storage.begin().await.unwrap();
        tx.add_channel(&ChannelRef {
            channel_id: channel_id.into(),
            owner_id: UserId::from(owner.to_owned()),
            title: format!("Channel {channel_id}"),
            thumbnail_url: None,
            added: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    async fn cache_stale_page(storage: &Storage, channel_id: &str) {
        let video = VideoSummary {
            id: "stale".into(),
            title: "Stale video".into(),
            thumbnail_url: "https://i.ytimg.com/vi/stale/hqdefault.jpg".into(),
            published_at: OffsetDateTime::now_utc() - time::Duration::days(3),
            channel_title: "Channel".into(),
            channel_id: channel_id.into(),
        };
        let mut page = CachePage::new(channel_id.into(), None, vec![video], None, None);
        page.last_updated = OffsetDateTime::now_utc() - time::Duration::hours(2);

        let mut tx = storage.begin().await.unwrap();
        tx.put_cached_page(&page).await.unwrap();
        tx.commit().await.unwrap();
    }

    fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),

            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        let body = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };

        (status, body)
    }

    #[tokio::test]
    async fn videos_require_authentication() {
        let (_, app) = app(MockVideoSource::new()).await;

        let (status, body) = send(&app, request(Method::GET, "/api/videos?channelId=UC1", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "unauthorized");

        let (status, _) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1", Some("forged"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn videos_require_a_channel_id() {
        let (_, app) = app(MockVideoSource::new()).await;

        for uri in ["/api/videos", "/api/videos?channelId="] {
            let (status, body) = send(&app, request(Method::GET, uri, Some(ALICE), None)).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], "validation_error");
        }
    }

    #[tokio::test]
    async fn videos_of_someone_elses_channel_are_not_found() {
        let mut source = MockVideoSource::new();
        source.expect_search_videos().times(0);
        let (storage, app) = app(source).await;
        track(&storage, "bob", "UC1").await;

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1", Some(ALICE), None),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn live_feed_is_returned_and_flagged_fresh() {
        let mut source = MockVideoSource::new();
        source
            .expect_search_videos()
            .withf(|query| query.channel_id == "UC1" && query.page_token.is_none())
            .times(1)
            .returning(|_| Ok(search_response(&["a", "b", "c"])));
        let (storage, app) = app(source).await;
        track(&storage, "alice", "UC1").await;

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1&pageToken=", Some(ALICE), None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isCached"], false);
        assert_eq!(body["isExpired"], false);
        assert_eq!(body["nextPageToken"], "NEXT");
        assert_eq!(body["prevPageToken"], Value::Null);
        assert_eq!(
            body["videos"][0],
            json!({
                "id": "a",
                "title": "Video a",
                "thumbnailUrl": "https://i.ytimg.com/vi/a/hqdefault.jpg",
                "publishedAt": "2024-10-01T08:30:00Z",
                "channelTitle": "Channel One",
                "channelId": "UC1",
            })
        );
        assert_eq!(body["videos"].as_array().unwrap().len(), 3);

        // the second request is served from the cache
        let (status, body) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1", Some(ALICE), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isCached"], true);
        assert_eq!(body["isExpired"], false);
        assert_eq!(body["videos"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn quota_exhaustion_serves_the_stale_page() {
        let mut source = MockVideoSource::new();
        source
            .expect_search_videos()
            .times(1)
            .returning(|_| Err(UpstreamError::QuotaExhausted("quotaExceeded".into())));
        let (storage, app) = app(source).await;
        track(&storage, "alice", "UC1").await;
        cache_stale_page(&storage, "UC1").await;

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1", Some(ALICE), None),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isCached"], true);
        assert_eq!(body["isExpired"], true);
        assert_eq!(body["videos"][0]["id"], "stale");
    }

    #[tokio::test]
    async fn quota_exhaustion_without_cache_is_a_structured_failure() {
        let mut source = MockVideoSource::new();
        source
            .expect_search_videos()
            .times(1)
            .returning(|_| Err(UpstreamError::QuotaExhausted("quotaExceeded".into())));
        let (storage, app) = app(source).await;
        track(&storage, "alice", "UC1").await;

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1", Some(ALICE), None),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "quota_exhausted");
        assert!(body.get("videos").is_none());
    }

    #[tokio::test]
    async fn transient_upstream_failure_is_not_masked_by_the_cache() {
        let mut source = MockVideoSource::new();
        source
            .expect_search_videos()
            .times(1)
            .returning(|_| Err(UpstreamError::Other(anyhow::anyhow!("connection refused"))));
        let (storage, app) = app(source).await;
        track(&storage, "alice", "UC1").await;
        cache_stale_page(&storage, "UC1").await;

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/videos?channelId=UC1", Some(ALICE), None),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "upstream_failure");
    }

    #[tokio::test]
    async fn channels_can_be_added_listed_and_removed() {
        let mut source = MockVideoSource::new();
        source
            .expect_channel_details()
            .withf(|channel_id| channel_id == "UC1")
            .times(1)
            .returning(|_| {
                Ok(Some(ChannelDetails {
                    id: "UC1".into(),
                    title: "Channel One".into(),
                    thumbnail_url: Some("https://yt3.ggpht.com/one".into()),
                }))
            });
        let (_, app) = app(source).await;

        let (status, body) = send(
            &app,
            request(Method::POST, "/api/channels", Some(ALICE), Some(json!({ "channelId": "UC1" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], "UC1");
        assert_eq!(body["title"], "Channel One");
        assert_eq!(body["thumbnailUrl"], "https://yt3.ggpht.com/one");

        // duplicates are rejected before spending any quota
        let (status, body) = send(
            &app,
            request(Method::POST, "/api/channels", Some(ALICE), Some(json!({ "channelId": "UC1" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "already_exists");

        let (status, body) = send(&app, request(Method::GET, "/api/channels", Some(ALICE), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["id"], "UC1");

        let (_, body) = send(&app, request(Method::GET, "/api/channels", Some(BOB), None)).await;
        assert_eq!(body, json!([]));

        let (status, _) = send(&app, request(Method::DELETE, "/api/channels/UC1", Some(BOB), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, request(Method::DELETE, "/api/channels/UC1", Some(ALICE), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);

        let (status, _) = send(&app, request(Method::DELETE, "/api/channels/UC1", Some(ALICE), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_channels_cannot_be_added() {
        let mut source = MockVideoSource::new();
        source
            .expect_channel_details()
            .times(1)
            .returning(|_| Ok(None));
        let (_, app) = app(source).await;

        let (status, body) = send(
            &app,
            request(Method::POST, "/api/channels", Some(ALICE), Some(json!({ "channelId": "UCnope" }))),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");
    }

    #[tokio::test]
    async fn malformed_channel_requests_are_rejected() {
        let mut source = MockVideoSource::new();
        source.expect_channel_details().times(0);
        let (_, app) = app(source).await;

        let (status, body) = send(
            &app,
            request(Method::POST, "/api/channels", Some(ALICE), Some(json!({ "channelId": "  " }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, body) = send(
            &app,
            request(Method::POST, "/api/channels", Some(ALICE), Some(json!([1, 2, 3]))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");

        let (status, _) = send(
            &app,
            request(Method::POST, "/api/channels", None, Some(json!({ "channelId": "UC1" }))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
