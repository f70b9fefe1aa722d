use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::UpstreamConfig;
use crate::storage::Storage;

use super::{
    classify_failure, ChannelDetails, ChannelListResponse, QuotaUsage, SearchListResponse,
    SearchQuery, UpstreamError, VideoSource,
};

/// The largest page the search endpoint will return.
pub const MAX_PAGE_SIZE: u32 = 50;

/// A client of the YouTube Data API v3.
pub struct YouTubeClient {
    http_client: ClientWithMiddleware,
    base_url: Url,
    api_key: String,
    referer: Option<String>,
}

impl YouTubeClient {
    pub fn new(cfg: &UpstreamConfig, storage: Arc<Storage>) -> Result<Self> {
        let api_key = cfg
            .api_key
            .clone()
            .context("no API key for the video API was configured")?;
        let mut base_url = Url::parse(&cfg.base_url)
            .with_context(|| anyhow!("could not parse the video API URL `{}`", cfg.base_url))?;

        // endpoints are joined onto the base, which drops its last segment unless it is a directory
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let http_client = ClientBuilder::new(
            reqwest::Client::builder()
                .connect_timeout(cfg.connect_timeout.into())
                .timeout(cfg.timeout.into())
                .build()
                .context("could not create an HTTP client")?,
        )
        .with(QuotaUsage::new(storage))
        .build();

        debug!("Using the video API at {base_url}");

        Ok(Self {
            http_client,
            base_url,
            api_key,
            referer: cfg.referer.clone(),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        let url = self
            .base_url
            .join(endpoint)
            .with_context(|| anyhow!("could not build the URL of `{endpoint}`"))?;

        let mut request = self
            .http_client
            .get(url)
            .query(params)
            .query(&[("key", self.api_key.as_str())]);

        if let Some(referer) = &self.referer {
            request = request.header(header::REFERER, referer.as_str());
        }

        let response = request
            .send()
            .await
            .with_context(|| anyhow!("could not reach the video API endpoint `{endpoint}`"))?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();

            return Err(classify_failure(status, &body));
        }

        let result = response
            .json()
            .await
            .with_context(|| anyhow!("could not decode the response of `{endpoint}`"))?;

        Ok(result)
    }
}

#[async_trait]
impl VideoSource for YouTubeClient {
    #[instrument(level = "DEBUG", skip(self))]
    async fn search_videos(&self, query: &SearchQuery) -> Result<SearchListResponse, UpstreamError> {
        let max_results = query.max_results.clamp(1, MAX_PAGE_SIZE).to_string();
        let mut params = vec![
            ("part", "snippet"),
            ("channelId", query.channel_id.as_str()),
            ("order", "date"),
            ("type", "video"),
            ("maxResults", max_results.as_str()),
        ];

        if let Some(page_token) = &query.page_token {
            params.push(("pageToken", page_token.as_str()));
        }

        self.get("search", &params).await
    }

    #[instrument(level = "DEBUG", skip(self))]
    async fn channel_details(&self, channel_id: &str) -> Result<Option<ChannelDetails>, UpstreamError> {
        let response: ChannelListResponse = self
            .get("channels", &[("part", "snippet"), ("id", channel_id)])
            .await?;

        let details = response.items.into_iter().find_map(|channel| {
            let id = channel.id?;
            let snippet = channel.snippet?;
            let thumbnail_url = snippet
                .thumbnails
                .and_then(|thumbnails| thumbnails.default)
                .and_then(|thumbnail| thumbnail.url);

            Some(ChannelDetails {
                id,
                title: snippet.title?,
                thumbnail_url,
            })
        });

        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::http::{StatusCode, Uri};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use time::{Duration, OffsetDateTime};
    use tokio::net::TcpListener;

    use super::*;

    /// A local stand-in for the video API answering every request with a fixed response.
    struct StubApi {
        base_url: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubApi {
        async fn start(status: StatusCode, body: Value) -> Self {
            let requests = Arc::new(Mutex::new(Vec::new()));
            let app = Router::new().fallback({
                let requests = requests.clone();

                move |uri: Uri| async move {
                    requests.lock().unwrap().push(uri.to_string());

                    (status, Json(body))
                }
            });

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

            Self {
                // no trailing slash, so joining endpoints must keep the `v3` segment
                base_url: format!("http://{addr}/yt/v3"),
                requests,
            }
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn client(base_url: &str, storage: Arc<Storage>) -> YouTubeClient {
        let cfg = UpstreamConfig {
            base_url: base_url.to_owned(),
            api_key: Some("K".into()),
            ..Default::default()
        };

        YouTubeClient::new(&cfg, storage).unwrap()
    }

    async fn quota_spent(storage: &Storage) -> i64 {
        let mut tx = storage.begin().await.unwrap();
        let spent = tx
            .get_quota_spent_since(OffsetDateTime::now_utc() - Duration::minutes(1))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        spent
    }

    fn search(page_token: Option<&str>, max_results: u32) -> SearchQuery {
        SearchQuery {
            channel_id: "UC1".into(),
            page_token: page_token.map(Into::into),
            max_results,
        }
    }

    #[tokio::test]
    async fn search_sends_the_expected_query() {
        let api = StubApi::start(
            StatusCode::OK,
            json!({ "items": [], "nextPageToken": "NEXT" }),
        )
        .await;
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let client = client(&api.base_url, storage.clone());

        let response = client.search_videos(&search(None, 80)).await.unwrap();
        assert_eq!(response.next_page_token.as_deref(), Some("NEXT"));
        assert!(response.items.is_empty());

        client
            .search_videos(&search(Some("PAGE2"), 10))
            .await
            .unwrap();

        assert_eq!(
            api.requests(),
            vec![
                "/yt/v3/search?part=snippet&channelId=UC1&order=date&type=video&maxResults=50&key=K",
                "/yt/v3/search?part=snippet&channelId=UC1&order=date&type=video&maxResults=10&pageToken=PAGE2&key=K",
            ],
        );
        assert_eq!(quota_spent(&storage).await, 200);
    }

    #[tokio::test]
    async fn quota_rejection_is_classified_and_charged() {
        let api = StubApi::start(
            StatusCode::FORBIDDEN,
            json!({
                "error": {
                    "code": 403,
                    "message": "The request cannot be completed because you have exceeded your quota.",
                    "errors": [{ "reason": "quotaExceeded" }]
                }
            }),
        )
        .await;
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let client = client(&api.base_url, storage.clone());

        let err = client.search_videos(&search(None, 50)).await.unwrap_err();

        assert!(matches!(err, UpstreamError::QuotaExhausted(_)), "{err:?}");
        assert_eq!(quota_spent(&storage).await, 100);
    }

    #[tokio::test]
    async fn server_error_is_not_quota_exhaustion() {
        let api = StubApi::start(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": { "message": "Backend Error", "errors": [{ "reason": "backendError" }] } }),
        )
        .await;
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let client = client(&api.base_url, storage);

        let err = client.search_videos(&search(None, 50)).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Other(_)), "{err:?}");
    }

    #[tokio::test]
    async fn unknown_channel_is_none() {
        let api = StubApi::start(StatusCode::OK, json!({ "items": [] })).await;
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let client = client(&api.base_url, storage.clone());

        assert_eq!(client.channel_details("UC404").await.unwrap(), None);
        assert_eq!(api.requests(), vec!["/yt/v3/channels?part=snippet&id=UC404&key=K"]);
        assert_eq!(quota_spent(&storage).await, 1);
    }

    #[tokio::test]
    async fn known_channel_has_details() {
        let api = StubApi::start(
            StatusCode::OK,
            json!({
                "items": [{
                    "id": "UC1",
                    "snippet": {
                        "title": "Channel One",
                        "thumbnails": { "default": { "url": "https://img.example/uc1.jpg" } }
                    }
                }]
            }),
        )
        .await;
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let client = client(&api.base_url, storage);

        let details = client.channel_details("UC1").await.unwrap();

        assert_eq!(
            details,
            Some(ChannelDetails {
                id: "UC1".into(),
                title: "Channel One".into(),
                thumbnail_url: Some("https://img.example/uc1.jpg".into()),
            }),
        );
    }

    #[tokio::test]
    async fn unreachable_api_is_not_charged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let client = client(&format!("http://{addr}/yt/v3/"), storage.clone());

        let err = client.search_videos(&search(None, 50)).await.unwrap_err();

        assert!(matches!(err, UpstreamError::Other(_)), "{err:?}");
        assert_eq!(quota_spent(&storage).await, 0);
    }
}
