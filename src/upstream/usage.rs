use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use http::Extensions;
use reqwest::{Request, Response, Url};
use reqwest_middleware::{Middleware, Next};
use tracing::{debug, warn};

use crate::storage::Storage;

/// Records every request answered by the video API in the usage ledger, along with its quota cost.
///
/// A failure to record is logged and does not affect the request.
pub struct QuotaUsage {
    storage: Arc<Storage>,
}

impl QuotaUsage {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    async fn record(&self, operation: &str) -> Result<()> {
        let mut tx = self.storage.begin().await?;
        tx.record_api_usage(operation, quota_cost(operation)).await?;
        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl Middleware for QuotaUsage {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let operation = operation_name(req.url());
        let started = Instant::now();
        let result = next.run(req, extensions).await;

        debug!(
            %operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            status = result.as_ref().ok().map(|response| response.status().as_u16()),
            "Sent a video API request",
        );

        // the API charges rejected requests too, but not ones that never reached it
        if result.is_ok() {
            if let Err(e) = self.record(&operation).await {
                warn!("Could not record the usage of `{operation}`: {e:#}");
            }
        }

        result
    }
}

/// Names the API operation a request URL invokes (e.g. `search.list`).
fn operation_name(url: &Url) -> String {
    let resource = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("unknown");

    format!("{resource}.list")
}

fn quota_cost(operation: &str) -> i64 {
    match operation {
        "search.list" => 100,
        _ => 1,
    }
}
