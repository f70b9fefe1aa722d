use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ::time::OffsetDateTime;
use tokio::select;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::storage::Storage;

const QUOTA_REPORT_WINDOW: ::time::Duration = ::time::Duration::DAY;

/// Periodically deletes cache pages and usage records past their retention period.
pub struct Sweeper {
    storage: Arc<Storage>,
    purge_after: Duration,
    interval: Duration,
}

impl Sweeper {
    pub fn new(storage: Arc<Storage>, purge_after: Duration, interval: Duration) -> Self {
        Self {
            storage,
            purge_after,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                select! {
                    _ = cancel.cancelled() => {
                        debug!("Received a cancellation signal; exiting");
                        break;
                    }

                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.sweep(OffsetDateTime::now_utc()).await {
                    error!("Encountered a failure while purging the cache: {e:#}");
                }
            }

            Ok(())
        }
        .instrument(info_span!("sweeper"))
        .await
    }

    async fn sweep(&self, now: OffsetDateTime) -> Result<()> {
        let cutoff = now - self.purge_after;

        let mut tx = self.storage.begin().await?;
        let pages = tx.purge_cached_pages(cutoff).await?;
        let usage_records = tx.purge_api_usage(cutoff).await?;
        let quota_spent = tx.get_quota_spent_since(now - QUOTA_REPORT_WINDOW).await?;
        tx.commit().await?;

        info!(
            pages,
            usage_records,
            "Purged entries last updated before {cutoff}; \
                {quota_spent} quota units spent over the last day",
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CachePage;

    async fn put_page(storage: &Storage, page_token: Option<&str>, last_updated: OffsetDateTime) {
        let mut page = CachePage::new("UC1".into(), page_token.map(Into::into), vec![], None, None);
        page.last_updated = last_updated;

        let mut tx = storage.begin().await.unwrap();
        tx.put_cached_page(&page).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn sweep_purges_only_expired_pages() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let now = OffsetDateTime::now_utc();
        put_page(&storage, None, now - ::time::Duration::days(8)).await;
        put_page(&storage, Some("PAGE2"), now - ::time::Duration::days(2)).await;

        let sweeper = Sweeper::new(
            storage.clone(),
            Duration::from_secs(7 * 86400),
            Duration::from_secs(3600),
        );
        sweeper.sweep(now).await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        assert!(tx.get_cached_page("UC1", None).await.unwrap().is_none());
        assert!(tx.get_cached_page("UC1", Some("PAGE2")).await.unwrap().is_some());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let sweeper = Sweeper::new(storage, Duration::from_secs(60), Duration::from_secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();

        sweeper.run(cancel).await.unwrap();
    }
}
