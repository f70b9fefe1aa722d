pub mod entities;

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use time::OffsetDateTime;
use tracing::{debug, info, instrument, trace_span, Instrument, Span};

use crate::identity::UserId;
use crate::model::{CachePage, ChannelRef, VideoSummary};

use self::entities::{CachedPage, CachedVideo, Channel};

/// The `page_token` column value standing for the first page of a channel.
///
/// SQLite treats NULLs as distinct in unique constraints, so `None` cannot be stored as is.
const FIRST_PAGE_TOKEN: &str = "";

pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        let pool = SqlitePoolOptions::new()
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .create_if_missing(true),
            )
            .await
            .with_context(|| anyhow!("could not open a SQLite database `{}`", db_path.display()))?;
        info!("Using an SQLite database `{}`", db_path.display());

        Self::migrate(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// The pool is limited to a single connection that is never recycled: every new
    /// connection to `:memory:` would see an empty database of its own.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("could not parse the in-memory database URL")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("could not open an in-memory SQLite database")?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!()
            .run(&pool)
            .await
            .context("could not prepare a database schema")?;

        Ok(Self { pool })
    }

    pub async fn begin(&self) -> Result<Tx> {
        self.pool
            .begin()
            .await
            .context("could not begin a new DB transaction")
            .map(Tx)
    }
}

pub struct Tx(Transaction<'static, Sqlite>);

impl Tx {
    pub async fn commit(self) -> Result<()> {
        self.0
            .commit()
            .await
            .context("could not commit a DB transaction")
    }

    /// Looks up the page stored under the exact key, regardless of its age.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_cached_page(
        &mut self,
        channel_id: &str,
        page_token: Option<&str>,
    ) -> Result<Option<CachePage>> {
        let page: Option<CachedPage> = sqlx::query_as(
            "SELECT
              id,
              channel_id,
              page_token,
              next_page_token,
              prev_page_token,
              last_updated
            FROM cached_pages
            WHERE channel_id = ?1 AND page_token = ?2",
        )
        .bind(channel_id)
        .bind(page_token.unwrap_or(FIRST_PAGE_TOKEN))
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not retrieve a cached page")?;
        let Some(page) = page else {
            return Ok(None);
        };

        let videos: Vec<CachedVideo> = sqlx::query_as(
            "SELECT
              video_id,
              title,
              thumbnail_url,
              published,
              channel_title,
              channel_id
            FROM cached_videos
            WHERE page_id = ?1
            ORDER BY position ASC",
        )
        .bind(page.id)
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve cached videos")?;

        let videos = videos
            .into_iter()
            .map(|video| VideoSummary {
                id: video.video_id,
                title: video.title,
                thumbnail_url: video.thumbnail_url,
                published_at: video.published,
                channel_title: video.channel_title,
                channel_id: video.channel_id,
            })
            .collect();

        Ok(Some(CachePage {
            channel_id: page.channel_id,
            page_token: Some(page.page_token).filter(|token| token != FIRST_PAGE_TOKEN),
            videos,
            next_page_token: page.next_page_token,
            prev_page_token: page.prev_page_token,
            last_updated: page.last_updated,
        }))
    }

    /// Replaces whatever is stored under the page's key with `page`.
    #[instrument(
        level = "TRACE",
        skip(self, page),
        fields(
            channel_id = %page.channel_id,
            page_token = ?page.page_token,
            video_count = page.videos.len(),
            page_id = tracing::field::Empty,
        ),
    )]
    pub async fn put_cached_page(&mut self, page: &CachePage) -> Result<()> {
        let page_id: i64 = sqlx::query_scalar(
            "INSERT
            INTO cached_pages (
              channel_id,
              page_token,
              next_page_token,
              prev_page_token,
              last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (channel_id, page_token) DO UPDATE SET
              next_page_token = excluded.next_page_token,
              prev_page_token = excluded.prev_page_token,
              last_updated = excluded.last_updated
            RETURNING id",
        )
        .bind(&page.channel_id)
        .bind(page.page_token.as_deref().unwrap_or(FIRST_PAGE_TOKEN))
        .bind(&page.next_page_token)
        .bind(&page.prev_page_token)
        .bind(page.last_updated)
        .fetch_one(self.0.as_mut())
        .await
        .context("could not store a cached page")?;

        Span::current().record("page_id", page_id);

        sqlx::query("DELETE FROM cached_videos WHERE page_id = ?1")
            .bind(page_id)
            .execute(self.0.as_mut())
            .await
            .context("could not remove previously cached videos")?;

        for (position, video) in page.videos.iter().enumerate() {
            async {
                debug!(%video.id, %video.title, "Storing video");
                sqlx::query(
                    "INSERT
                    INTO cached_videos (
                      page_id,
                      position,
                      video_id,
                      title,
                      thumbnail_url,
                      published,
                      channel_title,
                      channel_id
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .bind(page_id)
                .bind(position as i64)
                .bind(&video.id)
                .bind(&video.title)
                .bind(&video.thumbnail_url)
                .bind(video.published_at)
                .bind(&video.channel_title)
                .bind(&video.channel_id)
                .execute(self.0.as_mut())
                .await
                .context("could not insert a cached video")
            }
            .instrument(trace_span!("insert_video", %position))
            .await?;
        }

        Ok(())
    }

    /// Deletes pages last updated before `older_than`, returning how many were removed.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn purge_cached_pages(&mut self, older_than: OffsetDateTime) -> Result<u64> {
        sqlx::query("DELETE FROM cached_pages WHERE julianday(last_updated) < julianday(?1)")
            .bind(older_than)
            .execute(self.0.as_mut())
            .await
            .map(|result| result.rows_affected())
            .context("could not purge cached pages")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_channels(&mut self, owner: &UserId) -> Result<Vec<ChannelRef>> {
        let channels: Vec<Channel> = sqlx::query_as(
            "SELECT owner_id, channel_id, title, thumbnail_url, added
            FROM channels
            WHERE owner_id = ?1
            ORDER BY id ASC",
        )
        .bind(owner.as_str())
        .fetch_all(self.0.as_mut())
        .await
        .context("could not retrieve the channel list")?;

        Ok(channels.into_iter().map(channel_ref).collect())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_channel(
        &mut self,
        owner: &UserId,
        channel_id: &str,
    ) -> Result<Option<ChannelRef>> {
        let channel: Option<Channel> = sqlx::query_as(
            "SELECT owner_id, channel_id, title, thumbnail_url, added
            FROM channels
            WHERE owner_id = ?1 AND channel_id = ?2",
        )
        .bind(owner.as_str())
        .bind(channel_id)
        .fetch_optional(self.0.as_mut())
        .await
        .context("could not retrieve a channel")?;

        Ok(channel.map(channel_ref))
    }

    /// Registers a channel for its owner.
    ///
    /// Returns `false` if the owner already tracks this channel.
    #[instrument(level = "TRACE", skip(self, channel), fields(owner = %channel.owner_id, channel_id = %channel.channel_id))]
    pub async fn add_channel(&mut self, channel: &ChannelRef) -> Result<bool> {
        sqlx::query(
            "INSERT
            INTO channels (owner_id, channel_id, title, thumbnail_url, added)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (owner_id, channel_id) DO NOTHING",
        )
        .bind(channel.owner_id.as_str())
        .bind(&channel.channel_id)
        .bind(&channel.title)
        .bind(&channel.thumbnail_url)
        .bind(channel.added)
        .execute(self.0.as_mut())
        .await
        .map(|result| result.rows_affected() > 0)
        .context("could not insert a channel")
    }

    /// Returns `false` if the owner did not track the channel.
    #[instrument(level = "TRACE", skip(self))]
    pub async fn remove_channel(&mut self, owner: &UserId, channel_id: &str) -> Result<bool> {
        sqlx::query("DELETE FROM channels WHERE owner_id = ?1 AND channel_id = ?2")
            .bind(owner.as_str())
            .bind(channel_id)
            .execute(self.0.as_mut())
            .await
            .map(|result| result.rows_affected() > 0)
            .context("could not delete a channel")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn record_api_usage(&mut self, operation: &str, quota_cost: i64) -> Result<()> {
        sqlx::query(
            "INSERT
            INTO api_usage (operation, quota_cost, recorded)
            VALUES (?1, ?2, ?3)",
        )
        .bind(operation)
        .bind(quota_cost)
        .bind(OffsetDateTime::now_utc())
        .execute(self.0.as_mut())
        .await
        .context("could not record API usage")?;

        Ok(())
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn get_quota_spent_since(&mut self, since: OffsetDateTime) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(quota_cost), 0)
            FROM api_usage
            WHERE julianday(recorded) >= julianday(?1)",
        )
        .bind(since)
        .fetch_one(self.0.as_mut())
        .await
        .context("could not compute the quota spent")
    }

    #[instrument(level = "TRACE", skip(self))]
    pub async fn purge_api_usage(&mut self, older_than: OffsetDateTime) -> Result<u64> {
        sqlx::query("DELETE FROM api_usage WHERE julianday(recorded) < julianday(?1)")
            .bind(older_than)
            .execute(self.0.as_mut())
            .await
            .map(|result| result.rows_affected())
            .context("could not purge API usage records")
    }
}

fn channel_ref(channel: Channel) -> ChannelRef {
    ChannelRef {
        channel_id: channel.channel_id,
        owner_id: channel.owner_id.into(),
        title: channel.title,
        thumbnail_url: channel.thumbnail_url,
        added: channel.added,
    }
}
