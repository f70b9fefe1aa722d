use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(FromRow, Debug, Clone)]
pub struct Channel {
    pub owner_id: String,
    pub channel_id: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub added: OffsetDateTime,
}

#[derive(FromRow, Debug, Clone)]
pub struct CachedPage {
    pub id: i64,
    pub channel_id: String,
    pub page_token: String,
    pub next_page_token: Option<String>,
    pub prev_page_token: Option<String>,
    pub last_updated: OffsetDateTime,
}

#[derive(FromRow, Debug, Clone)]
pub struct CachedVideo {
    pub video_id: String,
    pub title: String,
    pub thumbnail_url: String,
    pub published: OffsetDateTime,
    pub channel_title: String,
    pub channel_id: String,
}
