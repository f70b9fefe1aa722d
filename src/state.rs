use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::identity::Identity;
use crate::resolver::FeedResolver;
use crate::storage::Storage;
use crate::upstream::{VideoSource, YouTubeClient};

#[derive(Clone)]
pub struct State {
    pub storage: Arc<Storage>,
    pub cfg: Arc<Config>,
    pub source: Arc<dyn VideoSource>,
    pub resolver: Arc<FeedResolver>,
    pub identity: Arc<Identity>,
}

impl State {
    pub async fn new(cfg: Config) -> Result<Self> {
        let storage = Arc::new(Storage::new(&cfg.db_path).await?);
        let source = Arc::new(YouTubeClient::new(&cfg.upstream, storage.clone())?);

        Ok(Self::with_source(cfg, storage, source))
    }

    pub fn with_source(cfg: Config, storage: Arc<Storage>, source: Arc<dyn VideoSource>) -> Self {
        let resolver = Arc::new(FeedResolver::new(
            storage.clone(),
            source.clone(),
            cfg.cache.page_size,
        ));
        let identity = Arc::new(Identity::new(&cfg.tokens));

        State {
            storage,
            cfg: Arc::new(cfg),
            source,
            resolver,
            identity,
        }
    }
}
