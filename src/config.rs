mod types;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use take_mut::take;
use tracing::{debug, info};

use crate::upstream::MAX_PAGE_SIZE;

pub use self::types::*;

fn default_bind_addr() -> String {
    Config::default().bind_addr
}

fn default_db_path() -> PathBuf {
    Config::default().db_path
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Bearer tokens issued by the identity provider, mapped to the user ids they belong to.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Config {
    pub fn update(&mut self, args: crate::cli::Args) {
        fn set_if_some<T>(dst: &mut T, v: Option<T>) {
            if let Some(v) = v {
                *dst = v;
            }
        }

        set_if_some(&mut self.bind_addr, args.bind_addr);
        set_if_some(&mut self.db_path, args.db_path);
        set_if_some(&mut self.upstream.api_key, args.api_key.map(Some));
    }

    pub fn resolve_relative_paths(&mut self, config_dir: impl AsRef<Path>) {
        let config_dir = config_dir.as_ref();

        // destructure everything so that new path-carrying fields are not missed.
        take(self, |this| {
            let Self {
                bind_addr,
                db_path,
                cache,
                upstream,
                tokens,
            } = this;

            Self {
                bind_addr,
                db_path: config_dir.join(db_path),
                cache,
                upstream,
                tokens,
            }
        })
    }

    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;

        if !(1..=MAX_PAGE_SIZE).contains(&cache.page_size) {
            bail!(
                "`cache.page-size` must be between 1 and {MAX_PAGE_SIZE}, got {}",
                cache.page_size
            );
        }

        if cache.max_age.is_zero() {
            bail!("`cache.max-age` must not be zero");
        }

        if cache.purge_interval.is_zero() {
            bail!("`cache.purge-interval` must not be zero");
        }

        if cache.purge_after < cache.max_age {
            bail!(
                "`cache.purge-after` ({}) must not be shorter than `cache.max-age` ({})",
                cache.purge_after,
                cache.max_age
            );
        }

        if self.upstream.connect_timeout.is_zero() {
            bail!("`upstream.connect-timeout` must not be zero");
        }

        if self.upstream.timeout.is_zero() {
            bail!("`upstream.timeout` must not be zero");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1:20655".into(),
            db_path: "./tubefeed.sqlite3".into(),
            cache: Default::default(),
            upstream: Default::default(),
            tokens: Default::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CacheConfig {
    /// How long a cached page is served without asking the video API again.
    pub max_age: Duration,

    /// The number of videos requested per page.
    pub page_size: u32,

    /// Cached pages older than this are deleted by the sweeper.
    pub purge_after: Duration,

    pub purge_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            page_size: MAX_PAGE_SIZE,
            purge_after: Duration::from_secs(7 * 86400),
            purge_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,

    /// Sent as the `Referer` header, for API keys restricted to a website.
    pub referer: Option<String>,

    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.googleapis.com/youtube/v3/".into(),
            api_key: None,
            referer: None,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

pub fn load(search_paths: &[PathBuf]) -> Result<Config> {
    for path in search_paths {
        debug!("Trying to load {}", path.display());

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,

            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(file = %path.display(), "File not found, skipping");
                continue;
            }

            Err(e) => {
                return Err(e)
                    .with_context(|| anyhow!("could not read a config file `{}`", path.display()));
            }
        };

        let mut cfg: Config = toml::from_str(&contents)
            .with_context(|| anyhow!("could not load the config file `{}`", path.display()))?;

        if let Some(parent) = path.parent() {
            cfg.resolve_relative_paths(parent);
        }

        info!("Loaded a config file `{}`", path.display());

        return Ok(cfg);
    }

    info!("Using the default config");

    Ok(Default::default())
}
