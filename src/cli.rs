use clap::ValueHint;

use std::path::PathBuf;

#[derive(clap::Parser, Debug, Clone)]
#[command(version, about)]
pub struct Args {
    /// Path to the config file.
    ///
    /// By default, tubefeed looks for a file named `tubefeed.toml` in the following directories
    /// (in order):
    ///
    /// - `./` (the current directory)
    /// - `/etc`
    #[arg(
        short,
        env = "TUBEFEED_CONFIG",
        value_hint(ValueHint::FilePath)
    )]
    pub config_path: Option<PathBuf>,

    /// Feed API server address to bind to.
    #[arg(long, env = "TUBEFEED_BIND_ADDR")]
    pub bind_addr: Option<String>,

    /// Path to the database file.
    #[arg(long, env = "TUBEFEED_DB", value_hint(ValueHint::FilePath))]
    pub db_path: Option<PathBuf>,

    /// API key for the YouTube Data API.
    #[arg(long, env = "TUBEFEED_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

impl Args {
    pub fn parse() -> Self {
        clap::Parser::parse()
    }
}
