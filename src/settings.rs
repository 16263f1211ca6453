use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::cli::{Cli, LogFormat};
use crate::proxy::ContentClass;

fn default_listen() -> SocketAddr {
    ([127, 0, 0, 1], 8080).into()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

fn default_stream_cache_classes() -> Vec<ContentClass> {
    vec![ContentClass::Image]
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Address the front-end binds to.
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Base URL relative request targets are resolved against.
    pub upstream: Url,
    /// Root directory of the on-disk cache.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Streamed content classes that are committed to disk while relayed.
    #[serde(default = "default_stream_cache_classes")]
    pub stream_cache_classes: Vec<ContentClass>,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();
        match &cli.config {
            Some(path) => builder = builder.add_source(File::from(path.as_path())),
            None => {
                let default = Path::new("webcache.toml");
                if default.exists() {
                    builder = builder.add_source(File::from(default));
                }
            }
        }
        let config = builder
            .add_source(Environment::with_prefix("WEBCACHE").separator("__"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
