pub mod cache;
pub mod cli;
pub mod error;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod settings;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cache::CacheStore;
use crate::proxy::{HttpOrigin, ProxyCore, StreamCachePolicy};
use crate::settings::Settings;

pub async fn run(settings: Settings) -> Result<()> {
    let cache = CacheStore::open(&settings.cache_dir).await?;
    let origin = Arc::new(HttpOrigin::new()?);
    let stream_policy = StreamCachePolicy::new(settings.stream_cache_classes.iter().copied());
    let core = Arc::new(ProxyCore::new(
        cache,
        origin,
        settings.upstream.clone(),
        stream_policy,
    ));

    info!(
        listen = %settings.listen,
        upstream = %settings.upstream,
        cache_dir = %settings.cache_dir.display(),
        "starting caching proxy"
    );
    server::serve(settings.listen, core).await
}
