pub mod classify;
pub mod headers;
pub mod key;
pub mod origin;
pub mod request;

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use http::header::REFERER;
use http::HeaderMap;
use tokio::io::AsyncReadExt;
use tracing::{trace, warn};
use url::Url;

use crate::cache::entry::{EntryMetadata, CONTENT_RECORD, META_RECORD};
use crate::cache::reader::AdaptiveReader;
use crate::cache::writer::StreamingCacheWriter;
use crate::cache::CacheStore;
use crate::error::{CacheError, ProxyError};

pub use classify::{Classification, ContentClass, StreamCachePolicy};
pub use key::ScopeKey;
pub use origin::{HttpOrigin, OriginClient, OriginRequest, OriginResponse};
pub use request::{ByteStream, ProxyRequest, ProxyResponse, ResponseBody};

/// Request/response orchestration: scope derivation, cache lookup, origin
/// fetch, classification, and write-through caching.
pub struct ProxyCore {
    cache: CacheStore,
    origin: Arc<dyn OriginClient>,
    upstream: Url,
    stream_policy: StreamCachePolicy,
}

impl ProxyCore {
    pub fn new(
        cache: CacheStore,
        origin: Arc<dyn OriginClient>,
        upstream: Url,
        stream_policy: StreamCachePolicy,
    ) -> Self {
        Self {
            cache,
            origin,
            upstream,
            stream_policy,
        }
    }

    pub async fn handle(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let url = key::canonical_url(&self.upstream, &request.target)?;
        let scope = ScopeKey::new(&request.method, &url);

        let present = self.cache.has(scope.id(), META_RECORD).await
            && self.cache.has(scope.id(), CONTENT_RECORD).await;
        if present {
            match self.respond_from_cache(&scope).await {
                Ok(response) => {
                    trace!(key = scope.key_base(), "cache hit");
                    return Ok(response);
                }
                Err(err) => {
                    // Unusable entry: recover by refetching, and take the
                    // bad records with the blob out of the store.
                    warn!(key = scope.key_base(), error = %err, "cache entry unusable; refetching");
                    if let Err(err) = self.cache.delete(scope.id()).await {
                        warn!(key = scope.key_base(), error = %err, "failed to delete bad cache entry");
                    }
                }
            }
        }

        trace!(key = scope.key_base(), "cache miss");
        self.respond_from_origin(&scope, request, url).await
    }

    async fn respond_from_cache(&self, scope: &ScopeKey) -> Result<ProxyResponse, CacheError> {
        let metadata = self
            .cache
            .get_metadata(scope.id())
            .await?
            .ok_or_else(|| CacheError::Corrupt("metadata record missing".into()))?;
        let stored_headers = metadata.header_map();
        let classification = Classification::of(&stored_headers);

        let body = if classification.is_text() {
            let content = self
                .cache
                .get(scope.id(), CONTENT_RECORD)
                .await?
                .ok_or_else(|| CacheError::Corrupt("content record missing".into()))?;
            ResponseBody::Full(content)
        } else {
            // Streams from the blob file or the inline bytes transparently.
            let reader = self
                .cache
                .open_stream(scope.id(), CONTENT_RECORD)
                .await?
                .ok_or_else(|| CacheError::Corrupt("content record missing".into()))?;
            ResponseBody::Stream(reader.into_stream().boxed())
        };

        let mut response_headers = stored_headers;
        headers::apply_frame_options(&mut response_headers, metadata.header("referer"));
        Ok(ProxyResponse {
            status: http::StatusCode::OK,
            headers: response_headers,
            body,
        })
    }

    async fn respond_from_origin(
        &self,
        scope: &ScopeKey,
        request: ProxyRequest,
        url: Url,
    ) -> Result<ProxyResponse, ProxyError> {
        let referer = request
            .headers
            .get(REFERER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let origin_response = self
            .origin
            .fetch(OriginRequest {
                method: request.method,
                url,
                headers: headers::exclude(&request.headers, &headers::REQUEST_EXCLUDES),
                body: request.body,
            })
            .await?;

        let classification = Classification::of(&origin_response.headers);
        trace!(
            key = scope.key_base(),
            class = ?classification.class,
            chunked = classification.chunked,
            "classified origin response"
        );

        if classification.is_text() {
            return self
                .buffered_response(scope, origin_response, referer)
                .await;
        }

        let outbound = headers::strip_hop_by_hop(&origin_response.headers);

        if self.stream_policy.persist_as_file(&classification) {
            let metadata = stored_metadata(&outbound, referer.as_deref());
            match StreamingCacheWriter::open(self.cache.clone(), scope.id().to_string(), metadata)
                .await
            {
                Ok(writer) => {
                    let mut response =
                        ProxyResponse::streamed(outbound, writer.drain(origin_response.body).boxed());
                    headers::apply_frame_options(&mut response.headers, referer.as_deref());
                    return Ok(response);
                }
                Err(err) => {
                    // A good response outranks the cache: relay uncached.
                    warn!(key = scope.key_base(), error = %err, "cache stream unavailable; relaying uncached");
                }
            }
        }

        let reader = AdaptiveReader::new(origin_response.body);
        let mut response = ProxyResponse::streamed(outbound, reader.into_stream().boxed());
        headers::apply_frame_options(&mut response.headers, referer.as_deref());
        Ok(response)
    }

    async fn buffered_response(
        &self,
        scope: &ScopeKey,
        origin_response: OriginResponse,
        referer: Option<String>,
    ) -> Result<ProxyResponse, ProxyError> {
        let mut body = Vec::new();
        let mut source = origin_response.body;
        source
            .read_to_end(&mut body)
            .await
            .map_err(ProxyError::OriginBody)?;
        let body = Bytes::from(body);

        let outbound = headers::exclude(
            &headers::strip_hop_by_hop(&origin_response.headers),
            &headers::RESPONSE_EXCLUDES,
        );

        let metadata = stored_metadata(&outbound, referer.as_deref());
        if let Err(err) = self.persist_buffered(scope, &metadata, &body).await {
            warn!(key = scope.key_base(), error = %err, "failed to cache buffered response");
        }

        let mut response = ProxyResponse::full(outbound, body);
        headers::apply_frame_options(&mut response.headers, referer.as_deref());
        Ok(response)
    }

    async fn persist_buffered(
        &self,
        scope: &ScopeKey,
        metadata: &EntryMetadata,
        body: &Bytes,
    ) -> Result<(), CacheError> {
        self.cache.set(scope.id(), CONTENT_RECORD, body).await?;
        self.cache.set_metadata(scope.id(), metadata).await?;
        Ok(())
    }
}

/// Metadata persisted for a scope: the outbound header set plus the inbound
/// referer, which the hit path needs to rebuild frame options.
fn stored_metadata(outbound: &HeaderMap, referer: Option<&str>) -> EntryMetadata {
    let mut stored = outbound.clone();
    if let Some(referer) = referer.filter(|value| !value.is_empty()) {
        if let Ok(value) = http::HeaderValue::from_str(referer) {
            stored.insert(REFERER, value);
        }
    }
    EntryMetadata::new(&stored)
}
