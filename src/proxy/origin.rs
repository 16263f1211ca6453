use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use http::{HeaderMap, Method, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

use crate::error::ProxyError;

#[derive(Debug)]
pub struct OriginRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Raw origin response: header mapping plus an undrained body stream. The
/// caller decides whether to buffer or relay it.
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Box<dyn AsyncRead + Send + Unpin>,
}

/// The outbound HTTP capability the core depends on. Connection pooling,
/// TLS, and redirect following all live behind this seam.
#[async_trait]
pub trait OriginClient: Send + Sync {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, ProxyError>;
}

/// reqwest-backed origin client: streaming bodies, redirects followed, no
/// upstream proxy, transparent gzip/deflate decoding.
pub struct HttpOrigin {
    client: reqwest::Client,
}

impl HttpOrigin {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OriginClient for HttpOrigin {
    async fn fetch(&self, request: OriginRequest) -> Result<OriginResponse, ProxyError> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ProxyError::OriginUnreachable(Box::new(err)))?;

        let status = response.status();
        let headers = response.headers().clone();
        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other)
            .boxed();
        Ok(OriginResponse {
            status,
            headers,
            body: Box::new(StreamReader::new(stream)),
        })
    }
}
