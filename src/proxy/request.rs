use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, Method, StatusCode};

/// Request descriptor handed to the core by the front-end.
#[derive(Debug)]
pub struct ProxyRequest {
    pub method: Method,
    /// Absolute URL, or path plus query to resolve against the upstream.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Response descriptor returned to the front-end: a complete body or a lazy
/// chunk sequence.
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

pub enum ResponseBody {
    Full(Bytes),
    Stream(ByteStream),
}

impl ProxyResponse {
    pub(crate) fn full(headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status: StatusCode::OK,
            headers,
            body: ResponseBody::Full(body),
        }
    }

    pub(crate) fn streamed(headers: HeaderMap, stream: ByteStream) -> Self {
        Self {
            status: StatusCode::OK,
            headers,
            body: ResponseBody::Stream(stream),
        }
    }
}

impl ResponseBody {
    /// Drains the body into memory. Intended for tests and small consumers;
    /// the front-end forwards streams without collecting them.
    pub async fn into_bytes(self) -> std::io::Result<Bytes> {
        use futures::TryStreamExt;

        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                let chunks: Vec<Bytes> = stream.try_collect().await?;
                Ok(Bytes::from(chunks.concat()))
            }
        }
    }

    pub fn is_streamed(&self) -> bool {
        matches!(self, ResponseBody::Stream(_))
    }
}
