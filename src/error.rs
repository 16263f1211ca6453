use std::io;

use thiserror::Error;

/// Failures raised by the persistent cache store.
///
/// A vanished file behind a successful existence check is deliberately *not*
/// represented here: the store reports it as a miss (`Ok(None)`), because it
/// only means another process evicted the entry first.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A stored record could not be decoded. Recovered by the proxy by
    /// treating the entry as absent and refetching.
    #[error("cache record is corrupt: {0}")]
    Corrupt(String),

    /// Disk-level failure (permissions, disk full). A write failure never
    /// fails the request that produced the response being cached.
    #[error("cache I/O failure")]
    Io(#[from] io::Error),
}

/// Failures that prevent building a response at all.
///
/// Cache trouble is intentionally absent: a broken cache entry falls back to
/// a refetch, and a failed cache write still serves the origin response.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("origin unreachable")]
    OriginUnreachable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("failed to read origin response body")]
    OriginBody(#[source] io::Error),

    #[error("invalid request target '{0}'")]
    InvalidTarget(String),
}
