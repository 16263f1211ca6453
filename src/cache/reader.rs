use std::io::Cursor;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// First chunk request issued against a fresh source.
pub const INITIAL_CHUNK: usize = 1024;
/// Hard cap on a single chunk, 4 MiB.
pub const MAX_CHUNK: usize = 4 * 1024 * 1024;

const FAST_READ: Duration = Duration::from_millis(1);

/// Lazy, finite, non-restartable chunk sequence over a byte source.
///
/// Chunk sizes follow the observed throughput of the source: fast reads grow
/// the next request up to [`MAX_CHUNK`], slow reads shrink it, and the
/// sequence ends the first time a non-zero request reads zero bytes.
pub struct AdaptiveReader<R> {
    source: R,
    next_len: usize,
    done: bool,
}

impl<R: AsyncRead + Unpin> AdaptiveReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            next_len: INITIAL_CHUNK,
            done: false,
        }
    }

    /// Reads the next chunk, or `None` once the source is drained.
    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let want = self.next_len;
        let mut buf = vec![0u8; want];
        let started = Instant::now();
        let read = self.source.read(&mut buf).await?;
        let elapsed = started.elapsed();
        if read == 0 && want > 0 {
            self.done = true;
            return Ok(None);
        }
        self.next_len = best_block_size(elapsed, read);
        buf.truncate(read);
        Ok(Some(Bytes::from(buf)))
    }
}

impl<R: AsyncRead + Unpin + Send + 'static> AdaptiveReader<R> {
    /// Adapts the reader into a demand-pulled byte stream.
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
        futures::stream::try_unfold(self, |mut reader| async move {
            Ok(reader.next_chunk().await?.map(|chunk| (chunk, reader)))
        })
    }
}

/// Picks the next chunk size from the size and wall-clock cost of the last
/// read. Never below one byte, never above [`MAX_CHUNK`].
pub(crate) fn best_block_size(elapsed: Duration, bytes: usize) -> usize {
    let bytes = bytes as f64;
    let new_min = (bytes / 2.0).max(1.0);
    let new_max = (bytes * 2.0).max(1.0).min(MAX_CHUNK as f64);
    if elapsed < FAST_READ {
        return new_max as usize;
    }
    let rate = bytes / elapsed.as_secs_f64();
    if rate > new_max {
        new_max as usize
    } else if rate < new_min {
        new_min as usize
    } else {
        rate as usize
    }
}

/// Byte source behind [`CacheStore::open_stream`]: inline record bytes or a
/// file-backed content blob, read through the same adaptive loop.
///
/// [`CacheStore::open_stream`]: super::CacheStore::open_stream
pub enum ContentSource {
    Inline(Cursor<Bytes>),
    File(AsyncFile),
}

impl AsyncRead for ContentSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            ContentSource::Inline(cursor) => Pin::new(cursor).poll_read(cx, buf),
            ContentSource::File(file) => Pin::new(file).poll_read(cx, buf),
        }
    }
}
