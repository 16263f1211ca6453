use std::path::PathBuf;

use bytes::Bytes;
use futures::Stream;
use tokio::fs as async_fs;
use tokio::fs::File as AsyncFile;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{trace, warn};

use super::entry::{EntryMetadata, FileRef, CONTENT_RECORD};
use super::reader::AdaptiveReader;
use super::CacheStore;

/// Write-through adapter for streamed origin bodies.
///
/// While the adaptive reader drains the origin, every chunk is appended to a
/// temporary blob and simultaneously yielded downstream. The entry commits
/// only when the source ends normally; an error, an early drop, or a failed
/// blob write leaves the scope uncached and the client stream untouched.
/// An aborted blob stays on disk for operational cleanup.
pub struct StreamingCacheWriter {
    store: CacheStore,
    scope: String,
    metadata: EntryMetadata,
    blob_path: PathBuf,
    file: Option<AsyncFile>,
}

impl StreamingCacheWriter {
    /// Creates the temporary blob file. The origin body is attached later
    /// via [`drain`](Self::drain) so an open failure leaves the body free to
    /// be relayed uncached.
    pub async fn open(
        store: CacheStore,
        scope: String,
        metadata: EntryMetadata,
    ) -> std::io::Result<Self> {
        let blob_path = store.new_blob_path();
        let file = async_fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&blob_path)
            .await?;
        Ok(Self {
            store,
            scope,
            metadata,
            blob_path,
            file: Some(file),
        })
    }

    /// Relays `source` downstream chunk by chunk, committing the cache entry
    /// at end-of-stream.
    pub fn drain<R>(self, source: R) -> impl Stream<Item = std::io::Result<Bytes>> + Send
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let reader = AdaptiveReader::new(source);
        futures::stream::try_unfold((self, reader), |(mut writer, mut reader)| async move {
            match reader.next_chunk().await? {
                Some(chunk) => {
                    writer.append(&chunk).await;
                    Ok(Some((chunk, (writer, reader))))
                }
                None => {
                    writer.commit().await;
                    Ok(None)
                }
            }
        })
    }

    async fn append(&mut self, chunk: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        if let Err(err) = file.write_all(chunk).await {
            // Caching stops, the relay does not.
            warn!(
                scope = %self.scope,
                error = %err,
                "cache blob write failed; response continues uncached"
            );
            self.file = None;
        }
    }

    async fn commit(&mut self) {
        let Some(mut file) = self.file.take() else {
            return;
        };
        if let Err(err) = file.flush().await {
            warn!(scope = %self.scope, error = %err, "cache blob flush failed; entry not committed");
            return;
        }
        drop(file);

        let file_ref = FileRef {
            path: self.blob_path.clone(),
        };
        let payload = match file_ref.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "cache content record encoding failed");
                return;
            }
        };
        match self.store.set(&self.scope, CONTENT_RECORD, &payload).await {
            Ok(true) => {}
            Ok(false) => {
                // Lost the populate race; drop our blob so storage is not
                // charged twice for the same scope.
                async_fs::remove_file(&self.blob_path).await.ok();
                return;
            }
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "failed to commit streamed cache content");
                return;
            }
        }

        let metadata = self.metadata.clone().with_file(self.blob_path.clone());
        match self.store.set_metadata(&self.scope, &metadata).await {
            Ok(_) => trace!(scope = %self.scope, "committed streamed cache entry"),
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "failed to commit streamed cache metadata");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::entry::META_RECORD;
    use super::*;
    use anyhow::Result;
    use futures::StreamExt;
    use http::HeaderMap;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    /// Source that yields a prefix, then fails.
    struct FailingSource {
        prefix: Cursor<Bytes>,
    }

    impl AsyncRead for FailingSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let before = buf.filled().len();
            match Pin::new(&mut self.prefix).poll_read(cx, buf) {
                Poll::Ready(Ok(())) if buf.filled().len() == before => Poll::Ready(Err(
                    std::io::Error::new(std::io::ErrorKind::ConnectionReset, "origin went away"),
                )),
                other => other,
            }
        }
    }

    async fn collect(
        stream: impl Stream<Item = std::io::Result<Bytes>>,
    ) -> (Vec<u8>, Option<std::io::Error>) {
        futures::pin_mut!(stream);
        let mut collected = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => collected.extend_from_slice(&chunk),
                Err(err) => return (collected, Some(err)),
            }
        }
        (collected, None)
    }

    #[tokio::test]
    async fn commits_entry_at_end_of_stream() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path()).await?;

        let mut headers = HeaderMap::new();
        headers.insert("content-type", "image/png".parse()?);
        let payload = vec![42u8; 10_000];

        let writer = StreamingCacheWriter::open(
            store.clone(),
            "img".to_string(),
            EntryMetadata::new(&headers),
        )
        .await?;
        let (relayed, err) = collect(writer.drain(Cursor::new(Bytes::from(payload.clone())))).await;
        assert!(err.is_none());
        assert_eq!(relayed, payload, "caller must see every origin byte");

        assert!(store.has("img", META_RECORD).await);
        assert!(store.has("img", CONTENT_RECORD).await);

        let metadata = store.get_metadata("img").await?.unwrap();
        assert!(metadata.is_file_backed());
        assert_eq!(metadata.header("content-type"), Some("image/png"));

        let mut reader = store.open_stream("img", CONTENT_RECORD).await?.unwrap();
        let mut replayed = Vec::new();
        while let Some(chunk) = reader.next_chunk().await? {
            replayed.extend_from_slice(&chunk);
        }
        assert_eq!(replayed, payload);
        Ok(())
    }

    #[tokio::test]
    async fn source_error_aborts_without_commit() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path()).await?;

        let writer = StreamingCacheWriter::open(
            store.clone(),
            "broken".to_string(),
            EntryMetadata::new(&HeaderMap::new()),
        )
        .await?;
        let source = FailingSource {
            prefix: Cursor::new(Bytes::from(vec![1u8; 4096])),
        };
        let (relayed, err) = collect(writer.drain(source)).await;
        assert!(err.is_some(), "source failure must surface to the caller");
        assert!(!relayed.is_empty(), "prefix bytes were already relayed");

        assert!(!store.has("broken", META_RECORD).await);
        assert!(!store.has("broken", CONTENT_RECORD).await);
        Ok(())
    }

    #[tokio::test]
    async fn dropped_consumer_aborts_without_commit() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path()).await?;

        let writer = StreamingCacheWriter::open(
            store.clone(),
            "cancelled".to_string(),
            EntryMetadata::new(&HeaderMap::new()),
        )
        .await?;
        let stream = writer.drain(Cursor::new(Bytes::from(vec![9u8; 100_000])));
        futures::pin_mut!(stream);
        // Client disconnect: pull one chunk, then stop reading.
        let first = stream.next().await.unwrap()?;
        assert!(!first.is_empty());
        drop(stream);

        assert!(!store.has("cancelled", META_RECORD).await);
        assert!(!store.has("cancelled", CONTENT_RECORD).await);
        Ok(())
    }

    #[tokio::test]
    async fn losing_populate_race_removes_own_blob() -> Result<()> {
        let dir = TempDir::new()?;
        let store = CacheStore::open(dir.path()).await?;

        // Another worker already committed this scope.
        store.set("shared", CONTENT_RECORD, b"first-writer").await?;
        store
            .set_metadata("shared", &EntryMetadata::new(&HeaderMap::new()))
            .await?;

        let writer = StreamingCacheWriter::open(
            store.clone(),
            "shared".to_string(),
            EntryMetadata::new(&HeaderMap::new()),
        )
        .await?;
        let (relayed, err) = collect(writer.drain(Cursor::new(Bytes::from_static(b"loser")))).await;
        assert!(err.is_none());
        assert_eq!(relayed, b"loser");

        // First value retained, duplicate blob reclaimed.
        let value = store.get("shared", CONTENT_RECORD).await?.unwrap();
        assert_eq!(&value[..], b"first-writer");
        assert_eq!(store.blob_count().await, 0);
        Ok(())
    }
}
