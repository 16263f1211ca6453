pub mod entry;
pub mod reader;
pub mod writer;

use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tracing::trace;
use uuid::Uuid;

use crate::error::CacheError;
use entry::{EntryMetadata, FileRef, CONTENT_RECORD, META_RECORD};
use reader::{AdaptiveReader, ContentSource};

/// Persistent key/value store for cache entries.
///
/// Each scope holds two records, [`META_RECORD`] and [`CONTENT_RECORD`],
/// written as compressed files under `records/`; large streamed bodies live
/// as standalone blobs under `blobs/` and are referenced by path.
///
/// `set` is add-if-absent: the first writer to commit a record wins, later
/// writers no-op. That is the store's only concurrency-control primitive.
#[derive(Debug, Clone)]
pub struct CacheStore {
    records_dir: PathBuf,
    blobs_dir: PathBuf,
}

impl CacheStore {
    pub async fn open(root: &Path) -> Result<Self, CacheError> {
        let store = Self {
            records_dir: root.join("records"),
            blobs_dir: root.join("blobs"),
        };
        async_fs::create_dir_all(&store.records_dir).await?;
        async_fs::create_dir_all(&store.blobs_dir).await?;
        Ok(store)
    }

    fn record_path(&self, scope: &str, name: &str) -> PathBuf {
        let shard = &scope[..scope.len().min(2)];
        self.records_dir.join(shard).join(format!("{scope}.{name}"))
    }

    /// Allocates a unique path in the blob directory for streamed content.
    pub(crate) fn new_blob_path(&self) -> PathBuf {
        self.blobs_dir.join(format!("tmp_{}", Uuid::new_v4()))
    }

    /// Existence check without reading content.
    pub async fn has(&self, scope: &str, name: &str) -> bool {
        async_fs::try_exists(&self.record_path(scope, name))
            .await
            .unwrap_or(false)
    }

    /// Reads a record. A file that vanished since the existence check is a
    /// miss, not an error; an undecodable record is [`CacheError::Corrupt`].
    pub async fn get(&self, scope: &str, name: &str) -> Result<Option<Bytes>, CacheError> {
        let path = self.record_path(scope, name);
        let raw = match async_fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(Bytes::from(entry::decompress(&raw)?)))
    }

    pub async fn get_metadata(&self, scope: &str) -> Result<Option<EntryMetadata>, CacheError> {
        match self.get(scope, META_RECORD).await? {
            Some(payload) => Ok(Some(EntryMetadata::decode(&payload)?)),
            None => Ok(None),
        }
    }

    /// Writes a record if absent. Returns whether this writer committed the
    /// value; `false` means a concurrent writer got there first and the call
    /// was a no-op.
    ///
    /// The record is fully written to a temporary sibling and hard-linked
    /// into place, so a concurrent reader can never observe a partial value.
    pub async fn set(&self, scope: &str, name: &str, payload: &[u8]) -> Result<bool, CacheError> {
        let final_path = self.record_path(scope, name);
        if let Some(parent) = final_path.parent() {
            async_fs::create_dir_all(parent).await?;
        }

        let temp_path = final_path.with_extension(format!("{name}.{}", Uuid::new_v4()));
        let packed = entry::compress(payload)?;
        let mut file = async_fs::File::create(&temp_path).await?;
        file.write_all(&packed).await?;
        file.flush().await?;
        drop(file);

        let committed = match async_fs::hard_link(&temp_path, &final_path).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                trace!(scope, name, "record already populated; keeping first value");
                false
            }
            Err(err) => {
                async_fs::remove_file(&temp_path).await.ok();
                return Err(err.into());
            }
        };
        async_fs::remove_file(&temp_path).await.ok();
        Ok(committed)
    }

    pub async fn set_metadata(
        &self,
        scope: &str,
        metadata: &EntryMetadata,
    ) -> Result<bool, CacheError> {
        self.set(scope, META_RECORD, &metadata.encode()?).await
    }

    /// Opens a lazy chunk reader over a record, transparently following the
    /// file reference when the entry is file-backed. `None` on any miss,
    /// including a blob that vanished underneath the metadata.
    pub async fn open_stream(
        &self,
        scope: &str,
        name: &str,
    ) -> Result<Option<AdaptiveReader<ContentSource>>, CacheError> {
        let Some(payload) = self.get(scope, name).await? else {
            return Ok(None);
        };

        let file_backed = name == CONTENT_RECORD
            && self
                .get_metadata(scope)
                .await?
                .is_some_and(|meta| meta.is_file_backed());

        let source = if file_backed {
            let file_ref = FileRef::decode(&payload)?;
            match async_fs::File::open(&file_ref.path).await {
                Ok(file) => ContentSource::File(file),
                Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            }
        } else {
            ContentSource::Inline(Cursor::new(payload))
        };
        Ok(Some(AdaptiveReader::new(source)))
    }

    /// Removes both records of a scope and, for file-backed entries, the
    /// content blob. Already-removed files are a benign race and ignored.
    pub async fn delete(&self, scope: &str) -> Result<(), CacheError> {
        if let Ok(Some(metadata)) = self.get_metadata(scope).await {
            if let Some(path) = metadata.file_path() {
                remove_if_present(path).await?;
            }
        }
        remove_if_present(&self.record_path(scope, META_RECORD)).await?;
        remove_if_present(&self.record_path(scope, CONTENT_RECORD)).await?;
        Ok(())
    }

    /// Drops every entry and empties the blob directory.
    pub async fn clear(&self) -> Result<(), CacheError> {
        for dir in [&self.records_dir, &self.blobs_dir] {
            match async_fs::remove_dir_all(dir).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
            async_fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) async fn blob_count(&self) -> usize {
        let mut count = 0;
        let mut entries = match async_fs::read_dir(&self.blobs_dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        while let Ok(Some(_)) = entries.next_entry().await {
            count += 1;
        }
        count
    }
}

async fn remove_if_present(path: &Path) -> Result<(), CacheError> {
    match async_fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}
