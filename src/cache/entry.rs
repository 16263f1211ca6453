use std::io::{Read, Write};
use std::path::PathBuf;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Record name for the header/flag half of an entry.
pub const META_RECORD: &str = "meta";
/// Record name for the body half of an entry.
pub const CONTENT_RECORD: &str = "content";

/// Header/flag half of a cache entry.
///
/// `file_backed`/`file_path` must agree with the shape of the content
/// record: inline bytes when false, a [`FileRef`] when true.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    headers: Vec<(String, String)>,
    file_backed: bool,
    file_path: Option<PathBuf>,
}

impl EntryMetadata {
    pub fn new(headers: &HeaderMap) -> Self {
        Self {
            headers: headermap_to_vec(headers),
            file_backed: false,
            file_path: None,
        }
    }

    /// Marks the entry as backed by a content file at `path`.
    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_backed = true;
        self.file_path = Some(path);
        self
    }

    pub fn is_file_backed(&self) -> bool {
        self.file_backed
    }

    pub fn file_path(&self) -> Option<&PathBuf> {
        self.file_path.as_ref()
    }

    pub fn header_map(&self) -> HeaderMap {
        to_headermap(&self.headers)
    }

    /// Case-insensitive single-value lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(stored, _)| stored.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|err| CacheError::Corrupt(err.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(payload).map_err(|err| CacheError::Corrupt(err.to_string()))
    }
}

/// Content record of a file-backed entry: a pointer into the blob directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRef {
    pub path: PathBuf,
}

impl FileRef {
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(|err| CacheError::Corrupt(err.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CacheError> {
        serde_json::from_slice(payload).map_err(|err| CacheError::Corrupt(err.to_string()))
    }
}

// Records are written as compress(serialize(payload)); there is no leading
// compatibility marker, the format is not byte-compatible with prior caches.

pub(super) fn compress(payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    encoder.finish()
}

pub(super) fn decompress(raw: &[u8]) -> Result<Vec<u8>, CacheError> {
    let mut decoder = ZlibDecoder::new(raw);
    let mut payload = Vec::new();
    decoder
        .read_to_end(&mut payload)
        .map_err(|err| CacheError::Corrupt(format!("record decompression failed: {err}")))?;
    Ok(payload)
}

fn to_headermap(items: &[(String, String)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::from_str(value),
        ) {
            map.append(name, value);
        }
    }
    map
}

fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, String)> {
    let mut items = Vec::new();
    for (name, value) in map.iter() {
        if let Ok(value_str) = value.to_str() {
            items.push((name.as_str().to_string(), value_str.to_string()));
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_codec() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/html".parse().unwrap());
        headers.insert("referer", "http://example.com/".parse().unwrap());

        let metadata = EntryMetadata::new(&headers);
        let decoded = EntryMetadata::decode(&metadata.encode().unwrap()).unwrap();

        assert!(!decoded.is_file_backed());
        assert_eq!(decoded.header("Content-Type"), Some("text/html"));
        assert_eq!(decoded.header_map().len(), 2);
    }

    #[test]
    fn file_backed_metadata_carries_path() {
        let metadata =
            EntryMetadata::new(&HeaderMap::new()).with_file(PathBuf::from("/cache/blobs/x"));
        assert!(metadata.is_file_backed());
        assert_eq!(
            metadata.file_path(),
            Some(&PathBuf::from("/cache/blobs/x"))
        );
    }

    #[test]
    fn garbage_payload_is_reported_corrupt() {
        let err = EntryMetadata::decode(b"not json").unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }

    #[test]
    fn compression_round_trips() {
        let payload = b"<html>compressed cache payload</html>".repeat(16);
        let packed = compress(&payload).unwrap();
        assert_ne!(packed, payload);
        assert_eq!(decompress(&packed).unwrap(), payload);
    }

    #[test]
    fn truncated_record_is_corrupt() {
        let packed = compress(b"payload").unwrap();
        let err = decompress(&packed[..packed.len() / 2]).unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }
}
