use std::collections::HashSet;

use http::header::{CONTENT_TYPE, TRANSFER_ENCODING};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Coarse content class of an origin response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContentClass {
    Text,
    Image,
    Media,
    ApplicationBinary,
    Other,
}

/// Pure, total classification of a response header set.
///
/// Unknown or absent content types default to [`ContentClass::Text`], so the
/// buffered path is always a valid fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub class: ContentClass,
    pub chunked: bool,
}

impl Classification {
    pub fn of(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .trim();
        let chunked = headers
            .get(TRANSFER_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("chunked"));
        Self {
            class: classify_content_type(content_type),
            chunked,
        }
    }

    pub fn is_text(&self) -> bool {
        self.class == ContentClass::Text
    }

    /// Whether the body must be relayed incrementally rather than buffered.
    pub fn must_stream(&self) -> bool {
        self.chunked
            || matches!(
                self.class,
                ContentClass::Image | ContentClass::Media | ContentClass::ApplicationBinary
            )
    }
}

fn classify_content_type(content_type: &str) -> ContentClass {
    if content_type.starts_with("image") {
        ContentClass::Image
    } else if content_type.starts_with("video/") || content_type.starts_with("audio/") {
        ContentClass::Media
    } else if content_type.starts_with("application/octet-stream")
        || content_type.starts_with("application/x-shockwave")
        || content_type.starts_with("font")
    {
        ContentClass::ApplicationBinary
    } else if is_text_type(content_type) {
        ContentClass::Text
    } else {
        ContentClass::Other
    }
}

fn is_text_type(content_type: &str) -> bool {
    if content_type.is_empty() {
        return true;
    }
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("text/")
        || lower.starts_with("application/javascript")
        || lower.starts_with("application/x-javascript")
        || lower.starts_with("application/xhtml")
        || lower.starts_with("application/vnd")
}

/// Which streamed content classes get committed to disk while they are
/// relayed. Everything else streams through without being persisted.
#[derive(Debug, Clone)]
pub struct StreamCachePolicy {
    classes: HashSet<ContentClass>,
}

impl Default for StreamCachePolicy {
    fn default() -> Self {
        Self::new([ContentClass::Image])
    }
}

impl StreamCachePolicy {
    pub fn new(classes: impl IntoIterator<Item = ContentClass>) -> Self {
        Self {
            classes: classes.into_iter().collect(),
        }
    }

    pub fn persist_as_file(&self, classification: &Classification) -> bool {
        self.classes.contains(&classification.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(content_type: Option<&str>, transfer_encoding: Option<&str>) -> HeaderMap {
        let mut map = HeaderMap::new();
        if let Some(value) = content_type {
            map.insert(CONTENT_TYPE, value.parse().unwrap());
        }
        if let Some(value) = transfer_encoding {
            map.insert(TRANSFER_ENCODING, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn missing_content_type_defaults_to_text() {
        let classification = Classification::of(&HeaderMap::new());
        assert_eq!(classification.class, ContentClass::Text);
        assert!(!classification.must_stream());
    }

    #[test]
    fn text_patterns() {
        for value in [
            "text/html; charset=utf-8",
            "text/css",
            "application/javascript",
            "application/x-javascript",
            "application/xhtml+xml",
            "application/vnd.api+json",
            "TEXT/HTML",
        ] {
            let classification = Classification::of(&headers(Some(value), None));
            assert_eq!(classification.class, ContentClass::Text, "{value}");
        }
    }

    #[test]
    fn image_media_and_binary_patterns() {
        let cases = [
            ("image/png", ContentClass::Image),
            ("image/svg+xml", ContentClass::Image),
            ("video/mp4", ContentClass::Media),
            ("audio/ogg", ContentClass::Media),
            ("application/octet-stream", ContentClass::ApplicationBinary),
            (
                "application/x-shockwave-flash",
                ContentClass::ApplicationBinary,
            ),
            ("font/woff2", ContentClass::ApplicationBinary),
            ("application/json", ContentClass::Other),
        ];
        for (value, expected) in cases {
            let classification = Classification::of(&headers(Some(value), None));
            assert_eq!(classification.class, expected, "{value}");
            assert_eq!(
                classification.must_stream(),
                expected != ContentClass::Text && expected != ContentClass::Other,
                "{value}"
            );
        }
    }

    #[test]
    fn chunked_transfer_forces_streaming() {
        let classification =
            Classification::of(&headers(Some("application/json"), Some("chunked")));
        assert_eq!(classification.class, ContentClass::Other);
        assert!(classification.chunked);
        assert!(classification.must_stream());
    }

    #[test]
    fn classification_is_deterministic() {
        let set = headers(Some("image/gif"), Some("chunked"));
        assert_eq!(Classification::of(&set), Classification::of(&set));
    }

    #[test]
    fn default_policy_persists_images_only() {
        let policy = StreamCachePolicy::default();
        let image = Classification::of(&headers(Some("image/png"), None));
        let media = Classification::of(&headers(Some("video/mp4"), None));
        let binary = Classification::of(&headers(Some("application/octet-stream"), None));
        assert!(policy.persist_as_file(&image));
        assert!(!policy.persist_as_file(&media));
        assert!(!policy.persist_as_file(&binary));
    }

    #[test]
    fn policy_can_be_widened() {
        let policy = StreamCachePolicy::new([ContentClass::Image, ContentClass::Media]);
        let media = Classification::of(&headers(Some("audio/flac"), None));
        assert!(policy.persist_as_file(&media));
    }
}
