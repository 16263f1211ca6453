use http::header::X_FRAME_OPTIONS;
use http::{HeaderMap, HeaderValue};

/// Headers meaningful only for a single transport leg; never forwarded in
/// either direction.
pub const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-encoding",
];

/// Inbound headers dropped before the request is replayed at the origin.
pub const REQUEST_EXCLUDES: [&str; 4] = [
    "content-length",
    "if-modified-since",
    "if-none-match",
    "host",
];

/// Origin headers dropped on the buffered text path, where the body is
/// re-measured by the front-end after decoding.
pub const RESPONSE_EXCLUDES: [&str; 2] = ["content-length", "content-encoding"];

/// Copies `headers` minus the named entries. Names must be lowercase;
/// `HeaderName` rendering already is.
pub fn exclude(headers: &HeaderMap, names: &[&str]) -> HeaderMap {
    let mut filtered = HeaderMap::new();
    for (name, value) in headers.iter() {
        if names.contains(&name.as_str()) {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

pub fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    exclude(headers, &HOP_BY_HOP)
}

/// Restricts framing to the recorded referer, when one exists.
pub fn apply_frame_options(headers: &mut HeaderMap, referer: Option<&str>) {
    let Some(referer) = referer.filter(|value| !value.is_empty()) else {
        return;
    };
    if let Ok(value) = HeaderValue::from_str(&format!("ALLOW-FROM {referer}")) {
        headers.insert(X_FRAME_OPTIONS, value);
    }
}
