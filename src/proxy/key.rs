use http::Method;
use url::Url;

use crate::error::ProxyError;

/// Deterministic identifier for a cached request: a collision-resistant hash
/// of the method and the canonical absolute URL. Doubles as the cache
/// namespace and the population-race domain.
#[derive(Debug, Clone)]
pub struct ScopeKey {
    key_base: String,
    id: String,
}

impl ScopeKey {
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut canonical = url.clone();
        // Only GET requests are keyed by their query string.
        if *method != Method::GET {
            canonical.set_query(None);
        }
        let key_base = format!("{method}:{canonical}");
        let id = blake3::hash(key_base.as_bytes()).to_hex().to_string();
        Self { key_base, id }
    }

    /// Hex digest used as the store scope.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable identity, for logging.
    pub fn key_base(&self) -> &str {
        &self.key_base
    }
}

/// Resolves an inbound target (absolute URL, or path plus query) against the
/// configured upstream base.
pub fn canonical_url(upstream: &Url, target: &str) -> Result<Url, ProxyError> {
    Url::options()
        .base_url(Some(upstream))
        .parse(target)
        .map_err(|_| ProxyError::InvalidTarget(target.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> Url {
        Url::parse("http://origin.example:8080/").unwrap()
    }

    #[test]
    fn identical_requests_share_a_key() {
        let url = canonical_url(&upstream(), "/foo?x=1").unwrap();
        let a = ScopeKey::new(&Method::GET, &url);
        let b = ScopeKey::new(&Method::GET, &url);
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 64);
    }

    #[test]
    fn method_and_url_both_shape_the_key() {
        let url = canonical_url(&upstream(), "/foo").unwrap();
        let other = canonical_url(&upstream(), "/bar").unwrap();
        let get = ScopeKey::new(&Method::GET, &url);
        assert_ne!(get.id(), ScopeKey::new(&Method::POST, &url).id());
        assert_ne!(get.id(), ScopeKey::new(&Method::GET, &other).id());
    }

    #[test]
    fn query_only_keys_get_requests() {
        let url = canonical_url(&upstream(), "/foo?page=2").unwrap();
        let bare = canonical_url(&upstream(), "/foo").unwrap();

        assert_ne!(
            ScopeKey::new(&Method::GET, &url).id(),
            ScopeKey::new(&Method::GET, &bare).id()
        );
        assert_eq!(
            ScopeKey::new(&Method::POST, &url).id(),
            ScopeKey::new(&Method::POST, &bare).id()
        );
    }

    #[test]
    fn relative_targets_resolve_against_upstream() {
        let url = canonical_url(&upstream(), "/a/b?q=1").unwrap();
        assert_eq!(url.as_str(), "http://origin.example:8080/a/b?q=1");

        let absolute = canonical_url(&upstream(), "http://other.example/x").unwrap();
        assert_eq!(absolute.as_str(), "http://other.example/x");
    }

    #[test]
    fn garbage_target_is_rejected() {
        let err = canonical_url(&upstream(), "http://[broken").unwrap_err();
        assert!(matches!(err, ProxyError::InvalidTarget(_)));
    }
}
