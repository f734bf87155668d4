//! Origin allow-list for websocket upgrades.

use axum::http::{header, HeaderMap};
use std::collections::HashSet;

/// Accepted `Origin` header values.
///
/// Requests without an `Origin` header (or with an empty one) are not made by
/// browsers and are always accepted. Any other origin must be listed.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
}

impl OriginPolicy {
    pub fn new<I, T>(origins: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            allowed: origins
                .into_iter()
                .map(|o| o.into().trim_end_matches('/').to_string())
                .collect(),
        }
    }

    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        match origin.map(str::trim) {
            None | Some("") => true,
            Some(origin) => self.allowed.contains(origin.trim_end_matches('/')),
        }
    }

    /// Check the `Origin` header of an upgrade request.
    pub fn check(&self, headers: &HeaderMap) -> bool {
        match headers.get(header::ORIGIN) {
            None => true,
            Some(value) => value
                .to_str()
                .map(|origin| self.is_allowed(Some(origin)))
                .unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_or_empty_origin_is_accepted() {
        let policy = OriginPolicy::new(["https://app.example.com"]);
        assert!(policy.is_allowed(None));
        assert!(policy.is_allowed(Some("")));
        assert!(policy.check(&HeaderMap::new()));
    }

    #[test]
    fn listed_origins_only() {
        let policy = OriginPolicy::new(["https://app.example.com/"]);
        assert!(policy.is_allowed(Some("https://app.example.com")));
        assert!(!policy.is_allowed(Some("https://evil.example.com")));

        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, HeaderValue::from_static("https://evil.example.com"));
        assert!(!policy.check(&headers));
    }

    #[test]
    fn empty_policy_rejects_browser_origins() {
        let policy = OriginPolicy::default();
        assert!(!policy.is_allowed(Some("http://localhost:3000")));
        assert!(policy.is_allowed(None));
    }
}
