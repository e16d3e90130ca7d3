//! Bearer token retrieval.
//!
//! The token lives in the client-side cookie jar and may rotate at any time,
//! so providers are queried on every connect, reconnect and REST call rather
//! than caching the value.

use std::sync::{Arc, RwLock};

use reqwest::cookie::{CookieStore, Jar};
use tracing::debug;
use url::Url;

/// Source of the bearer token handed to the hub and the REST API.
pub trait TokenProvider: Send + Sync {
    /// Read the current token. `None` means the request goes out anonymous.
    fn access_token(&self) -> Option<String>;
}

/// Reads the token from a named cookie in a shared cookie jar.
#[derive(Clone)]
pub struct CookieTokenProvider {
    jar: Arc<Jar>,
    origin: Url,
    cookie_name: String,
}

impl CookieTokenProvider {
    pub fn new(jar: Arc<Jar>, origin: Url, cookie_name: impl Into<String>) -> Self {
        Self {
            jar,
            origin,
            cookie_name: cookie_name.into(),
        }
    }
}

impl TokenProvider for CookieTokenProvider {
    fn access_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.origin)?;
        let header = header.to_str().ok()?;
        let token = find_cookie(header, &self.cookie_name);
        if token.is_none() {
            debug!(cookie = %self.cookie_name, "No token cookie in jar");
        }
        token
    }
}

/// Token held in memory, replaceable at runtime.
#[derive(Default)]
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }
}

impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }
}

/// Find `name` in a `Cookie` header value (`a=1; b=2`).
fn find_cookie(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_cookie() {
        let header = "theme=dark; access_token=abc.def; lang=fr";
        assert_eq!(find_cookie(header, "access_token").as_deref(), Some("abc.def"));
        assert_eq!(find_cookie(header, "missing"), None);
        assert_eq!(find_cookie("access_token=", "access_token"), None);
    }

    #[test]
    fn test_cookie_provider_reads_fresh_value() {
        let origin: Url = "http://localhost:5000/".parse().unwrap();
        let jar = Arc::new(Jar::default());
        let provider = CookieTokenProvider::new(jar.clone(), origin.clone(), "access_token");

        assert_eq!(provider.access_token(), None);

        jar.add_cookie_str("access_token=first; Path=/", &origin);
        assert_eq!(provider.access_token().as_deref(), Some("first"));

        jar.add_cookie_str("access_token=rotated; Path=/", &origin);
        assert_eq!(provider.access_token().as_deref(), Some("rotated"));
    }

    #[test]
    fn test_static_provider_swap() {
        let provider = StaticTokenProvider::new(Some("one".into()));
        assert_eq!(provider.access_token().as_deref(), Some("one"));
        provider.set(None);
        assert_eq!(provider.access_token(), None);
    }
}
