//! Client configuration loaded from environment variables.
//!
//! Every setting has a default aimed at a back office running locally, so the
//! client starts with zero configuration during development.

use std::time::Duration;

use parlor_net::ConnectionConfig;
use parlor_shared::constants::{
    DEFAULT_JOB_POLL_MS, DEFAULT_RETRY_DELAYS_MS, DEFAULT_TOKEN_COOKIE, HISTORY_PAGE_SIZE,
};
use parlor_shared::types::TransportKind;
use url::Url;

use crate::error::ConfigError;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    /// Env: `PARLOR_API_URL`
    /// Default: `http://localhost:5000/api`
    pub api_url: String,

    /// URL of the chat hub.
    /// Env: `PARLOR_HUB_URL`
    /// Default: `http://localhost:5000/hubs/chat`
    pub hub_url: String,

    /// Username of the signed-in back-office user.
    /// Env: `PARLOR_USERNAME`
    /// Default: `admin`
    pub username: String,

    /// Token used to seed the cookie jar. Left unset when another component
    /// manages the cookie.
    /// Env: `PARLOR_TOKEN`
    pub token: Option<String>,

    /// Name of the cookie holding the bearer token.
    /// Env: `PARLOR_TOKEN_COOKIE`
    /// Default: `access_token`
    pub token_cookie: String,

    /// Env: `PARLOR_PAGE_SIZE`
    /// Default: `30`
    pub page_size: usize,

    /// Transports in preference order.
    /// Env: `PARLOR_TRANSPORTS` (comma separated)
    /// Default: `websockets,sse,longpolling`
    pub transports: Vec<TransportKind>,

    /// Reconnect schedule.
    /// Env: `PARLOR_RETRY_DELAYS_MS` (comma separated milliseconds)
    /// Default: `0,2000,10000,30000`
    pub retry_delays: Vec<Duration>,

    /// Env: `PARLOR_JOB_POLL_MS`
    /// Default: `3000`
    pub job_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            hub_url: "http://localhost:5000/hubs/chat".to_string(),
            username: "admin".to_string(),
            token: None,
            token_cookie: DEFAULT_TOKEN_COOKIE.to_string(),
            page_size: HISTORY_PAGE_SIZE,
            transports: TransportKind::PREFERENCE.to_vec(),
            retry_delays: DEFAULT_RETRY_DELAYS_MS
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            job_poll_interval: Duration::from_millis(DEFAULT_JOB_POLL_MS),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("PARLOR_API_URL") {
            match Url::parse(&url) {
                Ok(_) => config.api_url = url,
                Err(e) => tracing::warn!(value = %url, error = %e, "Invalid PARLOR_API_URL, using default"),
            }
        }

        if let Some(url) = lookup("PARLOR_HUB_URL") {
            match Url::parse(&url) {
                Ok(_) => config.hub_url = url,
                Err(e) => tracing::warn!(value = %url, error = %e, "Invalid PARLOR_HUB_URL, using default"),
            }
        }

        if let Some(username) = lookup("PARLOR_USERNAME") {
            if !username.trim().is_empty() {
                config.username = username.trim().to_string();
            }
        }

        if let Some(token) = lookup("PARLOR_TOKEN") {
            if !token.is_empty() {
                config.token = Some(token);
            }
        }

        if let Some(name) = lookup("PARLOR_TOKEN_COOKIE") {
            if !name.is_empty() {
                config.token_cookie = name;
            }
        }

        if let Some(val) = lookup("PARLOR_PAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid PARLOR_PAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("PARLOR_TRANSPORTS") {
            match parse_transports(&val) {
                Ok(kinds) => config.transports = kinds,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid PARLOR_TRANSPORTS, using default"),
            }
        }

        if let Some(val) = lookup("PARLOR_RETRY_DELAYS_MS") {
            match parse_delays(&val) {
                Ok(delays) => config.retry_delays = delays,
                Err(e) => tracing::warn!(value = %val, error = %e, "Invalid PARLOR_RETRY_DELAYS_MS, using default"),
            }
        }

        if let Some(val) = lookup("PARLOR_JOB_POLL_MS") {
            match val.parse::<u64>() {
                Ok(ms) if ms > 0 => config.job_poll_interval = Duration::from_millis(ms),
                _ => tracing::warn!(value = %val, "Invalid PARLOR_JOB_POLL_MS, using default"),
            }
        }

        config
    }

    pub fn api_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.api_url).map_err(|source| ConfigError::InvalidUrl {
            name: "PARLOR_API_URL",
            source,
        })
    }

    pub fn hub_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.hub_url).map_err(|source| ConfigError::InvalidUrl {
            name: "PARLOR_HUB_URL",
            source,
        })
    }

    /// Settings for the hub connection manager.
    pub fn connection(&self) -> Result<ConnectionConfig, ConfigError> {
        let mut connection = ConnectionConfig::new(self.hub_url()?);
        connection.transports = self.transports.clone();
        connection.retry_delays = self.retry_delays.clone();
        Ok(connection)
    }
}

fn parse_transports(value: &str) -> Result<Vec<TransportKind>, String> {
    let mut kinds = Vec::new();
    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
        let kind = part.parse::<TransportKind>().map_err(|e| e.to_string())?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    if kinds.is_empty() {
        return Err("no transport listed".to_string());
    }
    Ok(kinds)
}

fn parse_delays(value: &str) -> Result<Vec<Duration>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            p.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| format!("{p}: {e}"))
        })
        .collect()
}
