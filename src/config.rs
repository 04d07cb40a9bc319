//! Runtime configuration for the proxy and the reading client.

use std::time::Duration;

use reqwest::Url;

/// Upstream request bound for the proxy. Matches the reader's per-range patience.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Descriptor calls are cheap but may hit a cold backend.
pub const DEFAULT_DESCRIPTOR_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_RANGE_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_AUTH_COOKIE: &str = "token";
pub const DEFAULT_RANGE_RATE_PER_SEC: u32 = 20;
pub const DEFAULT_RANGE_BURST: u32 = 40;

/// Streaming proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Bind address (e.g., "127.0.0.1:3000").
    pub bind: String,
    /// Base URL of the backend API; upstream paths are joined onto it.
    pub backend_url: Url,
    /// Cookie carrying the reader's auth token.
    pub auth_cookie: String,
    pub upstream_timeout: Duration,
    pub connect_timeout: Duration,
    /// Sustained range requests per second allowed for one auth token.
    pub range_rate_per_sec: u32,
    pub range_burst: u32,
}

impl ProxyConfig {
    pub fn new(backend_url: Url) -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            backend_url: with_trailing_slash(backend_url),
            auth_cookie: DEFAULT_AUTH_COOKIE.to_string(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            range_rate_per_sec: DEFAULT_RANGE_RATE_PER_SEC,
            range_burst: DEFAULT_RANGE_BURST,
        }
    }
}

/// Reading client configuration.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Origin serving the streaming proxy routes.
    pub app_url: Url,
    /// Base URL of the backend API serving access descriptors.
    pub api_url: Url,
    /// Cookie the proxy expects the auth token in.
    pub auth_cookie: String,
    pub descriptor_timeout: Duration,
    pub range_timeout: Duration,
    /// Attempts per range on connect/timeout errors.
    pub max_retry: u32,
    /// Advisory scraping thresholds.
    pub suspicious_rate_per_sec: f64,
    pub suspicious_total: u64,
}

impl ReaderConfig {
    pub fn new(app_url: Url, api_url: Url) -> Self {
        Self {
            app_url,
            api_url: with_trailing_slash(api_url),
            auth_cookie: DEFAULT_AUTH_COOKIE.to_string(),
            descriptor_timeout: DEFAULT_DESCRIPTOR_TIMEOUT,
            range_timeout: DEFAULT_RANGE_TIMEOUT,
            max_retry: 3,
            suspicious_rate_per_sec: 10.0,
            suspicious_total: 100,
        }
    }
}

/// `Url::join` drops the last path segment unless the base ends with a slash.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
