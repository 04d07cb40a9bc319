//! Proxy state shared across handlers.

use std::sync::Arc;

use reqwest::Client;
use reqwest::redirect::Policy;

use crate::config::ProxyConfig;
use crate::credentials::{CookieTokenSource, TokenSource};
use crate::error::ProxyError;

use super::ratelimit::RangeRateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    /// Upstream client: no redirects, bounded timeouts.
    pub client: Client,
    pub tokens: Arc<dyn TokenSource>,
    pub limiter: RangeRateLimiter,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(config.upstream_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream client: {e}")))?;

        let tokens = Arc::new(CookieTokenSource::new(config.auth_cookie.clone()));
        let limiter = RangeRateLimiter::new(config.range_rate_per_sec, config.range_burst);

        Ok(Self {
            config: Arc::new(config),
            client,
            tokens,
            limiter,
        })
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }
}
