//! Credential sources and the auth-failure observer.
//!
//! Nothing here reads ambient state. Outbound callers receive a
//! [`CredentialProvider`], the proxy receives a [`TokenSource`], and whoever owns the
//! session registers an [`AuthObserver`] to hear about rejected credentials.

use axum::http::HeaderMap;
use axum::http::header::COOKIE;

/// Supplies the bearer token for outbound requests.
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Extracts the caller's auth token from an inbound request.
pub trait TokenSource: Send + Sync {
    fn token(&self, headers: &HeaderMap) -> Option<String>;
}

/// Reads the token from a named cookie.
#[derive(Debug, Clone)]
pub struct CookieTokenSource {
    cookie_name: String,
}

impl CookieTokenSource {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }
}

impl TokenSource for CookieTokenSource {
    fn token(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

/// Notified when a credential is rejected, so the session owner can log out.
pub trait AuthObserver: Send + Sync {
    fn on_auth_failure(&self, context: &str);
}

/// Observer that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuthObserver;

impl AuthObserver for LogAuthObserver {
    fn on_auth_failure(&self, context: &str) {
        tracing::warn!(context, "authentication rejected, session must sign in again");
    }
}
