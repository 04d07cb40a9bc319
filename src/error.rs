//! Error types for the proxy, the range transport and the access client.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// JSON body returned by every failing proxy route.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Proxy error type. Every variant renders as `{success: false, message}`.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Neispravan ID knjige u zahtevu.")]
    InvalidBookId,

    #[error("ID knjige nedostaje.")]
    MissingBookId,

    #[error("Invalid {0} parameter.")]
    InvalidSessionParameter(&'static str),

    #[error("Authentication required.")]
    Unauthorized,

    #[error("Too many range requests for this session.")]
    RateLimited,

    #[error("Unable to reach the content server.")]
    Upstream(#[source] reqwest::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBookId | Self::MissingBookId | Self::InvalidSessionParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Result type for proxy handlers.
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Failure of a single range fetch on the client side.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session was aborted. Routine teardown, never shown to the reader.
    #[error("range request cancelled")]
    Cancelled,

    #[error("invalid range {begin}-{end} for document of {total} bytes")]
    InvalidRange { begin: u64, end: u64, total: u64 },

    #[error("proxy responded with status {status}")]
    Status { status: reqwest::StatusCode },

    #[error("authentication required")]
    Unauthorized,

    #[error("unexpected Content-Range {got:?} for offset {expected}")]
    ContentRangeMismatch { expected: u64, got: String },

    #[error("proxy returned {got} bytes, expected {expected}")]
    ShortBody { expected: usize, got: usize },

    #[error("max retries exceeded: {0}")]
    RetriesExhausted(#[source] reqwest::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid initial chunk: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failure while fetching the access descriptor.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Transport(String),

    #[error("malformed access response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AccessError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
