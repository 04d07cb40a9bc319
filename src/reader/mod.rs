//! Reader view controller.
//!
//! Drives one document-viewing attempt: fetch the access descriptor, classify it into
//! a [`ReaderState`], and for a readable document derive the proxy URL and build the
//! range transport. Retries are always user-initiated.

mod access;

pub use access::{AccessClient, AccessReply, HttpAccessClient};

use std::sync::Arc;

use reqwest::{StatusCode, Url};

use crate::credentials::AuthObserver;
use crate::descriptor::{
    BookSummary, ISSUED_AT_PARAM, SESSION_PARAM, StreamInfo, StreamSessionDescriptor,
    WATERMARK_PARAM, Watermark, signed_query,
};
use crate::error::{AccessError, TransportError};
use crate::proxy::stream_path;
use crate::transport::{RangeTransport, TransportOptions};

const SUBSCRIPTION_REQUIRED: &str = "An active subscription is required to read this book.";

/// What the reader can do from a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Retry,
    BackToLibrary,
}

/// State of one viewing attempt.
#[derive(Debug, Clone)]
pub enum ReaderState {
    Loading,
    /// Descriptor fetch failed at the transport level, or the reply had an unknown shape.
    Error { message: String },
    /// The caller has no entitlement.
    NoAccess { message: String },
    NotFound,
    /// Access granted but nothing playable.
    StreamUnavailable { message: String },
    Ready(ReadySession),
}

impl ReaderState {
    /// Next step offered to the reader. `None` while loading or reading.
    pub fn next_action(&self) -> Option<NextAction> {
        match self {
            Self::Loading | Self::Ready(_) => None,
            Self::Error { .. } | Self::StreamUnavailable { .. } => Some(NextAction::Retry),
            Self::NoAccess { .. } | Self::NotFound => Some(NextAction::BackToLibrary),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.next_action() == Some(NextAction::Retry)
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Error { .. } => "error",
            Self::NoAccess { .. } => "no_access",
            Self::NotFound => "not_found",
            Self::StreamUnavailable { .. } => "stream_unavailable",
            Self::Ready(_) => "ready",
        }
    }
}

/// Everything needed to render a readable document.
#[derive(Debug, Clone)]
pub struct ReadySession {
    pub book: BookSummary,
    pub descriptor: StreamSessionDescriptor,
    /// Proxy URL carrying only the forwarded session parameters.
    pub proxy_url: Url,
    pub watermark: Option<Watermark>,
}

impl ReadySession {
    /// Text overlaid on the rendered pages.
    pub fn watermark_text(&self) -> &str {
        match &self.watermark {
            Some(w) if !w.text.is_empty() => &w.text,
            _ => &self.descriptor.watermark_signature,
        }
    }

    /// Build the range transport for this session.
    pub fn open_transport(&self, options: TransportOptions) -> Result<RangeTransport, TransportError> {
        let options = if options.document_id.is_none() {
            options.with_document_id(self.book.id.to_string())
        } else {
            options
        };
        RangeTransport::new(&self.descriptor, self.proxy_url.clone(), options)
    }
}

/// Attach the signed URL's session parameters to the proxy's own route.
///
/// Only `sessionToken`, `watermark` and `issuedAt` survive; the backend host, path and
/// any other parameters never reach the rendering surface.
pub fn derive_proxy_url(app_url: &Url, book_id: u64, signed_url: &str) -> Option<Url> {
    let query = signed_query(signed_url);
    let mut url = app_url.join(&stream_path(book_id)).ok()?;
    {
        let mut pairs = url.query_pairs_mut();
        for param in [SESSION_PARAM, WATERMARK_PARAM, ISSUED_AT_PARAM] {
            if let Some(value) = query.get(param) {
                pairs.append_pair(param, value);
            }
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Some(url)
}

/// Map an access reply onto a state. Decided purely by the reply's shape.
pub fn classify(
    app_url: &Url,
    book_id: u64,
    result: Result<AccessReply, AccessError>,
) -> ReaderState {
    let reply = match result {
        Ok(reply) => reply,
        Err(err) => {
            return ReaderState::Error {
                message: err.to_string(),
            };
        }
    };
    let body = reply.body;

    if reply.status == StatusCode::NOT_FOUND {
        return ReaderState::NotFound;
    }

    if body.can_access == Some(false) || reply.status == StatusCode::FORBIDDEN {
        return ReaderState::NoAccess {
            message: body
                .message
                .unwrap_or_else(|| SUBSCRIPTION_REQUIRED.to_string()),
        };
    }

    if !body.success || !reply.status.is_success() {
        return ReaderState::Error {
            message: body
                .message
                .unwrap_or_else(|| format!("Unexpected response ({})", reply.status)),
        };
    }

    let Some(book) = body.book.clone() else {
        return ReaderState::NotFound;
    };

    let stream = match body.stream_info() {
        StreamInfo::Ready(stream) => stream,
        StreamInfo::Unavailable { message } => {
            return ReaderState::StreamUnavailable { message };
        }
    };

    let descriptor = StreamSessionDescriptor::from_stream(&stream, body.watermark.as_ref());
    if descriptor.session_token.is_empty() {
        return ReaderState::StreamUnavailable {
            message: "stream session token missing".to_string(),
        };
    }

    match derive_proxy_url(app_url, book_id, &stream.url) {
        Some(proxy_url) => ReaderState::Ready(ReadySession {
            book,
            descriptor,
            proxy_url,
            watermark: body.watermark,
        }),
        None => ReaderState::StreamUnavailable {
            message: "stream URL could not be mapped to the proxy".to_string(),
        },
    }
}

/// Controller for one document.
pub struct ReaderViewController {
    client: Arc<dyn AccessClient>,
    app_url: Url,
    book_id: u64,
    state: ReaderState,
    auth_observer: Option<Arc<dyn AuthObserver>>,
}

impl ReaderViewController {
    pub fn new(client: Arc<dyn AccessClient>, app_url: Url, book_id: u64) -> Self {
        Self {
            client,
            app_url,
            book_id,
            state: ReaderState::Loading,
            auth_observer: None,
        }
    }

    pub fn with_auth_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.auth_observer = Some(observer);
        self
    }

    pub fn book_id(&self) -> u64 {
        self.book_id
    }

    pub fn state(&self) -> &ReaderState {
        &self.state
    }

    /// Enter `Loading`, fetch the descriptor and settle into a terminal state.
    pub async fn load(&mut self) -> &ReaderState {
        self.state = ReaderState::Loading;
        let result = self.client.fetch_access(self.book_id).await;

        if let Err(AccessError::Unauthorized) = &result
            && let Some(observer) = &self.auth_observer
        {
            observer.on_auth_failure("access descriptor");
        }

        self.state = classify(&self.app_url, self.book_id, result);
        tracing::debug!(book_id = self.book_id, state = self.state.label(), "reader state settled");
        &self.state
    }

    /// Re-enter `Loading` from a retryable state. Other states are left untouched.
    pub async fn retry(&mut self) -> &ReaderState {
        if self.state.is_retryable() {
            return self.load().await;
        }
        &self.state
    }

    /// Take the ready session, if any.
    pub fn into_ready(self) -> Option<ReadySession> {
        match self.state {
            ReaderState::Ready(session) => Some(session),
            _ => None,
        }
    }
}
