//! Client-side range transport.
//!
//! [`RangeTransport`] is the I/O backend handed to a rendering engine. It starts with
//! the inline initial chunk and the document length from the session descriptor, then
//! fetches byte ranges through the streaming proxy as the engine asks for them.
//!
//! ## Delivery
//!
//! Ranges may be requested and may complete in any order. Every chunk is delivered to
//! [`RangeListener::on_data_range`] tagged with its starting offset.
//!
//! ## Cancellation
//!
//! One [`CancellationToken`] per transport is shared by all in-flight requests.
//! [`RangeTransport::abort`] cancels it; cancelled requests resolve quietly and never
//! reach [`RangeListener::on_range_error`].

mod fetch;
mod monitor;
pub mod purge;

pub use fetch::ProxyRangeFetcher;
pub use monitor::{RequestMonitor, RequestSample};
pub use purge::{
    ArtifactMatcher, ArtifactStore, DirectoryArtifactStore, MemoryArtifactStore,
    purge_session_artifacts,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::config::ReaderConfig;
use crate::credentials::{AuthObserver, CredentialProvider, StaticCredentials};
use crate::descriptor::{RangeRequest, StreamSessionDescriptor};
use crate::error::TransportError;
use crate::io::ReadAt;

/// Callbacks of the rendering engine.
pub trait RangeListener: Send + Sync {
    /// Bytes for `[begin, begin + chunk.len())` arrived.
    fn on_data_range(&self, begin: u64, chunk: &Bytes);

    fn on_range_error(&self, begin: u64, error: &TransportError) {
        tracing::warn!(begin, error = %error, "range request failed");
    }

    fn on_progress(&self, _loaded: u64, _total: u64) {}
}

/// Listener that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl RangeListener for NoopListener {
    fn on_data_range(&self, _begin: u64, _chunk: &Bytes) {}
}

/// Construction options for [`RangeTransport`].
#[derive(Clone)]
pub struct TransportOptions {
    pub credentials: Arc<dyn CredentialProvider>,
    pub listener: Arc<dyn RangeListener>,
    pub auth_observer: Option<Arc<dyn AuthObserver>>,
    /// Also send the bearer token as this cookie, as a browser would.
    pub auth_cookie: Option<String>,
    pub artifact_stores: Vec<Arc<dyn ArtifactStore>>,
    /// Document id used by the purge predicate.
    pub document_id: Option<String>,
    pub timeout: Duration,
    pub max_retry: u32,
    pub suspicious_rate_per_sec: f64,
    pub suspicious_total: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            credentials: Arc::new(StaticCredentials::anonymous()),
            listener: Arc::new(NoopListener),
            auth_observer: None,
            auth_cookie: None,
            artifact_stores: Vec::new(),
            document_id: None,
            timeout: crate::config::DEFAULT_RANGE_TIMEOUT,
            max_retry: 3,
            suspicious_rate_per_sec: 10.0,
            suspicious_total: 100,
        }
    }
}

impl TransportOptions {
    pub fn from_config(config: &ReaderConfig) -> Self {
        Self {
            timeout: config.range_timeout,
            auth_cookie: Some(config.auth_cookie.clone()),
            max_retry: config.max_retry,
            suspicious_rate_per_sec: config.suspicious_rate_per_sec,
            suspicious_total: config.suspicious_total,
            ..Self::default()
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn RangeListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_auth_observer(mut self, observer: Arc<dyn AuthObserver>) -> Self {
        self.auth_observer = Some(observer);
        self
    }

    pub fn with_artifact_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.artifact_stores.push(store);
        self
    }

    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }
}

/// Incremental, session-scoped document transport.
pub struct RangeTransport {
    length: u64,
    initial_data: Bytes,
    fetcher: ProxyRangeFetcher,
    cancel: CancellationToken,
    monitor: RequestMonitor,
    listener: Arc<dyn RangeListener>,
    auth_observer: Option<Arc<dyn AuthObserver>>,
    artifact_stores: Vec<Arc<dyn ArtifactStore>>,
    matcher: ArtifactMatcher,
    loaded: AtomicU64,
}

impl RangeTransport {
    /// Create a transport for one reading session.
    ///
    /// Decodes the initial chunk and purges matching session artifacts.
    pub fn new(
        descriptor: &StreamSessionDescriptor,
        proxy_url: Url,
        options: TransportOptions,
    ) -> Result<Self, TransportError> {
        let initial_data = Bytes::from(descriptor.decode_initial_chunk()?);
        let fetcher = ProxyRangeFetcher::new(proxy_url, descriptor, &options)?;

        let transport = Self {
            length: descriptor.total_size,
            loaded: AtomicU64::new(initial_data.len() as u64),
            initial_data,
            fetcher,
            cancel: CancellationToken::new(),
            monitor: RequestMonitor::new(
                options.suspicious_rate_per_sec,
                options.suspicious_total,
            ),
            listener: options.listener,
            auth_observer: options.auth_observer,
            artifact_stores: options.artifact_stores,
            matcher: ArtifactMatcher::for_document(options.document_id.as_deref()),
        };
        transport.purge_session_artifacts();

        tracing::debug!(
            length = transport.length,
            initial = transport.initial_data.len(),
            proxy = %transport.fetcher.url().path(),
            "range transport created"
        );
        Ok(transport)
    }

    /// Total document length.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Inline prefix of the document.
    pub fn initial_data(&self) -> &Bytes {
        &self.initial_data
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.fetcher.transferred_bytes()
    }

    pub fn request_count(&self) -> u64 {
        self.monitor.count()
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetch `[begin, end]` (inclusive) and deliver it to the listener.
    ///
    /// Resolves `Ok(())` when the session was aborted. Any other failure is reported
    /// to [`RangeListener::on_range_error`] and returned.
    pub async fn request_range(&self, begin: u64, end: u64) -> Result<(), TransportError> {
        match self.fetch_range(begin, end).await {
            Ok(chunk) => {
                self.listener.on_data_range(begin, &chunk);
                let loaded = self
                    .loaded
                    .fetch_add(chunk.len() as u64, Ordering::Relaxed)
                    + chunk.len() as u64;
                self.listener.on_progress(loaded.min(self.length), self.length);
                Ok(())
            }
            Err(err) if err.is_cancelled() => {
                tracing::debug!(begin, end, "range request cancelled");
                Ok(())
            }
            Err(err) => {
                self.listener.on_range_error(begin, &err);
                Err(err)
            }
        }
    }

    /// Fetch `[begin, end]` without notifying the listener.
    ///
    /// Fails with [`TransportError::Cancelled`] once the session is aborted.
    pub async fn fetch_range(&self, begin: u64, end: u64) -> Result<Bytes, TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        let range = RangeRequest::new(begin, end, self.length)?;

        let sample = self.monitor.record();
        if sample.suspicious {
            tracing::warn!(
                count = sample.count,
                rate_per_sec = sample.rate_per_sec,
                elapsed_ms = sample.elapsed.as_millis() as u64,
                "unusual range request rate, possible scraping"
            );
        }

        let result = self.fetcher.fetch(range, &self.cancel).await;
        if let Err(TransportError::Unauthorized) = &result
            && let Some(observer) = &self.auth_observer
        {
            observer.on_auth_failure("range request");
        }
        result
    }

    /// Cancel every in-flight and future request and purge session artifacts again.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.purge_session_artifacts();
    }

    fn purge_session_artifacts(&self) -> usize {
        let removed = purge_session_artifacts(&self.artifact_stores, &self.matcher);
        if removed > 0 {
            tracing::debug!(removed, "purged cached session artifacts");
        }
        removed
    }
}

#[async_trait]
impl ReadAt for RangeTransport {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, TransportError> {
        if buf.is_empty() || offset >= self.length {
            return Ok(0);
        }

        let end = offset + buf.len() as u64 - 1;
        let end = end.min(self.length - 1);
        let expected_size = (end - offset + 1) as usize;

        // Served from the inline prefix when it covers the whole read.
        if end < self.initial_data.len() as u64 {
            let start = offset as usize;
            buf[..expected_size].copy_from_slice(&self.initial_data[start..start + expected_size]);
            return Ok(expected_size);
        }

        let chunk = self.fetch_range(offset, end).await?;
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn size(&self) -> u64 {
        self.length
    }
}
