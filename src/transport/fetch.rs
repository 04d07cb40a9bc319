use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_RANGE, COOKIE, PRAGMA, RANGE};
use reqwest::{Client, Response, StatusCode, Url};
use tokio_util::sync::CancellationToken;

use crate::credentials::CredentialProvider;
use crate::descriptor::{
    ISSUED_AT_HEADER, RangeRequest, SESSION_HEADER, StreamSessionDescriptor, WATERMARK_HEADER,
    content_range_start,
};
use crate::error::TransportError;

use super::TransportOptions;

/// Session-scoped range fetcher against the streaming proxy
pub struct ProxyRangeFetcher {
    client: Client,
    url: Url,
    session_token: String,
    watermark: String,
    issued_at: String,
    credentials: Arc<dyn CredentialProvider>,
    /// Cookie the proxy reads the auth token from, if the token should travel as one.
    auth_cookie: Option<String>,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl ProxyRangeFetcher {
    pub fn new(
        url: Url,
        descriptor: &StreamSessionDescriptor,
        options: &TransportOptions,
    ) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(options.timeout).build()?;

        Ok(Self {
            client,
            url,
            session_token: descriptor.session_token.clone(),
            watermark: descriptor.watermark_signature.clone(),
            issued_at: descriptor.issued_at.clone(),
            credentials: options.credentials.clone(),
            auth_cookie: options.auth_cookie.clone(),
            transferred_bytes: AtomicU64::new(0),
            max_retry: options.max_retry.max(1),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Fetch exactly `range`, bound to `cancel`.
    ///
    /// A short 206 body is continued with a follow-up request for the remainder.
    /// Connect and timeout errors are retried with linear backoff.
    pub async fn fetch(
        &self,
        range: RangeRequest,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        let expected_size = range.len() as usize;
        let mut buf = BytesMut::with_capacity(expected_size);
        let mut retry_count = 0;

        while buf.len() < expected_size {
            let current_start = range.begin + buf.len() as u64;
            let remaining = RangeRequest {
                begin: current_start,
                end: range.end,
            };
            let header = remaining.header_value();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                result = self.request(&header).send() => result,
            };

            match result {
                Ok(resp) => {
                    let chunk = self
                        .read_body(resp, current_start, range.end, cancel)
                        .await?;
                    if chunk.is_empty() {
                        return Err(TransportError::ShortBody {
                            expected: expected_size,
                            got: buf.len(),
                        });
                    }

                    let chunk_len = chunk.len().min(expected_size - buf.len());
                    buf.extend_from_slice(&chunk[..chunk_len]);

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        return Err(TransportError::RetriesExhausted(e));
                    }
                    tracing::warn!(
                        retry = retry_count,
                        max_retry = self.max_retry,
                        error = %e,
                        "range fetch connection error, retrying"
                    );
                    let backoff = Duration::from_millis(500 * retry_count as u64);
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(buf.freeze())
    }

    fn request(&self, range: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "application/pdf")
            .header(RANGE, range)
            .header(SESSION_HEADER, &self.session_token)
            .header(WATERMARK_HEADER, &self.watermark)
            .header(ISSUED_AT_HEADER, &self.issued_at)
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache");

        if let Some(token) = self.credentials.bearer_token() {
            if let Some(cookie) = &self.auth_cookie {
                request = request.header(COOKIE, format!("{cookie}={token}"));
            }
            request = request.bearer_auth(token);
        }
        request
    }

    async fn read_body(
        &self,
        resp: Response,
        start: u64,
        end: u64,
        cancel: &CancellationToken,
    ) -> Result<Bytes, TransportError> {
        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {
                if let Some(value) = resp
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    && content_range_start(value) != Some(start)
                {
                    return Err(TransportError::ContentRangeMismatch {
                        expected: start,
                        got: value.to_string(),
                    });
                }
                body(resp, cancel).await
            }
            // The proxy ignored the range and sent the whole resource.
            StatusCode::OK => {
                let bytes = body(resp, cancel).await?;
                let len = bytes.len() as u64;
                if len <= start {
                    return Ok(Bytes::new());
                }
                let stop = (end + 1).min(len);
                Ok(bytes.slice(start as usize..stop as usize))
            }
            StatusCode::UNAUTHORIZED => Err(TransportError::Unauthorized),
            status => Err(TransportError::Status { status }),
        }
    }
}

async fn body(resp: Response, cancel: &CancellationToken) -> Result<Bytes, TransportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        bytes = resp.bytes() => Ok(bytes?),
    }
}
