//! Per-request forwarding context and the response header whitelist.

use axum::http::header::{
    ACCEPT, ACCESS_CONTROL_EXPOSE_HEADERS, AUTHORIZATION, CACHE_CONTROL, CONTENT_LENGTH,
    CONTENT_RANGE, HeaderMap, HeaderName, HeaderValue, RANGE,
};
use reqwest::Url;
use serde::Deserialize;

use crate::descriptor::{
    ISSUED_AT_HEADER, ISSUED_AT_PARAM, SESSION_HEADER, SESSION_PARAM, WATERMARK_HEADER,
    WATERMARK_PARAM,
};
use crate::error::{ProxyError, ProxyResult};

/// Headers mirrored from upstream on the demo route.
pub const DEMO_RESPONSE_HEADERS: &[&str] = &[
    "accept-ranges",
    "cache-control",
    "content-disposition",
    "content-length",
    "content-range",
    "content-type",
];

/// Headers mirrored from upstream on the authenticated stream route.
pub const STREAM_RESPONSE_HEADERS: &[&str] = &[
    "accept-ranges",
    "cache-control",
    "content-disposition",
    "content-length",
    "content-range",
    "content-type",
    "expires",
    "pragma",
    "permissions-policy",
    "referrer-policy",
    "x-content-type-options",
    "x-download-options",
    "x-frame-options",
    "x-readify-watermark",
];

/// Which proxy route a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyRoute {
    Demo,
    Stream,
}

impl ProxyRoute {
    pub fn response_headers(self) -> &'static [&'static str] {
        match self {
            Self::Demo => DEMO_RESPONSE_HEADERS,
            Self::Stream => STREAM_RESPONSE_HEADERS,
        }
    }

    fn upstream_path(self, book_id: u64) -> String {
        match self {
            Self::Demo => format!("books/{book_id}/pdf"),
            Self::Stream => format!("books/{book_id}/content"),
        }
    }
}

/// Session parameters carried in the proxy URL's query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionParams {
    #[serde(rename = "sessionToken")]
    pub session_token: Option<String>,
    pub watermark: Option<String>,
    #[serde(rename = "issuedAt")]
    pub issued_at: Option<String>,
}

impl SessionParams {
    /// Fill missing parameters from inbound `X-Readify-*` headers.
    pub fn or_headers(self, inbound: &HeaderMap) -> Self {
        let header = |name: &str| {
            inbound
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            session_token: self.session_token.or_else(|| header(SESSION_HEADER)),
            watermark: self.watermark.or_else(|| header(WATERMARK_HEADER)),
            issued_at: self.issued_at.or_else(|| header(ISSUED_AT_HEADER)),
        }
    }
}

/// Validate a document id: a decimal positive integer.
pub fn parse_book_id(raw: &str) -> ProxyResult<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ProxyError::MissingBookId);
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProxyError::InvalidBookId);
    }
    match raw.parse::<u64>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(ProxyError::InvalidBookId),
    }
}

/// Everything needed to issue the single upstream request for one inbound request.
#[derive(Debug, Clone)]
pub struct ProxyForwardContext {
    pub route: ProxyRoute,
    pub upstream_url: Url,
    pub headers: HeaderMap,
}

impl ProxyForwardContext {
    /// Demo route: forwards `Range` and, when present, the caller's token.
    pub fn for_demo(
        backend: &Url,
        book_id: u64,
        inbound: &HeaderMap,
        token: Option<&str>,
    ) -> ProxyResult<Self> {
        let upstream_url = join(backend, &ProxyRoute::Demo.upstream_path(book_id))?;
        let headers = base_headers(inbound, token)?;

        Ok(Self {
            route: ProxyRoute::Demo,
            upstream_url,
            headers,
        })
    }

    /// Session route: additionally forwards the session, watermark and issue time
    /// both as query parameters and as `X-Readify-*` headers.
    pub fn for_stream(
        backend: &Url,
        book_id: u64,
        params: &SessionParams,
        inbound: &HeaderMap,
        token: &str,
    ) -> ProxyResult<Self> {
        let mut upstream_url = join(backend, &ProxyRoute::Stream.upstream_path(book_id))?;
        let mut headers = base_headers(inbound, Some(token))?;

        let forwarded = [
            (SESSION_PARAM, SESSION_HEADER, &params.session_token),
            (WATERMARK_PARAM, WATERMARK_HEADER, &params.watermark),
            (ISSUED_AT_PARAM, ISSUED_AT_HEADER, &params.issued_at),
        ];
        {
            let mut query = upstream_url.query_pairs_mut();
            for (param, _, value) in &forwarded {
                if let Some(value) = value {
                    query.append_pair(param, value);
                }
            }
        }
        if upstream_url.query() == Some("") {
            upstream_url.set_query(None);
        }

        for (param, header, value) in forwarded {
            if let Some(value) = value {
                let value = HeaderValue::from_str(value)
                    .map_err(|_| ProxyError::InvalidSessionParameter(param))?;
                headers.insert(HeaderName::from_static(header), value);
            }
        }

        Ok(Self {
            route: ProxyRoute::Stream,
            upstream_url,
            headers,
        })
    }

    /// Copy only whitelisted headers from the upstream response.
    pub fn copy_whitelisted(&self, upstream: &HeaderMap) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for &name in self.route.response_headers() {
            let name = HeaderName::from_static(name);
            for value in upstream.get_all(&name) {
                headers.append(name.clone(), value.clone());
            }
        }

        // Length and range are re-set explicitly so they survive any append order.
        for name in [CONTENT_LENGTH, CONTENT_RANGE] {
            if let Some(value) = upstream.get(&name) {
                headers.insert(name, value.clone());
            }
        }

        let expose = expose_headers_value(self.route.response_headers());
        if let Ok(value) = HeaderValue::from_str(&expose) {
            headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value);
        }
        headers
    }
}

/// `Access-Control-Expose-Headers` value for a header list.
pub fn expose_headers_value(names: &[&str]) -> String {
    names.join(", ")
}

fn join(backend: &Url, path: &str) -> ProxyResult<Url> {
    backend
        .join(path)
        .map_err(|e| ProxyError::Internal(format!("invalid upstream URL: {e}")))
}

fn base_headers(inbound: &HeaderMap, token: Option<&str>) -> ProxyResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/pdf"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));

    if let Some(range) = inbound.get(RANGE) {
        headers.insert(RANGE, range.clone());
    }

    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ProxyError::Unauthorized)?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}
