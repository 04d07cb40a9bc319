//! Streaming proxy handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::{ACCESS_CONTROL_EXPOSE_HEADERS, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::{Value, json};

use crate::error::{ErrorBody, ProxyError, ProxyResult};

use super::forward::{ProxyForwardContext, SessionParams, expose_headers_value, parse_book_id};
use super::state::AppState;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "success": true, "status": "ok" }))
}

/// GET|HEAD /api/pdf/{book_id} - pass-through of the whole document or a range.
pub async fn demo_pdf(
    State(state): State<AppState>,
    method: Method,
    Path(book_id): Path<String>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    let book_id = parse_book_id(&book_id)?;
    let token = state.tokens.token(&headers);
    let ctx = ProxyForwardContext::for_demo(
        &state.config.backend_url,
        book_id,
        &headers,
        token.as_deref(),
    )?;
    forward(&state, ctx, method, book_id).await
}

/// GET /api/books/{book_id}/stream - session-scoped, authenticated range stream.
pub async fn stream_pdf(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Query(params): Query<SessionParams>,
    headers: HeaderMap,
) -> ProxyResult<Response> {
    let book_id = parse_book_id(&book_id)?;
    let params = params.or_headers(&headers);
    // Fail closed: no cookie, no upstream call.
    let token = state.tokens.token(&headers).ok_or(ProxyError::Unauthorized)?;

    // Keyed on the authenticated caller; the session token is caller-controlled.
    if !state.limiter.check(&token) {
        tracing::warn!(book_id, "range rate limit exceeded");
        return Err(ProxyError::RateLimited);
    }

    let ctx = ProxyForwardContext::for_stream(
        &state.config.backend_url,
        book_id,
        &params,
        &headers,
        &token,
    )?;
    forward(&state, ctx, Method::GET, book_id).await
}

/// Issue exactly one upstream request and relay its response.
///
/// The body is streamed, never buffered, except for JSON error payloads. Dropping
/// the response (client disconnect) drops the upstream connection with it.
async fn forward(
    state: &AppState,
    ctx: ProxyForwardContext,
    method: Method,
    book_id: u64,
) -> ProxyResult<Response> {
    let upstream = state
        .client
        .request(method.clone(), ctx.upstream_url.clone())
        .headers(ctx.headers.clone())
        .send()
        .await
        .map_err(|e| {
            tracing::error!(book_id, error = %e, "upstream content request failed");
            ProxyError::Upstream(e)
        })?;

    let status = upstream.status();
    let is_json = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));

    if is_json && (status.is_client_error() || status.is_server_error()) {
        tracing::debug!(book_id, status = %status, "relaying upstream JSON error");
        let body = upstream.bytes().await.map_err(|e| {
            tracing::error!(book_id, error = %e, "failed to read upstream error body");
            ProxyError::Upstream(e)
        })?;
        return Ok(json_error_response(&ctx, status, body));
    }

    let headers = ctx.copy_whitelisted(upstream.headers());
    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Relay an upstream JSON error verbatim, or wrap a body that is not valid JSON.
fn json_error_response(ctx: &ProxyForwardContext, status: StatusCode, body: Bytes) -> Response {
    let body = if serde_json::from_slice::<Value>(&body).is_ok() {
        body
    } else {
        let message = String::from_utf8_lossy(&body).trim().to_string();
        let message = if message.is_empty() {
            status.canonical_reason().unwrap_or("Upstream error").to_string()
        } else {
            message
        };
        match serde_json::to_vec(&ErrorBody::new(message)) {
            Ok(wrapped) => Bytes::from(wrapped),
            Err(_) => Bytes::from_static(b"{\"success\":false}"),
        }
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(&expose_headers_value(ctx.route.response_headers())) {
        headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value);
    }
    response
}
