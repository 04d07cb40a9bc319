//! Session descriptors and the access-descriptor wire payload.
//!
//! The descriptor endpoint answers with a loosely shaped JSON object whose `stream`
//! member is either a playable stream or an `{ "error": ... }` object. That shape is
//! decided exactly once, in [`AccessResponse::stream_info`], and the rest of the crate
//! only ever sees the tagged [`StreamInfo`].

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TransportError;

/// Chunk size used when the descriptor does not recommend one.
pub const DEFAULT_CHUNK_SIZE: u32 = 65536;

/// Custom headers understood by the content origin.
pub const SESSION_HEADER: &str = "x-readify-session";
pub const WATERMARK_HEADER: &str = "x-readify-watermark";
pub const ISSUED_AT_HEADER: &str = "x-readify-issued-at";

/// Query parameters carrying the session credentials.
pub const SESSION_PARAM: &str = "sessionToken";
pub const WATERMARK_PARAM: &str = "watermark";
pub const ISSUED_AT_PARAM: &str = "issuedAt";

/// Short-lived streaming descriptor issued once per reader-open event.
///
/// Immutable once issued. A new reading session needs a new descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSessionDescriptor {
    /// Total byte length of the document.
    pub total_size: u64,
    /// Base64 prefix of the document (header and xref), delivered inline.
    #[serde(default)]
    pub initial_chunk: String,
    pub recommended_chunk_size: u32,
    pub session_token: String,
    pub watermark_signature: String,
    #[serde(deserialize_with = "string_or_number")]
    pub issued_at: String,
}

impl StreamSessionDescriptor {
    /// Decode the inline initial chunk.
    pub fn decode_initial_chunk(&self) -> Result<Vec<u8>, TransportError> {
        Ok(STANDARD.decode(self.initial_chunk.as_bytes())?)
    }

    /// Encode raw bytes the way the issuer does.
    pub fn encode_initial_chunk(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    /// Build a descriptor from a ready stream and its watermark.
    ///
    /// The session token comes from the signed URL's `sessionToken` parameter,
    /// falling back to the `X-Readify-Session` header the issuer attached.
    pub fn from_stream(stream: &StreamReady, watermark: Option<&Watermark>) -> Self {
        let query = signed_query(&stream.url);
        let header = |name: &str| {
            stream
                .headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };

        let session_token = query
            .get(SESSION_PARAM)
            .cloned()
            .filter(|s| !s.is_empty())
            .or_else(|| header(SESSION_HEADER))
            .unwrap_or_default();
        let watermark_signature = watermark
            .map(|w| w.signature.clone())
            .filter(|s| !s.is_empty())
            .or_else(|| query.get(WATERMARK_PARAM).cloned())
            .or_else(|| header(WATERMARK_HEADER))
            .unwrap_or_default();
        let issued_at = watermark
            .map(|w| w.issued_at.clone())
            .filter(|s| !s.is_empty())
            .or_else(|| query.get(ISSUED_AT_PARAM).cloned())
            .or_else(|| header(ISSUED_AT_HEADER))
            .unwrap_or_default();

        Self {
            total_size: stream.content_length,
            initial_chunk: stream.initial_chunk.clone().unwrap_or_default(),
            recommended_chunk_size: stream.chunk_size,
            session_token,
            watermark_signature,
            issued_at,
        }
    }
}

/// Query parameters of a signed URL. Relative URLs are resolved against a dummy base.
pub(crate) fn signed_query(url: &str) -> HashMap<String, String> {
    let parsed = Url::parse(url).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(url))
    });
    match parsed {
        Ok(url) => url.query_pairs().into_owned().collect(),
        Err(_) => HashMap::new(),
    }
}

/// Inclusive byte interval `[begin, end]` of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub begin: u64,
    pub end: u64,
}

impl RangeRequest {
    /// Validate `0 <= begin <= end < total_size`.
    pub fn new(begin: u64, end: u64, total_size: u64) -> Result<Self, TransportError> {
        if begin > end || end >= total_size {
            return Err(TransportError::InvalidRange {
                begin,
                end,
                total: total_size,
            });
        }
        Ok(Self { begin, end })
    }

    pub fn len(&self) -> u64 {
        self.end - self.begin + 1
    }

    /// `Range` header value, e.g. `bytes=0-1023`.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.begin, self.end)
    }
}

/// Parse the start offset out of a `Content-Range: bytes 0-1023/1000000` value.
pub fn content_range_start(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes")?
        .trim_start()
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Book summary attached to an access response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
}

/// Watermark payload for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watermark {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub issued_at: String,
}

/// Raw `stream` member of the access response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStream {
    url: Option<String>,
    content_length: Option<u64>,
    chunk_size: Option<u32>,
    #[serde(default)]
    headers: HashMap<String, String>,
    initial_chunk: Option<String>,
    error: Option<String>,
}

/// Response of the access descriptor endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub book: Option<BookSummary>,
    #[serde(default)]
    pub can_access: Option<bool>,
    #[serde(default)]
    stream: Option<RawStream>,
    #[serde(default)]
    pub watermark: Option<Watermark>,
}

/// A stream that can be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReady {
    pub url: String,
    pub content_length: u64,
    pub chunk_size: u32,
    pub headers: HashMap<String, String>,
    pub initial_chunk: Option<String>,
}

/// The `stream` member, decided once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamInfo {
    Ready(StreamReady),
    Unavailable { message: String },
}

impl AccessResponse {
    /// Classify the `stream` member.
    ///
    /// A stream is ready only when it has a non-empty URL, a length and no error.
    pub fn stream_info(&self) -> StreamInfo {
        let Some(raw) = &self.stream else {
            return StreamInfo::Unavailable {
                message: "stream descriptor missing".to_string(),
            };
        };

        if let Some(error) = &raw.error {
            return StreamInfo::Unavailable {
                message: error.clone(),
            };
        }

        match (&raw.url, raw.content_length) {
            (Some(url), Some(content_length)) if !url.is_empty() && content_length > 0 => {
                StreamInfo::Ready(StreamReady {
                    url: url.clone(),
                    content_length,
                    chunk_size: raw.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
                    headers: raw.headers.clone(),
                    initial_chunk: raw.initial_chunk.clone(),
                })
            }
            _ => StreamInfo::Unavailable {
                message: "stream URL missing".to_string(),
            },
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
