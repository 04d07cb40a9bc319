//! # readify-stream
//!
//! Secure, incremental PDF delivery for a subscription reading platform.
//!
//! Documents are never handed to the reader as a whole. The reading client gets a
//! short-lived session descriptor (length, inline header chunk, session token,
//! watermark signature) and then pulls byte ranges on demand through a streaming proxy
//! that hides the content origin and preserves range semantics end to end.
//!
//! ## Components
//!
//! - [`proxy`]: axum streaming proxy. Validates the document id, forwards exactly one
//!   authenticated upstream request per inbound request, mirrors a fixed header
//!   whitelist and streams the body without buffering.
//! - [`transport`]: [`RangeTransport`], the I/O backend for a rendering engine.
//!   Delivers offset-tagged chunks, shares one cancellation token per session and
//!   purges cached session artifacts.
//! - [`reader`]: [`ReaderViewController`], the state machine from access descriptor
//!   to a readable session.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use readify_stream::{
//!     HttpAccessClient, ReaderConfig, ReaderState, ReaderViewController, StaticCredentials,
//!     TransportOptions,
//! };
//! use reqwest::Url;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ReaderConfig::new(
//!         Url::parse("http://127.0.0.1:3000")?,
//!         Url::parse("http://localhost:8080/api/")?,
//!     );
//!     let credentials = Arc::new(StaticCredentials::new("jwt"));
//!     let access = HttpAccessClient::new(config.api_url.clone(), credentials.clone(), config.descriptor_timeout)?;
//!
//!     let mut controller = ReaderViewController::new(Arc::new(access), config.app_url.clone(), 42);
//!     if let ReaderState::Ready(session) = controller.load().await {
//!         let transport = session.open_transport(
//!             TransportOptions::from_config(&config).with_credentials(credentials),
//!         )?;
//!         transport.request_range(0, 1023).await?;
//!         transport.abort();
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod credentials;
pub mod descriptor;
pub mod error;
pub mod io;
pub mod proxy;
pub mod reader;
pub mod transport;

pub use cli::Cli;
pub use config::{ProxyConfig, ReaderConfig};
pub use credentials::{
    AuthObserver, CookieTokenSource, CredentialProvider, LogAuthObserver, StaticCredentials,
    TokenSource,
};
pub use descriptor::{AccessResponse, RangeRequest, StreamInfo, StreamSessionDescriptor};
pub use error::{AccessError, ProxyError, TransportError};
pub use io::ReadAt;
pub use proxy::{AppState, create_router};
pub use reader::{
    AccessClient, AccessReply, HttpAccessClient, NextAction, ReaderState, ReaderViewController,
    ReadySession, derive_proxy_url,
};
pub use transport::{
    ArtifactMatcher, ArtifactStore, DirectoryArtifactStore, MemoryArtifactStore, NoopListener,
    RangeListener, RangeTransport, TransportOptions,
};
