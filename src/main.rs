//! Main entry point for the readify CLI application.
//!
//! `readify serve` runs the streaming proxy; `readify read` opens a book the way a
//! reader client does and writes a byte range of it.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use readify_stream::cli::{Command, ReadArgs};
use readify_stream::{
    Cli, CredentialProvider, DirectoryArtifactStore, HttpAccessClient, LogAuthObserver, ReadAt,
    ReaderState, ReaderViewController, StaticCredentials, TransportOptions, proxy,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // reqwest's rustls backend needs a process-wide provider.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => proxy::serve(args.to_config()?).await,
        Command::Read(args) => read(&args).await,
    }
}

/// Open a book through the controller and copy the requested range out.
async fn read(args: &ReadArgs) -> Result<()> {
    let config = args.to_config()?;
    let credentials: Arc<dyn CredentialProvider> = match &args.token {
        Some(token) => Arc::new(StaticCredentials::new(token.clone())),
        None => Arc::new(StaticCredentials::anonymous()),
    };
    let observer = Arc::new(LogAuthObserver);

    let access = HttpAccessClient::new(
        config.api_url.clone(),
        credentials.clone(),
        config.descriptor_timeout,
    )?;
    let mut controller =
        ReaderViewController::new(Arc::new(access), config.app_url.clone(), args.book_id)
            .with_auth_observer(observer.clone());

    let book_id = controller.book_id();
    match controller.load().await {
        ReaderState::Ready(_) => {}
        ReaderState::NoAccess { message } => bail!("subscription required: {message}"),
        ReaderState::NotFound => bail!("book {book_id} not found"),
        ReaderState::StreamUnavailable { message } => {
            bail!("stream unavailable: {message} (try again later)")
        }
        ReaderState::Error { message } => bail!("{message} (try again later)"),
        ReaderState::Loading => bail!("access descriptor never settled"),
    }
    let session = controller
        .into_ready()
        .context("reader session was not ready")?;

    if !args.is_quiet() {
        eprintln!("{} [{}]", session.book.title, session.watermark_text());
    }

    let mut options = TransportOptions::from_config(&config)
        .with_credentials(credentials)
        .with_auth_observer(observer);
    if let Some(dir) = &args.cache_dir {
        options = options.with_artifact_store(Arc::new(DirectoryArtifactStore::new(dir)));
    }
    let transport = session.open_transport(options)?;

    let chunk_size = u64::from(session.descriptor.recommended_chunk_size.max(1));
    let (begin, end) = args.byte_range(transport.length(), chunk_size)?;

    let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let result = tokio::select! {
        result = copy_range(&transport, begin, end, chunk_size, &mut writer) => result,
        _ = tokio::signal::ctrl_c() => {
            transport.abort();
            bail!("interrupted");
        }
    };
    transport.abort();
    let written = result?;
    writer.flush().await?;

    if !args.is_quiet() {
        eprintln!(
            "Wrote {} ({}-{}), total bytes transferred: {}",
            format_size(written),
            begin,
            end,
            format_size(transport.transferred_bytes())
        );
    }
    Ok(())
}

/// Copy `[begin, end]` from `reader` in `chunk_size` pieces.
async fn copy_range<R: ReadAt + ?Sized, W: AsyncWrite + Unpin + ?Sized>(
    reader: &R,
    begin: u64,
    end: u64,
    chunk_size: u64,
    writer: &mut W,
) -> Result<u64> {
    let mut offset = begin;
    let mut buf = vec![0u8; chunk_size as usize];

    while offset <= end {
        let want = (end - offset + 1).min(chunk_size) as usize;
        reader
            .read_exact_at(offset, &mut buf[..want])
            .await
            .with_context(|| format!("read failed at offset {offset}"))?;
        writer.write_all(&buf[..want]).await?;
        offset += want as u64;
    }

    Ok(offset - begin)
}

/// Format a byte size into a human-readable string.
///
/// Automatically selects the appropriate unit (bytes, KB, MB, GB)
/// based on the size magnitude.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
