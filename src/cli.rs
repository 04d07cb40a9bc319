use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use reqwest::Url;

use crate::config::{ProxyConfig, ReaderConfig};

#[derive(Parser, Debug)]
#[command(name = "readify")]
#[command(version)]
#[command(about = "Secure incremental PDF delivery: streaming proxy and range reader", long_about = None)]
#[command(after_help = "Examples:\n  \
  readify serve --backend-url http://localhost:8080/api/     run the streaming proxy\n  \
  readify read 42 --token $JWT -r 0-1023 -o head.bin          fetch a byte range of book 42\n  \
  readify read 42 --cache-dir ~/.cache/readify                purge cached artifacts while reading")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the streaming proxy
    Serve(ServeArgs),
    /// Open a book through the proxy and write a byte range
    Read(ReadArgs),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "READIFY_BIND", default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// Backend API base URL
    #[arg(long, env = "READIFY_BACKEND_URL", default_value = "http://localhost:8080/api/")]
    pub backend_url: String,

    /// Cookie carrying the reader's auth token
    #[arg(long, env = "READIFY_AUTH_COOKIE", default_value = crate::config::DEFAULT_AUTH_COOKIE)]
    pub auth_cookie: String,

    /// Upstream request timeout in seconds
    #[arg(long, env = "READIFY_UPSTREAM_TIMEOUT", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Sustained range requests per second per caller (0 disables)
    #[arg(long, env = "READIFY_RANGE_RATE", default_value_t = crate::config::DEFAULT_RANGE_RATE_PER_SEC)]
    pub range_rate: u32,

    /// Range request burst per caller
    #[arg(long, env = "READIFY_RANGE_BURST", default_value_t = crate::config::DEFAULT_RANGE_BURST)]
    pub range_burst: u32,
}

impl ServeArgs {
    pub fn to_config(&self) -> Result<ProxyConfig> {
        let backend_url = Url::parse(&self.backend_url).context("invalid backend URL")?;
        let mut config = ProxyConfig::new(backend_url);
        config.bind = self.bind.clone();
        config.auth_cookie = self.auth_cookie.clone();
        config.upstream_timeout = Duration::from_secs(self.upstream_timeout_secs);
        config.range_rate_per_sec = self.range_rate;
        config.range_burst = self.range_burst;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Book id
    #[arg(value_name = "BOOK_ID")]
    pub book_id: u64,

    /// Origin serving the streaming proxy
    #[arg(long, env = "READIFY_APP_URL", default_value = "http://127.0.0.1:3000")]
    pub app_url: String,

    /// Backend API base URL serving access descriptors
    #[arg(long, env = "READIFY_API_URL", default_value = "http://localhost:8080/api/")]
    pub api_url: String,

    /// Bearer token
    #[arg(long, env = "READIFY_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Inclusive byte range, e.g. 0-1023 or 4096- (default: first recommended chunk)
    #[arg(short = 'r', long, value_name = "BEGIN-END")]
    pub range: Option<String>,

    /// Write to file instead of stdout
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Cache directory whose reader/PDF artifacts are purged
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Quiet mode
    #[arg(short = 'q', action = clap::ArgAction::Count)]
    pub quiet: u8,
}

impl ReadArgs {
    pub fn to_config(&self) -> Result<ReaderConfig> {
        let app_url = Url::parse(&self.app_url).context("invalid app URL")?;
        let api_url = Url::parse(&self.api_url).context("invalid API URL")?;
        Ok(ReaderConfig::new(app_url, api_url))
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet > 0 || self.output.is_none()
    }

    /// Resolve the requested range against the document length.
    pub fn byte_range(&self, length: u64, chunk_size: u64) -> Result<(u64, u64)> {
        if length == 0 {
            bail!("document is empty");
        }
        let last = length - 1;
        let Some(raw) = &self.range else {
            return Ok((0, chunk_size.max(1).saturating_sub(1).min(last)));
        };

        let (begin, end) = raw
            .split_once('-')
            .with_context(|| format!("invalid range {raw:?}, expected BEGIN-END"))?;
        let begin: u64 = begin.trim().parse().context("invalid range start")?;
        let end = match end.trim() {
            "" => last,
            end => end.parse::<u64>().context("invalid range end")?.min(last),
        };
        if begin > end {
            bail!("range {raw} is outside the document ({length} bytes)");
        }
        Ok((begin, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_args(range: Option<&str>) -> ReadArgs {
        ReadArgs {
            book_id: 1,
            app_url: "http://127.0.0.1:3000".into(),
            api_url: "http://localhost:8080/api/".into(),
            token: None,
            range: range.map(str::to_string),
            output: None,
            cache_dir: None,
            quiet: 0,
        }
    }

    #[test]
    fn range_parsing() {
        assert_eq!(read_args(Some("0-1023")).byte_range(1_000_000, 65536).unwrap(), (0, 1023));
        assert_eq!(read_args(Some("500-")).byte_range(1000, 65536).unwrap(), (500, 999));
        assert_eq!(read_args(Some("900-5000")).byte_range(1000, 65536).unwrap(), (900, 999));
        assert_eq!(read_args(None).byte_range(1_000_000, 65536).unwrap(), (0, 65535));
        assert!(read_args(Some("2000-")).byte_range(1000, 65536).is_err());
        assert!(read_args(Some("abc")).byte_range(1000, 65536).is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from(["readify", "read", "42", "-r", "0-9"]).unwrap();
        match cli.command {
            Command::Read(args) => {
                assert_eq!(args.book_id, 42);
                assert_eq!(args.range.as_deref(), Some("0-9"));
            }
            Command::Serve(_) => panic!("expected read"),
        }
    }
}
