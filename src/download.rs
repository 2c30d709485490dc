//! Resource transport.

use crate::error::SyncError;
use crate::types::FetchConfig;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::path::Path;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// Source of resource blobs addressed by digest.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Writes the full blob for `digest` to `path`, returning the number of bytes written.
    ///
    /// `path` is created or truncated. The caller owns its parent directory
    /// and decides where the file finally lands.
    async fn fetch_to(&self, digest: &str, path: &Path) -> Result<u64, SyncError>;
}

/// Fetches blobs over HTTP from `base_url + digest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    /// Builds a fetcher whose every request is bounded by `config.timeout`.
    pub fn new(config: &FetchConfig) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// URL of the blob for `digest`.
    ///
    /// The digest is appended verbatim, so `base_url` normally ends with `/`.
    pub fn url_for(&self, digest: &str) -> String {
        format!("{}{}", self.base_url, digest)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_to(&self, digest: &str, path: &Path) -> Result<u64, SyncError> {
        let url = self.url_for(digest);
        let response = self.client.get(&url).send().await?.error_for_status()?;

        let mut file = BufWriter::new(tokio::fs::File::create(path).await?);
        let mut byte_stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(piece) = byte_stream.next().await {
            let chunk = piece?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Fetched {} bytes from {}", written, url);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_appends_digest_verbatim() {
        let fetcher = HttpFetcher::new(&FetchConfig::new("https://cdn.example.com/res/")).unwrap();
        assert_eq!(
            fetcher.url_for("0a1b2c"),
            "https://cdn.example.com/res/0a1b2c"
        );
    }
}
