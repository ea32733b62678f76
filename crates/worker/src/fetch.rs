//! Staging of remote audio assets onto the local filesystem.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

/// Connect/read timeout for asset downloads.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Seam for staging a remote asset to a local path.
///
/// Failures are reported as `false`, never as an error value: a
/// download that cannot complete is a terminal, user-visible job
/// failure and carries no further detail across this boundary. The
/// failure itself is logged at the source.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Retrieve `url` and write it to `destination`. A partial file
    /// may remain at `destination` after a failed attempt.
    async fn fetch(&self, url: &str, destination: &Path) -> bool;
}

/// Errors internal to a single fetch attempt.
#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to write staged file: {0}")]
    Io(#[from] std::io::Error),
}

/// [`AssetFetcher`] that streams over HTTP(S).
pub struct HttpAssetFetcher {
    client: reqwest::Client,
}

impl HttpAssetFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(FETCH_TIMEOUT)
            .read_timeout(FETCH_TIMEOUT)
            .build()
            .expect("HTTP client construction must succeed");
        Self { client }
    }

    /// One download attempt: ensure the staging directory exists, then
    /// stream the response body to disk chunk by chunk so large files
    /// never sit in memory whole.
    async fn try_fetch(&self, url: &str, destination: &Path) -> Result<(), FetchError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?.error_for_status()?;

        let mut file = tokio::fs::File::create(destination).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;

        Ok(())
    }
}

impl Default for HttpAssetFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, url: &str, destination: &Path) -> bool {
        match self.try_fetch(url, destination).await {
            Ok(()) => {
                tracing::debug!(url, path = %destination.display(), "Audio asset staged");
                true
            }
            Err(e) => {
                tracing::warn!(url, error = %e, "Failed to download audio asset");
                false
            }
        }
    }
}
