use std::path::Path;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::retry::{RetryPolicy, Transient};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("Failed to download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Download of {url} failed with HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Download of {url} was cancelled")]
    Cancelled { url: String },
}

impl DownloadError {
    fn write(path: &Path, source: std::io::Error) -> Self {
        Self::Write {
            path: path.display().to_string(),
            source,
        }
    }
}

impl Transient for DownloadError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Request { .. } | Self::Status { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub file_name: String,
    pub downloaded: u64,
    pub total: Option<u64>,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`, when the server sent a length.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The destination already existed and was left untouched.
    Skipped,
    Fetched { bytes: u64 },
}

/// Build the HTTP client shared by every network operation of a run.
///
/// Only connection setup and idle reads are bounded so that large packages
/// are not cut off mid-transfer.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(
    read_timeout: Duration,
    connect_timeout: Duration,
) -> Result<reqwest::Client, DownloadError> {
    reqwest::Client::builder()
        .read_timeout(read_timeout)
        .connect_timeout(connect_timeout)
        .user_agent(format!("wuintegrate/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(DownloadError::ClientBuild)
}

/// Streams remote files to disk with retries, progress and cancellation.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
    progress: Option<mpsc::Sender<DownloadProgress>>,
}

impl Downloader {
    #[must_use]
    pub fn new(client: reqwest::Client, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            client,
            retry,
            cancel,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<mpsc::Sender<DownloadProgress>>) -> Self {
        self.progress = progress;
        self
    }

    /// Download `url` to `dest` unless `dest` already exists.
    ///
    /// A file that exists is trusted as complete; its size and contents are
    /// not checked. A failed attempt removes whatever it wrote before the
    /// next attempt starts.
    ///
    /// # Errors
    /// Returns the last error once every attempt has failed, or immediately
    /// on cancellation or a local write failure.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<DownloadOutcome, DownloadError> {
        if dest.exists() {
            debug!("Skipping {url}, {} already exists", dest.display());
            return Ok(DownloadOutcome::Skipped);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::write(parent, source))?;
        }

        let this = self;
        let bytes = self
            .retry
            .run(&self.cancel, move |attempt| {
                debug!("Downloading {url} (attempt {attempt})");
                this.download_once(url, dest)
            })
            .await?;

        info!("Downloaded {} ({bytes} bytes)", dest.display());
        Ok(DownloadOutcome::Fetched { bytes })
    }

    async fn download_once(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled { url: url.to_string() }),
            result = self.stream_to_file(url, dest) => result,
        };

        if result.is_err() {
            match tokio::fs::remove_file(dest).await {
                Ok(()) => debug!("Removed partial download {}", dest.display()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => debug!("Could not remove {}: {error}", dest.display()),
            }
        }

        result
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        use futures_util::StreamExt;

        let response =
            self.client
                .get(url)
                .send()
                .await
                .map_err(|source| DownloadError::Request {
                    url: url.to_string(),
                    source,
                })?;

        if !response.status().is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let total = response.content_length();
        let file_name = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut downloaded: u64 = 0;

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|source| DownloadError::write(dest, source))?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| DownloadError::Request {
                url: url.to_string(),
                source,
            })?;
            file.write_all(&chunk)
                .await
                .map_err(|source| DownloadError::write(dest, source))?;
            downloaded += chunk.len() as u64;

            if let Some(progress) = &self.progress {
                let _ = progress
                    .send(DownloadProgress {
                        file_name: file_name.clone(),
                        downloaded,
                        total,
                    })
                    .await;
            }
        }

        file.flush()
            .await
            .map_err(|source| DownloadError::write(dest, source))?;

        Ok(downloaded)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{DownloadOutcome, DownloadProgress, Downloader, http_client};
    use crate::retry::RetryPolicy;

    fn downloader(cancel: CancellationToken) -> Downloader {
        let client = http_client(Duration::from_secs(5), Duration::from_secs(1))
            .expect("client should build");
        Downloader::new(client, RetryPolicy::immediate(2), cancel)
    }

    #[test]
    fn progress_fraction_requires_a_known_total() {
        let unknown = DownloadProgress {
            file_name: "a.cab".to_string(),
            downloaded: 10,
            total: None,
        };
        let half = DownloadProgress {
            total: Some(20),
            ..unknown.clone()
        };

        assert_eq!(unknown.fraction(), None);
        assert_eq!(half.fraction(), Some(0.5));
    }

    #[tokio::test]
    async fn existing_destination_is_skipped_without_a_request() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("windows10.0-kb5034441-x64.cab");
        std::fs::write(&dest, b"already here").expect("seed file should be written");

        let outcome = downloader(CancellationToken::new())
            .download("http://127.0.0.1:1/never-requested.cab", &dest)
            .await
            .expect("skip should succeed");

        assert_eq!(outcome, DownloadOutcome::Skipped);
        assert_eq!(
            std::fs::read(&dest).expect("file should remain"),
            b"already here"
        );
    }

    #[tokio::test]
    async fn truncated_leftover_is_trusted_as_complete() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("partial.cab");
        std::fs::write(&dest, b"").expect("empty leftover should be written");

        let outcome = downloader(CancellationToken::new())
            .download("http://127.0.0.1:1/partial.cab", &dest)
            .await
            .expect("leftover should be skipped");

        assert_eq!(outcome, DownloadOutcome::Skipped);
    }

    #[tokio::test]
    async fn cancelled_download_leaves_no_file() {
        let temp = tempfile::tempdir().expect("tempdir should be created");
        let dest = temp.path().join("nested").join("cancelled.cab");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = downloader(cancel)
            .download("http://127.0.0.1:1/cancelled.cab", &dest)
            .await;

        assert!(matches!(result, Err(super::DownloadError::Cancelled { .. })));
        assert!(!dest.exists());
    }
}
