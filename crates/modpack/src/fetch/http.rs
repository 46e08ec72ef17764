//! Streaming HTTP fetcher

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::ArtifactFetcher;
use crate::core::error::{FetchError, FileOperation};
use crate::core::progress::{ProgressCallback, ProgressEvent};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Downloads artifacts over HTTP(S), streaming the body to disk
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modpack-downloader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http {
                url: String::new(),
                source: e,
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, FetchError> {
        debug!("Stream downloading: {} to {}", url, dest.display());

        let http_error = |e| FetchError::Http {
            url: url.to_string(),
            source: e,
        };
        let write_error = |operation, e| FetchError::Io {
            path: dest.to_path_buf(),
            operation,
            source: e,
        };

        let response = self.client.get(url).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total_size = response.content_length();
        if let Some(ref callback) = progress {
            callback(ProgressEvent::DownloadStarted {
                url: url.to_string(),
                total_size,
            });
        }

        let mut file = fs::File::create(dest)
            .await
            .map_err(|e| write_error(FileOperation::Create, e))?;

        let mut stream = response.bytes_stream();
        let mut downloaded = 0u64;
        let start_time = Instant::now();
        let mut last_progress_time = start_time;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(http_error)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(FileOperation::Write, e))?;
            downloaded += chunk.len() as u64;

            // Report progress at most every 100ms
            let now = Instant::now();
            if now.duration_since(last_progress_time) >= PROGRESS_INTERVAL {
                if let Some(ref callback) = progress {
                    let elapsed = start_time.elapsed().as_secs_f64();
                    let speed_bps = if elapsed > 0.0 { downloaded as f64 / elapsed } else { 0.0 };
                    callback(ProgressEvent::DownloadProgress {
                        url: url.to_string(),
                        downloaded,
                        total: total_size,
                        speed_bps,
                    });
                }
                last_progress_time = now;
            }
        }

        if let Some(expected) = total_size {
            if downloaded < expected {
                return Err(FetchError::Interrupted(format!(
                    "received {} of {} bytes from {}",
                    downloaded, expected, url
                )));
            }
        }

        file.flush().await.map_err(|e| write_error(FileOperation::Write, e))?;
        file.sync_all().await.map_err(|e| write_error(FileOperation::Write, e))?;

        if let Some(ref callback) = progress {
            callback(ProgressEvent::DownloadComplete {
                url: url.to_string(),
                final_size: downloaded,
            });
        }

        debug!("Stream download completed: {} bytes", downloaded);
        Ok(downloaded)
    }
}
