//! Artifact fetch capability

pub mod http;

use async_trait::async_trait;
use std::path::Path;

use crate::core::error::FetchError;
use crate::core::progress::ProgressCallback;

pub use http::HttpFetcher;

/// Fetches the bytes behind a resolved download URL
///
/// Implementations write the whole artifact to `dest`, truncating anything
/// already there, and return the number of bytes written. Retrying and
/// integrity checks are the caller's concern.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, FetchError>;
}
