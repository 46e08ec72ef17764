//! The update, download and merge stages
//!
//! Stages never share in-memory state: each one loads the manifests it is
//! given and hands its results on only by writing files.

pub mod download;
pub mod merge;
pub mod update;

use std::path::Path;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::error::PipelineError;
use crate::manifest::{self, ManifestDocument};
use crate::report::ManifestReport;

pub use download::DownloadStage;
pub use merge::{MergeOutcome, MergeStage, merge_documents};
pub use update::UpdateStage;

/// Load a manifest for update or download
///
/// A missing file becomes a skipped report and anything else that stops the
/// load becomes a failed report.
pub(crate) async fn load_or_report(path: &Path) -> Result<ManifestDocument, ManifestReport> {
    match manifest::load(path).await {
        Ok(document) => Ok(document),
        Err(PipelineError::MissingManifest { .. }) => {
            warn!("Manifest {} does not exist, skipping", path.display());
            Err(ManifestReport::skipped(path.to_path_buf()))
        }
        Err(e) => {
            warn!("Cannot process {}: {}", path.display(), e);
            Err(ManifestReport::failed(path.to_path_buf(), e.to_string()))
        }
    }
}

/// Wait for a worker slot unless the run is cancelled first
pub(crate) async fn acquire_slot<'a>(
    slots: &'a Semaphore,
    cancel: &CancellationToken,
) -> Result<SemaphorePermit<'a>, PipelineError> {
    let cancelled = || PipelineError::Cancelled {
        reason: "run cancelled before dispatch".to_string(),
    };
    if cancel.is_cancelled() {
        return Err(cancelled());
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(cancelled()),
        permit = slots.acquire() => permit.map_err(|_| PipelineError::Cancelled {
            reason: "worker pool closed".to_string(),
        }),
    }
}
