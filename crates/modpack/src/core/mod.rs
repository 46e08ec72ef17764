//! Core types used throughout the pipeline
//!
//! Errors, progress reporting, retry, metrics and atomic file helpers. Everything else
//! in the crate depends on these; they depend on nothing but `config` and
//! `validation`.

pub mod error;
pub mod files;
pub mod metrics;
pub mod progress;
pub mod retry;

pub use error::{CatalogError, FetchError, FileOperation, PipelineError, Recoverable, Result};
pub use metrics::{DownloadMetrics, DownloadMetricsSnapshot};
pub use progress::{
    IntoProgressCallback, NullProgressReporter, ProgressCallback, ProgressEvent, ProgressReporter,
    TracingProgressReporter,
};
pub use retry::{Attempted, retry_with_backoff};
