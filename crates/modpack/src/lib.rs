//! Mod pack manifest pipeline
//!
//! This library keeps a mod pack's manifest files in step with a remote
//! catalog and a local mods folder. It runs three independent stages:
//!
//! - **update** resolves the newest compatible version of every mod and
//!   rewrites the manifest,
//! - **download** places every resolved artifact in the target folder, going
//!   through an on-disk cache,
//! - **merge** combines several manifests into one.
//!
//! Catalog queries and artifact fetches go through the [`Catalog`] and
//! [`ArtifactFetcher`] traits. [`HttpCatalog`] and [`HttpFetcher`] are the
//! bundled implementations.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use modpack::{CatalogRegistry, HttpCatalog, HttpFetcher, Pipeline, PipelineConfig};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig {
//!     manifests_to_update: vec![PathBuf::from("manifest.json")],
//!     manifests_to_download: vec![PathBuf::from("manifest.json")],
//!     ..PipelineConfig::new("/tmp/modpack-cache")
//! };
//!
//! let catalog = HttpCatalog::new("https://api.example.com/v1/", None)?;
//! let registry = CatalogRegistry::new().register("curse", Arc::new(catalog));
//!
//! let report = Pipeline::new(config, registry, Arc::new(HttpFetcher::new()?))
//!     .run()
//!     .await?;
//! std::process::exit(report.exit_status().code() as i32);
//! # }
//! ```

pub mod cache;
pub mod catalog;
pub mod config;
pub mod core;
pub mod fetch;
pub mod manifest;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod stages;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{ArtifactCache, CacheEntry, CacheLookup};
pub use catalog::{Catalog, CatalogRegistry, CatalogVersion, HttpCatalog};
pub use config::{PipelineConfig, RetryConfig};
pub use self::core::{
    CatalogError, DownloadMetrics, DownloadMetricsSnapshot, FetchError, FileOperation, IntoProgressCallback,
    NullProgressReporter, PipelineError, ProgressCallback, ProgressEvent, ProgressReporter, Recoverable, Result,
    TracingProgressReporter,
};
pub use fetch::{ArtifactFetcher, HttpFetcher};
pub use manifest::{DIRECT_SOURCE, ManifestDocument, ModDescriptor, ModIdentity, ReleaseType};
pub use pipeline::Pipeline;
pub use report::{
    DescriptorReport, ExitStatus, Failure, FailureKind, ManifestReport, ManifestStatus, Outcome, PipelineReport,
    Stage, StageReport, Warning,
};
pub use resolver::{Compatibility, ResolutionResult, VersionResolver};
pub use stages::{DownloadStage, MergeOutcome, MergeStage, UpdateStage};
pub use validation::{FileValidation, ValidationError};
