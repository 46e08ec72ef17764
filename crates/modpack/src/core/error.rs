//! Error types for the pipeline and its capability interfaces
//!
//! `PipelineError` is the taxonomy stages report against. `CatalogError` and
//! `FetchError` come back from the external capabilities and carry their own
//! recoverability so the retry policy can decide whether another attempt makes
//! sense.

use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationError;

/// Errors raised by the manifest store, the cache and the stages
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Document could not be parsed or lists a mod identity twice
    #[error("Manifest '{path}' is malformed: {reason}")]
    MalformedManifest { path: PathBuf, reason: String },

    /// Referenced manifest file does not exist
    #[error("Manifest '{path}' does not exist")]
    MissingManifest { path: PathBuf },

    #[error("Could not resolve '{identity}': {reason}")]
    ResolutionFailed { identity: String, reason: String },

    #[error("Download of '{identity}' failed: {reason}")]
    DownloadFailed { identity: String, reason: String },

    /// Cache entry exists but its backing artifact is gone or truncated
    #[error("Cache entry for '{identity}' at version '{version}' is corrupt: {reason}")]
    CacheCorruption {
        identity: String,
        version: String,
        reason: String,
    },

    /// File system I/O errors with file context
    #[error("File operation failed while {operation} '{path}'")]
    Io {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {message}")]
    Configuration { message: String },

    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },
}

impl PipelineError {
    pub fn io<P: Into<PathBuf>>(path: P, operation: FileOperation, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Get error category for logging and reports
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::MalformedManifest { .. } => "malformed_manifest",
            PipelineError::MissingManifest { .. } => "missing_manifest",
            PipelineError::ResolutionFailed { .. } => "resolution_failed",
            PipelineError::DownloadFailed { .. } => "download_failed",
            PipelineError::CacheCorruption { .. } => "cache_corruption",
            PipelineError::Io { .. } => "io",
            PipelineError::Configuration { .. } => "configuration",
            PipelineError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Types of file operations for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Move,
    Copy,
    Metadata,
    CreateDir,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Move => write!(f, "moving"),
            FileOperation::Copy => write!(f, "copying"),
            FileOperation::Metadata => write!(f, "reading metadata of"),
            FileOperation::CreateDir => write!(f, "creating directory"),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors a capability reports that decide whether a retry is worthwhile
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

/// Errors from a catalog's `list_versions`
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog request to '{url}' failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Catalog returned HTTP {status} for '{url}'")]
    Status { url: String, status: u16 },

    #[error("Mod '{identity}' is not known to the catalog")]
    NotFound { identity: String },

    #[error("Could not decode catalog response from '{url}': {reason}")]
    Decode { url: String, reason: String },

    #[error("Invalid catalog URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Transport-level outage reported by a catalog implementation
    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

impl Recoverable for CatalogError {
    fn is_recoverable(&self) -> bool {
        match self {
            // Only retry on network-related HTTP errors, not client errors (4xx)
            CatalogError::Http { source, .. } => source
                .status()
                .is_none_or(|status| status.is_server_error() || status.as_u16() == 429),
            CatalogError::Status { status, .. } => *status >= 500 || *status == 429,
            CatalogError::Unavailable(_) => true,
            CatalogError::NotFound { .. } => false,
            CatalogError::Decode { .. } => false,
            CatalogError::InvalidUrl { .. } => false,
        }
    }
}

/// Errors from an artifact fetch, including the integrity check that follows it
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request to '{url}' failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Server returned HTTP {status} for '{url}'")]
    Status { url: String, status: u16 },

    #[error("File operation failed while {operation} '{path}'")]
    Io {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Transfer interrupted: {0}")]
    Interrupted(String),
}

impl Recoverable for FetchError {
    fn is_recoverable(&self) -> bool {
        match self {
            FetchError::Http { source, .. } => source
                .status()
                .is_none_or(|status| status.is_server_error() || status.as_u16() == 429),
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Io { source, .. } => {
                // Retry on temporary file system issues
                matches!(
                    source.kind(),
                    std::io::ErrorKind::Interrupted
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                )
            }
            FetchError::Validation(_) => false, // Data integrity issue
            FetchError::Interrupted(_) => true,
        }
    }
}

impl From<PipelineError> for FetchError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Io {
                path,
                operation,
                source,
            } => FetchError::Io {
                path,
                operation,
                source,
            },
            other => FetchError::Interrupted(other.to_string()),
        }
    }
}
