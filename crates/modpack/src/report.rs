//! Per-descriptor outcomes and the reports stages return
//!
//! Failures and warnings are both recorded; only failures affect the exit
//! status.

use std::fmt;
use std::path::PathBuf;

use crate::core::error::PipelineError;
use crate::manifest::ModIdentity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Update,
    Download,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Update => write!(f, "update"),
            Stage::Download => write!(f, "download"),
            Stage::Merge => write!(f, "merge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ResolutionFailed,
    DownloadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub reason: String,
}

impl Failure {
    pub fn resolution<S: Into<String>>(reason: S) -> Self {
        Self {
            kind: FailureKind::ResolutionFailed,
            reason: reason.into(),
        }
    }

    pub fn download<S: Into<String>>(reason: S) -> Self {
        Self {
            kind: FailureKind::DownloadFailed,
            reason: reason.into(),
        }
    }
}

/// What happened to one descriptor in one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Updated { from: Option<String>, to: String },
    Unchanged { version: String },
    Downloaded { bytes: u64 },
    CacheHit,
    AlreadyPresent,
    /// Lost a filename collision to a later descriptor
    Superseded { by: ModIdentity },
    Skipped { reason: String },
    Merged { version: Option<String> },
    Failed(Failure),
    /// Never dispatched because the run was cancelled
    Cancelled,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::Cancelled)
    }
}

/// Store, cache and I/O errors met while placing an artifact count as
/// download failures.
impl From<PipelineError> for Outcome {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Cancelled { .. } => Outcome::Cancelled,
            PipelineError::ResolutionFailed { reason, .. } => Outcome::Failed(Failure::resolution(reason)),
            PipelineError::DownloadFailed { reason, .. } => Outcome::Failed(Failure::download(reason)),
            other => Outcome::Failed(Failure::download(other.to_string())),
        }
    }
}

/// Recorded conditions that are not failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    CompatibilityUnverified {
        platform_version: String,
        version: String,
    },
    FilenameCollision {
        file_name: String,
        overwritten: Vec<ModIdentity>,
    },
    MergeConflict {
        kept_version: Option<String>,
        kept_from: PathBuf,
        discarded_version: Option<String>,
        discarded_from: PathBuf,
    },
    /// A document-level field differed between merge inputs
    MetadataConflict {
        field: String,
        kept: String,
        discarded: String,
    },
    MissingManifest,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::CompatibilityUnverified {
                platform_version,
                version,
            } => write!(
                f,
                "version {} is not declared compatible with platform {}",
                version, platform_version
            ),
            Warning::FilenameCollision { file_name, overwritten } => {
                let names: Vec<String> = overwritten.iter().map(ToString::to_string).collect();
                write!(f, "{} overwrites the file from {}", file_name, names.join(", "))
            }
            Warning::MergeConflict {
                kept_version,
                kept_from,
                discarded_version,
                discarded_from,
            } => write!(
                f,
                "kept version {} from {}, discarded {} from {}",
                kept_version.as_deref().unwrap_or("<none>"),
                kept_from.display(),
                discarded_version.as_deref().unwrap_or("<none>"),
                discarded_from.display()
            ),
            Warning::MetadataConflict { field, kept, discarded } => {
                write!(f, "{} conflict: kept {}, discarded {}", field, kept, discarded)
            }
            Warning::MissingManifest => write!(f, "manifest does not exist, skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorReport {
    pub identity: ModIdentity,
    pub outcome: Outcome,
    pub warnings: Vec<Warning>,
}

impl DescriptorReport {
    pub fn new(identity: ModIdentity, outcome: Outcome) -> Self {
        Self {
            identity,
            outcome,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: Warning) -> Self {
        self.warnings.push(warning);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestStatus {
    Completed,
    /// Manifest was absent; not a failure for update and download
    Skipped,
    /// Structural failure that stopped processing of this manifest
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestReport {
    pub path: PathBuf,
    pub status: ManifestStatus,
    pub descriptors: Vec<DescriptorReport>,
    pub warnings: Vec<Warning>,
}

impl ManifestReport {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            status: ManifestStatus::Completed,
            descriptors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn skipped(path: PathBuf) -> Self {
        Self {
            status: ManifestStatus::Skipped,
            warnings: vec![Warning::MissingManifest],
            ..Self::new(path)
        }
    }

    pub fn failed<S: Into<String>>(path: PathBuf, reason: S) -> Self {
        Self {
            status: ManifestStatus::Failed { reason: reason.into() },
            ..Self::new(path)
        }
    }

    pub fn find(&self, identity: &ModIdentity) -> Option<&DescriptorReport> {
        self.descriptors.iter().find(|report| &report.identity == identity)
    }

    pub fn failures(&self) -> impl Iterator<Item = &DescriptorReport> {
        self.descriptors.iter().filter(|report| report.outcome.is_failure())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    pub manifests: Vec<ManifestReport>,
    /// Set when the run was cancelled before or during this stage
    pub cancelled: bool,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            manifests: Vec::new(),
            cancelled: false,
        }
    }

    pub fn manifest(&self, path: &std::path::Path) -> Option<&ManifestReport> {
        self.manifests.iter().find(|report| report.path == path)
    }

    pub fn descriptor_failures(&self) -> usize {
        self.manifests.iter().map(|m| m.failures().count()).sum()
    }

    pub fn has_fatal(&self) -> bool {
        self.manifests
            .iter()
            .any(|m| matches!(m.status, ManifestStatus::Failed { .. }))
    }

    pub fn warning_count(&self) -> usize {
        self.manifests
            .iter()
            .map(|m| m.warnings.len() + m.descriptors.iter().map(|d| d.warnings.len()).sum::<usize>())
            .sum()
    }
}

/// Process-level result of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    /// Every stage ran but some descriptors failed or were cancelled
    PartialFailure,
    /// A manifest-level failure stopped part of a stage
    Fatal,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::PartialFailure => 1,
            ExitStatus::Fatal => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.stages.iter().any(StageReport::has_fatal) {
            ExitStatus::Fatal
        } else if self
            .stages
            .iter()
            .any(|s| s.cancelled || s.descriptor_failures() > 0)
        {
            ExitStatus::PartialFailure
        } else {
            ExitStatus::Success
        }
    }
}
