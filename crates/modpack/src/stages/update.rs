//! Update stage: resolve every descriptor and write the new versions back

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{acquire_slot, load_or_report};
use crate::catalog::CatalogVersion;
use crate::config::PipelineConfig;
use crate::core::error::PipelineError;
use crate::manifest::{self, ModDescriptor, ModIdentity, ReleaseType};
use crate::report::{DescriptorReport, ManifestReport, ManifestStatus, Outcome, Stage, StageReport, Warning};
use crate::resolver::{Compatibility, ResolutionResult, VersionResolver, effective_filter};

pub struct UpdateStage {
    resolver: VersionResolver,
    release_type_filter: ReleaseType,
    concurrency_limit: usize,
    slots: Semaphore,
    cancel: CancellationToken,
}

impl UpdateStage {
    pub fn new(resolver: VersionResolver, config: &PipelineConfig) -> Self {
        let concurrency_limit = config.concurrency_limit.max(1);
        Self {
            resolver,
            release_type_filter: config.release_type_filter,
            concurrency_limit,
            slots: Semaphore::new(concurrency_limit),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, manifest_paths: &[PathBuf]) -> StageReport {
        info!("Updating {} manifest(s)", manifest_paths.len());

        let manifests: Vec<ManifestReport> = stream::iter(manifest_paths)
            .map(|path| self.update_manifest(path))
            .buffered(self.concurrency_limit)
            .collect()
            .await;

        let report = StageReport {
            stage: Stage::Update,
            manifests,
            cancelled: self.cancel.is_cancelled(),
        };
        info!(
            "Update finished: {} failure(s), {} warning(s)",
            report.descriptor_failures(),
            report.warning_count()
        );
        report
    }

    async fn update_manifest(&self, path: &Path) -> ManifestReport {
        let mut document = match load_or_report(path).await {
            Ok(document) => document,
            Err(report) => return report,
        };

        let platform_version = document.platform_version.clone();
        let document_filter = document.release_type;
        let results: Vec<(DescriptorReport, Option<CatalogVersion>)> = stream::iter(&document.mods)
            .map(|descriptor| self.update_descriptor(descriptor, document_filter, platform_version.as_deref()))
            .buffered(self.concurrency_limit)
            .collect()
            .await;

        let mut report = ManifestReport::new(path.to_path_buf());
        let mut changed = false;
        for (descriptor, (entry, resolved)) in document.mods.iter_mut().zip(results) {
            if let Some(version) = resolved {
                let before = descriptor.clone();
                descriptor.apply_resolution(&version);
                changed |= *descriptor != before;
            }
            report.descriptors.push(entry);
        }

        if changed {
            if let Err(e) = manifest::save(&document, path).await {
                warn!("Failed to save {}: {}", path.display(), e);
                report.status = ManifestStatus::Failed { reason: e.to_string() };
            }
        } else {
            debug!("{} is already up to date, not rewriting", path.display());
        }

        report
    }

    async fn update_descriptor(
        &self,
        descriptor: &ModDescriptor,
        document_filter: Option<ReleaseType>,
        platform_version: Option<&str>,
    ) -> (DescriptorReport, Option<CatalogVersion>) {
        let identity = descriptor.identity.clone();

        if descriptor.skip_update {
            let outcome = Outcome::Skipped {
                reason: "skipUpdate is set".to_string(),
            };
            return (DescriptorReport::new(identity, outcome), None);
        }
        if identity.is_direct() {
            let outcome = Outcome::Skipped {
                reason: "direct download, nothing to resolve".to_string(),
            };
            return (DescriptorReport::new(identity, outcome), None);
        }

        let _slot = match acquire_slot(&self.slots, &self.cancel).await {
            Ok(slot) => slot,
            Err(cancelled) => return (DescriptorReport::new(identity, cancelled.into()), None),
        };

        let filter = effective_filter(descriptor, document_filter, self.release_type_filter);
        match self.resolver.resolve(descriptor, filter, platform_version).await {
            ResolutionResult::Resolved { version, compatibility } => {
                let to = version.version.clone();
                let outcome = if descriptor.version.as_deref() == Some(to.as_str()) {
                    Outcome::Unchanged { version: to.clone() }
                } else {
                    Outcome::Updated {
                        from: descriptor.version.clone(),
                        to: to.clone(),
                    }
                };

                let mut report = DescriptorReport::new(identity, outcome);
                if compatibility == Compatibility::Unverified {
                    let platform_version = platform_version.unwrap_or_default().to_string();
                    warn!(
                        "{}: {} is not declared compatible with {}",
                        report.identity, to, platform_version
                    );
                    report = report.with_warning(Warning::CompatibilityUnverified {
                        platform_version,
                        version: to,
                    });
                }
                (report, Some(version))
            }
            ResolutionResult::NoCompatibleVersion { reason } => (resolution_failed(identity, reason), None),
            ResolutionResult::TransientFailure { attempts, last_error } => {
                let reason = format!("gave up after {} attempts: {}", attempts, last_error);
                (resolution_failed(identity, reason), None)
            }
        }
    }
}

fn resolution_failed(identity: ModIdentity, reason: String) -> DescriptorReport {
    let error = PipelineError::ResolutionFailed {
        identity: identity.to_string(),
        reason,
    };
    warn!("{}", error);
    DescriptorReport::new(identity, error.into())
}
