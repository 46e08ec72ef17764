//! Version resolution
//!
//! Picks the newest catalog version of a mod that passes the release-type
//! filter and supports the manifest's platform version. Recency is the publish
//! timestamp; equal timestamps fall back to comparing version strings as plain
//! strings, so `"1.2.0"` sorts above `"1.10.0"`.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::catalog::{CatalogRegistry, CatalogVersion};
use crate::config::RetryConfig;
use crate::core::error::Recoverable;
use crate::core::progress::{ProgressCallback, ProgressEvent, emit};
use crate::core::retry::retry_with_backoff;
use crate::manifest::{ModDescriptor, ReleaseType};

/// Whether the chosen version is known to support the target platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Verified,
    /// Nothing matched the platform; the newest admitted version was taken anyway
    Unverified,
}

/// Outcome of resolving one descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionResult {
    Resolved {
        version: CatalogVersion,
        compatibility: Compatibility,
    },
    NoCompatibleVersion {
        reason: String,
    },
    TransientFailure {
        attempts: usize,
        last_error: String,
    },
}

/// Filter that applies to `descriptor`: its own, else the document's, else the configured one
pub fn effective_filter(
    descriptor: &ModDescriptor,
    document_default: Option<ReleaseType>,
    configured: ReleaseType,
) -> ReleaseType {
    descriptor
        .release_type
        .or(document_default)
        .unwrap_or(configured)
}

fn newest<'a>(candidates: impl Iterator<Item = &'a CatalogVersion>) -> Option<&'a CatalogVersion> {
    candidates.max_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then_with(|| a.version.cmp(&b.version))
    })
}

/// Pick the best version from a catalog listing
///
/// Returns `None` when the filter admits nothing.
pub fn select_version<'a>(
    versions: &'a [CatalogVersion],
    filter: ReleaseType,
    platform_version: Option<&str>,
) -> Option<(&'a CatalogVersion, Compatibility)> {
    let admitted = || versions.iter().filter(move |v| filter.admits(v.release_type));

    if let Some(best) = newest(admitted().filter(|v| v.supports_platform(platform_version))) {
        return Some((best, Compatibility::Verified));
    }
    newest(admitted()).map(|best| (best, Compatibility::Unverified))
}

/// Resolves descriptors against the registered catalogs
#[derive(Clone)]
pub struct VersionResolver {
    registry: Arc<CatalogRegistry>,
    retry: RetryConfig,
    progress: Option<ProgressCallback>,
}

impl VersionResolver {
    pub fn new(registry: Arc<CatalogRegistry>, retry: RetryConfig) -> Self {
        Self {
            registry,
            retry,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn resolve(
        &self,
        descriptor: &ModDescriptor,
        filter: ReleaseType,
        platform_version: Option<&str>,
    ) -> ResolutionResult {
        let identity = &descriptor.identity;
        let subject = identity.to_string();

        let Some(catalog) = self.registry.get(&identity.source) else {
            return ResolutionResult::NoCompatibleVersion {
                reason: format!("no catalog registered for source '{}'", identity.source),
            };
        };

        emit(
            self.progress.as_ref(),
            ProgressEvent::ResolveStarted {
                identity: subject.clone(),
            },
        );

        let outcome = retry_with_backoff(&self.retry, &subject, self.progress.as_ref(), || {
            catalog.list_versions(identity)
        })
        .await;

        let versions = match outcome.result {
            Ok(versions) => versions,
            Err(e) if e.is_recoverable() => {
                warn!("Giving up on {} after {} attempts: {}", subject, outcome.attempts, e);
                return ResolutionResult::TransientFailure {
                    attempts: outcome.attempts,
                    last_error: e.to_string(),
                };
            }
            Err(e) => {
                debug!("Catalog rejected {}: {}", subject, e);
                return ResolutionResult::NoCompatibleVersion { reason: e.to_string() };
            }
        };

        match select_version(&versions, filter, platform_version) {
            Some((version, compatibility)) => {
                debug!(
                    "Selected {} {} ({:?}) from {} candidates",
                    subject,
                    version.version,
                    compatibility,
                    versions.len()
                );
                emit(
                    self.progress.as_ref(),
                    ProgressEvent::Resolved {
                        identity: subject,
                        version: version.version.clone(),
                    },
                );
                ResolutionResult::Resolved {
                    version: version.clone(),
                    compatibility,
                }
            }
            None if versions.is_empty() => ResolutionResult::NoCompatibleVersion {
                reason: "catalog lists no versions".to_string(),
            },
            None => ResolutionResult::NoCompatibleVersion {
                reason: format!("no {} or more stable version among {} published", filter, versions.len()),
            },
        }
    }
}
