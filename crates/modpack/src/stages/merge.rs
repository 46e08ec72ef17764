//! Merge stage: combine several manifests into one
//!
//! Descriptors are unioned by identity. An identity keeps the position where
//! it first appeared, but its content comes from the last manifest in the
//! supplied order that declares it. Every input must load; a missing or
//! malformed input aborts the merge before anything is written.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::error::{PipelineError, Result};
use crate::manifest::{self, ManifestDocument, ModIdentity};
use crate::report::{DescriptorReport, ManifestReport, Outcome, Stage, StageReport, Warning};

/// Merged document together with its report
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub document: ManifestDocument,
    pub report: ManifestReport,
}

fn merge_field<T: Clone + PartialEq + ToString>(
    merged: &mut Option<T>,
    incoming: &Option<T>,
    field: &str,
    warnings: &mut Vec<Warning>,
) {
    let Some(incoming) = incoming else {
        return;
    };
    if let Some(previous) = merged.as_ref() {
        if previous != incoming {
            warnings.push(Warning::MetadataConflict {
                field: field.to_string(),
                kept: incoming.to_string(),
                discarded: previous.to_string(),
            });
        }
    }
    *merged = Some(incoming.clone());
}

/// Union `inputs` in order; later inputs take precedence
pub fn merge_documents(inputs: Vec<(PathBuf, ManifestDocument)>, output: &Path) -> MergeOutcome {
    let mut merged = ManifestDocument::new();
    let mut report = ManifestReport::new(output.to_path_buf());
    let mut positions: HashMap<ModIdentity, (usize, PathBuf)> = HashMap::new();

    for (source, document) in inputs {
        merge_field(
            &mut merged.platform_version,
            &document.platform_version,
            "platformVersion",
            &mut report.warnings,
        );
        merge_field(&mut merged.release_type, &document.release_type, "releaseType", &mut report.warnings);
        merged.extra.extend(document.extra);

        for descriptor in document.mods {
            let identity = descriptor.identity.clone();
            let outcome = Outcome::Merged {
                version: descriptor.version.clone(),
            };

            match positions.get_mut(&identity) {
                Some((position, previous_source)) => {
                    let discarded = std::mem::replace(&mut merged.mods[*position], descriptor);
                    let entry = &mut report.descriptors[*position];
                    if discarded.version != merged.mods[*position].version {
                        let warning = Warning::MergeConflict {
                            kept_version: merged.mods[*position].version.clone(),
                            kept_from: source.clone(),
                            discarded_version: discarded.version,
                            discarded_from: previous_source.clone(),
                        };
                        warn!("Merge conflict for {}: {}", identity, warning);
                        entry.warnings.push(warning);
                    }
                    entry.outcome = outcome;
                    *previous_source = source.clone();
                }
                None => {
                    positions.insert(identity.clone(), (merged.mods.len(), source.clone()));
                    merged.mods.push(descriptor);
                    report.descriptors.push(DescriptorReport::new(identity, outcome));
                }
            }
        }
    }

    for warning in &report.warnings {
        warn!("Merge: {}", warning);
    }
    MergeOutcome {
        document: merged,
        report,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStage;

impl MergeStage {
    pub fn new() -> Self {
        Self
    }

    /// Load every input, merge, and save the result to `output`
    pub async fn merge(&self, manifest_paths: &[PathBuf], output: &Path) -> Result<MergeOutcome> {
        let mut inputs = Vec::with_capacity(manifest_paths.len());
        for path in manifest_paths {
            inputs.push((path.clone(), manifest::load_unchecked(path).await?));
        }

        let outcome = merge_documents(inputs, output);
        manifest::save(&outcome.document, output).await?;

        info!(
            "Merged {} manifest(s) into {} ({} mods)",
            manifest_paths.len(),
            output.display(),
            outcome.document.mods.len()
        );
        Ok(outcome)
    }

    pub async fn run(&self, manifest_paths: &[PathBuf], output: &Path) -> StageReport {
        let mut stage = StageReport::new(Stage::Merge);
        let report = match self.merge(manifest_paths, output).await {
            Ok(outcome) => outcome.report,
            Err(e) => {
                warn!("Merge aborted, nothing written: {}", e);
                let reason = match &e {
                    PipelineError::MissingManifest { .. } | PipelineError::MalformedManifest { .. } => {
                        e.to_string()
                    }
                    _ => format!("{} ({})", e, e.category()),
                };
                ManifestReport::failed(output.to_path_buf(), reason)
            }
        };
        debug!("Merge report: {} descriptor(s)", report.descriptors.len());
        stage.manifests.push(report);
        stage
    }
}
