//! Loading and saving manifest documents

use std::path::Path;
use tokio::fs;
use tracing::debug;

use super::ManifestDocument;
use crate::core::error::{FileOperation, PipelineError, Result};
use crate::core::files::write_atomic;

/// Load a manifest and enforce identity uniqueness
pub async fn load(path: &Path) -> Result<ManifestDocument> {
    let document = load_unchecked(path).await?;

    let duplicates = document.duplicate_identities();
    if !duplicates.is_empty() {
        let listed: Vec<String> = duplicates.iter().map(ToString::to_string).collect();
        return Err(PipelineError::MalformedManifest {
            path: path.to_path_buf(),
            reason: format!("duplicate mod identities: {}", listed.join(", ")),
        });
    }

    Ok(document)
}

/// Load a manifest that may still contain duplicate identities
///
/// Only the merge stage reads documents this way; it resolves duplicates by
/// precedence instead of rejecting them.
pub async fn load_unchecked(path: &Path) -> Result<ManifestDocument> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::MissingManifest {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(PipelineError::io(path, FileOperation::Read, e)),
    };

    let document: ManifestDocument =
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::MalformedManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    debug!("Loaded {} with {} mods", path.display(), document.mods.len());
    Ok(document)
}

/// Canonical serialized form of a document
pub fn to_bytes(document: &ManifestDocument) -> Result<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec_pretty(document).map_err(|e| PipelineError::MalformedManifest {
            path: Default::default(),
            reason: format!("could not serialize manifest: {e}"),
        })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Atomically replace the manifest at `path`
pub async fn save(document: &ManifestDocument, path: &Path) -> Result<()> {
    let bytes = to_bytes(document)?;
    write_atomic(path, bytes).await?;
    debug!("Saved {} with {} mods", path.display(), document.mods.len());
    Ok(())
}
