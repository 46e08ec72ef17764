//! On-disk artifact cache keyed by mod identity and version
//!
//! Layout: `<root>/<source>/<id>/<version>/` holds an `entry.json` sidecar
//! and an `artifact/` directory with the artifact itself, so no artifact name
//! can clash with the sidecar. The sidecar is written after the artifact, so
//! its presence marks a finished entry. Entries are only ever removed by
//! [`ArtifactCache::clear`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::core::error::{FileOperation, PipelineError, Result};
use crate::core::files::{file_size, persist_temp, temp_path_beside, write_atomic};
use crate::manifest::ModIdentity;

const ENTRY_FILE: &str = "entry.json";
const ARTIFACT_DIR: &str = "artifact";

/// Metadata stored next to a cached artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(flatten)]
    pub identity: ModIdentity,
    pub version: String,
    pub file_name: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Result of looking up `(identity, version)`
#[derive(Debug)]
pub enum CacheLookup {
    Hit { entry: CacheEntry, path: PathBuf },
    Miss,
    /// An entry exists but cannot be trusted; callers treat it as a miss
    Corrupt { reason: String },
}

/// Replace anything that is not safe in a single path component
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_") + "_"
    } else {
        cleaned
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, identity: &ModIdentity, version: &str) -> PathBuf {
        self.root
            .join(sanitize(&identity.source))
            .join(sanitize(&identity.id))
            .join(sanitize(version))
    }

    fn artifact_path(&self, identity: &ModIdentity, version: &str, file_name: &str) -> PathBuf {
        self.entry_dir(identity, version)
            .join(ARTIFACT_DIR)
            .join(sanitize(file_name))
    }

    pub async fn lookup(&self, identity: &ModIdentity, version: &str) -> Result<CacheLookup> {
        let entry_path = self.entry_dir(identity, version).join(ENTRY_FILE);
        let bytes = match fs::read(&entry_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(CacheLookup::Miss),
            Err(e) => return Err(PipelineError::io(&entry_path, FileOperation::Read, e)),
        };

        let lookup = match serde_json::from_slice::<CacheEntry>(&bytes) {
            Err(e) => CacheLookup::Corrupt {
                reason: format!("unreadable entry: {e}"),
            },
            Ok(entry) => {
                let path = self.artifact_path(identity, version, &entry.file_name);
                match file_size(&path).await? {
                    None => CacheLookup::Corrupt {
                        reason: format!("artifact {} is missing", path.display()),
                    },
                    Some(actual) if actual != entry.size => CacheLookup::Corrupt {
                        reason: format!("artifact is {} bytes, entry says {}", actual, entry.size),
                    },
                    Some(_) => CacheLookup::Hit { entry, path },
                }
            }
        };

        if let CacheLookup::Corrupt { ref reason } = lookup {
            let error = PipelineError::CacheCorruption {
                identity: identity.to_string(),
                version: version.to_string(),
                reason: reason.clone(),
            };
            warn!("{}; fetching again", error);
        }
        Ok(lookup)
    }

    /// Temp file inside the artifact directory for an artifact about to be fetched
    pub async fn temp_path(&self, identity: &ModIdentity, version: &str) -> Result<TempPath> {
        temp_path_beside(&self.artifact_path(identity, version, "pending")).await
    }

    /// Move a fetched and validated artifact into place and record it
    pub async fn commit(&self, temp: TempPath, entry: CacheEntry) -> Result<PathBuf> {
        let path = self.artifact_path(&entry.identity, &entry.version, &entry.file_name);
        persist_temp(temp, &path).await?;

        let entry_path = self.entry_dir(&entry.identity, &entry.version).join(ENTRY_FILE);
        let bytes = serde_json::to_vec_pretty(&entry).map_err(|e| PipelineError::CacheCorruption {
            identity: entry.identity.to_string(),
            version: entry.version.clone(),
            reason: format!("could not serialize entry: {e}"),
        })?;
        write_atomic(&entry_path, bytes).await?;

        debug!("Cached {} {} at {}", entry.identity, entry.version, path.display());
        Ok(path)
    }

    /// Remove every entry
    pub async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                info!("Cleared cache at {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::io(&self.root, FileOperation::Delete, e)),
        }
    }
}
