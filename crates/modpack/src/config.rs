//! Configuration types for the pipeline
//!
//! A `PipelineConfig` is built once by the caller (normally the CLI) and passed
//! by reference into every stage. Nothing in the core looks up the home
//! directory, the environment or any other ambient state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::error::{PipelineError, Result};
use crate::manifest::ReleaseType;

/// Default manifest file used when no download manifest is supplied
pub const DEFAULT_MANIFEST_FILE: &str = "manifest.json";

/// Default folder mods are written into
pub const DEFAULT_MOD_FOLDER: &str = "mods";

/// Default file name for the merge output, placed next to the first input
pub const DEFAULT_MERGE_OUTPUT: &str = "merged-manifest.json";

/// Bounded exponential backoff for catalog queries and artifact fetches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Extra attempts after the first one
    pub max_retries: usize,
    /// Initial delay between retries (doubles each retry)
    pub initial_delay: Duration,
    /// Maximum retry delay cap
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Calculate retry delay for the given retry index using exponential backoff
    pub fn get_retry_delay(&self, retry: usize) -> Duration {
        let factor = 2_u32.saturating_pow(retry.min(31) as u32);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delays to sleep before each retry, one per retry
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|retry| self.get_retry_delay(retry)).collect()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Resolved configuration the pipeline runs against
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub manifests_to_update: Vec<PathBuf>,
    pub manifests_to_download: Vec<PathBuf>,
    pub manifests_to_merge: Vec<PathBuf>,
    /// Where the merged manifest is written (defaults next to the first input)
    pub merge_output: Option<PathBuf>,
    /// Folder resolved mod files are placed in
    pub target_folder: PathBuf,
    /// Release type admitted when neither the descriptor nor the manifest names one
    pub release_type_filter: ReleaseType,
    /// Maximum number of units of work in flight at once
    pub concurrency_limit: usize,
    /// Overall deadline for the whole pipeline run
    pub timeout: Option<Duration>,
    /// Root of the artifact cache
    pub cache_dir: PathBuf,
    pub retry: RetryConfig,
}

impl PipelineConfig {
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn should_update(&self) -> bool {
        !self.manifests_to_update.is_empty()
    }

    pub fn should_download(&self) -> bool {
        !self.manifests_to_download.is_empty()
    }

    pub fn should_merge(&self) -> bool {
        !self.manifests_to_merge.is_empty()
    }

    /// Output path for the merge stage
    pub fn merge_output_path(&self) -> Option<PathBuf> {
        if let Some(ref output) = self.merge_output {
            return Some(output.clone());
        }
        self.manifests_to_merge.first().map(|first| {
            first
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(DEFAULT_MERGE_OUTPUT)
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(PipelineError::Configuration {
                message: "concurrency limit must be at least 1".to_string(),
            });
        }
        if self.should_download() && self.target_folder.as_os_str().is_empty() {
            return Err(PipelineError::Configuration {
                message: "target folder must not be empty".to_string(),
            });
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(PipelineError::Configuration {
                message: "cache directory must not be empty".to_string(),
            });
        }
        if let Some(output) = self.merge_output_path() {
            let target = same_file_key(&output);
            if self.manifests_to_merge.iter().any(|input| same_file_key(input) == target) {
                return Err(PipelineError::Configuration {
                    message: format!("merge output '{}' is also a merge input", output.display()),
                });
            }
        }
        Ok(())
    }
}

/// Comparable form of a path: resolved on disk when it exists, otherwise made
/// absolute against the working directory
fn same_file_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            manifests_to_update: Vec::new(),
            manifests_to_download: Vec::new(),
            manifests_to_merge: Vec::new(),
            merge_output: None,
            target_folder: PathBuf::from(DEFAULT_MOD_FOLDER),
            release_type_filter: ReleaseType::default(),
            concurrency_limit: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout: None,
            cache_dir: PathBuf::from(".modpack-cache"),
            retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };

        assert_eq!(
            retry.backoff_schedule(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_merge_output_defaults_next_to_first_input() {
        let config = PipelineConfig {
            manifests_to_merge: vec![PathBuf::from("packs/a.json"), PathBuf::from("b.json")],
            ..PipelineConfig::default()
        };
        assert_eq!(config.merge_output_path(), Some(PathBuf::from("packs/merged-manifest.json")));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = PipelineConfig {
            concurrency_limit: 0,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(PipelineError::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_merge_output_overwriting_input() {
        let config = PipelineConfig {
            manifests_to_merge: vec![PathBuf::from("a.json")],
            merge_output: Some(PathBuf::from("a.json")),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_compares_merge_paths_after_normalizing() {
        let spelled_differently = PipelineConfig {
            manifests_to_merge: vec![PathBuf::from("./a.json"), PathBuf::from("b.json")],
            merge_output: Some(PathBuf::from("a.json")),
            ..PipelineConfig::default()
        };
        assert!(spelled_differently.validate().is_err());

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("packs/a.json");
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        std::fs::write(&input, "{}").unwrap();
        let through_parent = PipelineConfig {
            manifests_to_merge: vec![input],
            merge_output: Some(dir.path().join("packs/../packs/a.json")),
            ..PipelineConfig::default()
        };
        assert!(through_parent.validate().is_err());

        let distinct = PipelineConfig {
            manifests_to_merge: vec![PathBuf::from("./a.json")],
            merge_output: Some(PathBuf::from("merged.json")),
            ..PipelineConfig::default()
        };
        assert!(distinct.validate().is_ok());
    }
}
