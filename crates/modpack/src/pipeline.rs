//! Stage orchestration
//!
//! Runs the enabled stages in the fixed order update, download, merge. A
//! timeout or an external cancellation stops new work from being dispatched;
//! stages that have not started by then are reported as cancelled.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::catalog::CatalogRegistry;
use crate::config::PipelineConfig;
use crate::core::error::Result;
use crate::core::progress::ProgressCallback;
use crate::fetch::ArtifactFetcher;
use crate::report::{PipelineReport, Stage, StageReport};
use crate::resolver::VersionResolver;
use crate::stages::{DownloadStage, MergeStage, UpdateStage};

pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<CatalogRegistry>,
    fetcher: Arc<dyn ArtifactFetcher>,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, registry: CatalogRegistry, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
            fetcher,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this pipeline when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every enabled stage
    ///
    /// Only an invalid configuration is returned as an error; everything else
    /// ends up in the report.
    pub async fn run(&self) -> Result<PipelineReport> {
        self.config.validate()?;

        let run_token = self.cancel.child_token();
        let watchdog = self.config.timeout.map(|timeout| {
            let token = run_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                warn!("Timeout of {:?} elapsed, no further work will be started", timeout);
                token.cancel();
            })
        });

        let mut report = PipelineReport::default();

        if self.config.should_update() {
            let stage = if run_token.is_cancelled() {
                cancelled(Stage::Update)
            } else {
                let resolver = VersionResolver::new(self.registry.clone(), self.config.retry.clone())
                    .with_progress(self.progress.clone());
                UpdateStage::new(resolver, &self.config)
                    .with_cancellation(run_token.clone())
                    .run(&self.config.manifests_to_update)
                    .await
            };
            report.stages.push(stage);
        }

        if self.config.should_download() {
            let stage = if run_token.is_cancelled() {
                cancelled(Stage::Download)
            } else {
                DownloadStage::new(self.fetcher.clone(), &self.config)
                    .with_progress(self.progress.clone())
                    .with_cancellation(run_token.clone())
                    .run(&self.config.manifests_to_download)
                    .await
            };
            report.stages.push(stage);
        }

        if let Some(output) = self.config.merge_output_path().filter(|_| self.config.should_merge()) {
            let stage = if run_token.is_cancelled() {
                cancelled(Stage::Merge)
            } else {
                MergeStage::new().run(&self.config.manifests_to_merge, &output).await
            };
            report.stages.push(stage);
        }

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }

        info!("Pipeline finished with status {:?}", report.exit_status());
        Ok(report)
    }
}

fn cancelled(stage: Stage) -> StageReport {
    warn!("Skipping {} stage, run was cancelled", stage);
    StageReport {
        cancelled: true,
        ..StageReport::new(stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{FetchError, PipelineError};
    use crate::manifest::{self, ManifestDocument, ModDescriptor, ModIdentity, ReleaseType};
    use crate::report::{ExitStatus, Outcome};
    use crate::test_support::{CountingFetcher, FakeCatalog, catalog_version, fast_retry};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            target_folder: dir.join("mods"),
            cache_dir: dir.join("cache"),
            concurrency_limit: 2,
            retry: fast_retry(1),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn test_update_download_merge() {
        let dir = tempdir().unwrap();
        let pack = dir.path().join("pack.json");
        let extras = dir.path().join("extras.json");
        manifest::save(
            &ManifestDocument::new()
                .with_platform_version("1.12.2")
                .with_mod(ModDescriptor::new(ModIdentity::new("curse", "1")).with_version("1.0")),
            &pack,
        )
        .await
        .unwrap();
        manifest::save(
            &ManifestDocument::new().with_mod(ModDescriptor::new(ModIdentity::new("curse", "2"))),
            &extras,
        )
        .await
        .unwrap();

        let catalog = FakeCatalog::new().with_versions("1", vec![catalog_version("1.1", ReleaseType::Stable, 5)]);
        let fetcher = Arc::new(CountingFetcher::new().with_body("https://cdn.example.com/1.1.jar", b"one"));
        let config = PipelineConfig {
            manifests_to_update: vec![pack.clone()],
            manifests_to_download: vec![pack.clone()],
            manifests_to_merge: vec![pack.clone(), extras.clone()],
            ..config_in(dir.path())
        };

        let pipeline = Pipeline::new(config, CatalogRegistry::new().register("curse", Arc::new(catalog)), fetcher.clone());
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.exit_status(), ExitStatus::Success);
        assert_eq!(
            tokio::fs::read(dir.path().join("mods").join("1.1.jar")).await.unwrap(),
            b"one"
        );

        let merged = manifest::load(&dir.path().join("merged-manifest.json")).await.unwrap();
        assert_eq!(merged.mods.len(), 2);
        assert_eq!(merged.mods[0].version.as_deref(), Some("1.1"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_an_error() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            concurrency_limit: 0,
            ..config_in(dir.path())
        };
        let pipeline = Pipeline::new(config, CatalogRegistry::new(), Arc::new(CountingFetcher::new()));

        assert!(matches!(pipeline.run().await, Err(PipelineError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let config = PipelineConfig {
            manifests_to_update: vec![dir.path().join("a.json")],
            manifests_to_merge: vec![dir.path().join("a.json")],
            ..config_in(dir.path())
        };
        let pipeline = Pipeline::new(config, CatalogRegistry::new(), Arc::new(CountingFetcher::new()));
        pipeline.cancellation_token().cancel();

        let report = pipeline.run().await.unwrap();

        assert!(report.stages.iter().all(|stage| stage.cancelled));
        assert_eq!(report.exit_status(), ExitStatus::PartialFailure);
        assert!(!dir.path().join("merged-manifest.json").exists());
    }

    struct SlowFetcher {
        inner: CountingFetcher,
        delay: Duration,
    }

    #[async_trait]
    impl ArtifactFetcher for SlowFetcher {
        async fn fetch(&self, url: &str, dest: &Path, progress: Option<ProgressCallback>) -> std::result::Result<u64, FetchError> {
            tokio::time::sleep(self.delay).await;
            self.inner.fetch(url, dest, progress).await
        }
    }

    #[tokio::test]
    async fn test_timeout_lets_in_flight_work_finish() {
        let dir = tempdir().unwrap();
        let pack: PathBuf = dir.path().join("pack.json");
        let mut document = ManifestDocument::new();
        for id in ["1", "2"] {
            document = document.with_mod(
                ModDescriptor::new(ModIdentity::new("curse", id))
                    .with_version("1.0")
                    .with_url(format!("https://cdn.example.com/{id}.jar")),
            );
        }
        manifest::save(&document, &pack).await.unwrap();

        let fetcher = Arc::new(SlowFetcher {
            inner: CountingFetcher::new()
                .with_body("https://cdn.example.com/1.jar", b"one")
                .with_body("https://cdn.example.com/2.jar", b"two"),
            delay: Duration::from_millis(200),
        });
        let config = PipelineConfig {
            manifests_to_download: vec![pack],
            concurrency_limit: 1,
            timeout: Some(Duration::from_millis(50)),
            ..config_in(dir.path())
        };

        let report = Pipeline::new(config, CatalogRegistry::new(), fetcher.clone()).run().await.unwrap();
        let outcomes: Vec<_> = report.stages[0].manifests[0]
            .descriptors
            .iter()
            .map(|d| d.outcome.clone())
            .collect();

        assert!(matches!(outcomes[0], Outcome::Downloaded { .. }));
        assert_eq!(outcomes[1], Outcome::Cancelled);
        assert!(report.stages[0].cancelled);
        assert_eq!(fetcher.inner.calls(), 1);
        assert_eq!(report.exit_status(), ExitStatus::PartialFailure);
    }
}
