//! Download stage: place every resolved artifact in the target folder
//!
//! Artifacts come from the cache when possible and are fetched into it
//! otherwise. Filename collisions are settled before any work is dispatched:
//! the descriptor that comes last (manifest order, then list order) owns the
//! file and the others are marked superseded.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::load_or_report;
use crate::cache::{ArtifactCache, CacheEntry, CacheLookup};
use crate::config::{PipelineConfig, RetryConfig};
use crate::core::error::{FetchError, PipelineError};
use crate::core::files::{copy_atomic, file_size};
use crate::core::metrics::{DownloadMetrics, DownloadMetricsSnapshot};
use crate::core::progress::{ProgressCallback, ProgressEvent, emit};
use crate::core::retry::retry_with_backoff;
use crate::fetch::ArtifactFetcher;
use crate::manifest::{ModDescriptor, ModIdentity};
use crate::report::{DescriptorReport, ManifestReport, Outcome, Stage, StageReport, Warning};
use crate::validation::{FileValidation, xxhash64_file};

/// One descriptor scheduled for download
struct Unit {
    sequence: usize,
    manifest: usize,
    descriptor: ModDescriptor,
    /// Set when a later descriptor writes the same file
    superseded_by: Option<ModIdentity>,
    /// Identities whose file this unit overwrites
    overwrites: Vec<ModIdentity>,
}

/// Assign every filename to the unit with the highest sequence number
fn plan_collisions(units: &mut [Unit]) -> HashMap<String, usize> {
    let mut owners: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, unit) in units.iter().enumerate() {
        if unit.descriptor.skip_download || !unit.descriptor.is_resolved() {
            continue;
        }
        if let Some(file_name) = unit.descriptor.output_file_name() {
            owners.entry(file_name).or_default().push(index);
        }
    }

    let mut collisions = HashMap::new();
    for (file_name, indices) in owners {
        // indices are ascending in sequence order
        let Some((&winner, losers)) = indices.split_last() else {
            continue;
        };
        if losers.is_empty() {
            continue;
        }
        let winner_identity = units[winner].descriptor.identity.clone();
        for &loser in losers {
            units[loser].superseded_by = Some(winner_identity.clone());
            let overwritten = units[loser].descriptor.identity.clone();
            units[winner].overwrites.push(overwritten);
        }
        collisions.insert(file_name, winner);
    }
    collisions
}

/// Whether `target` already holds the bytes of the cached artifact at `cached`
async fn target_matches(entry: &CacheEntry, cached: &Path, target: &Path) -> Result<bool, FetchError> {
    if file_size(target).await? != Some(entry.size) {
        return Ok(false);
    }
    let checksum = match entry.checksum {
        Some(ref checksum) => checksum.clone(),
        None => xxhash64_file(cached).await?,
    };
    let validation = FileValidation::new()
        .with_expected_size(entry.size)
        .with_xxhash64_base64(checksum);
    match validation.validate_file(target).await {
        Ok(_) => Ok(true),
        Err(e) => {
            debug!("Replacing {}: {}", target.display(), e);
            Ok(false)
        }
    }
}

/// A file name that stays inside the target folder
fn is_plain_file_name(file_name: &str) -> bool {
    let mut components = Path::new(file_name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

pub struct DownloadStage {
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: ArtifactCache,
    target_folder: PathBuf,
    concurrency_limit: usize,
    retry: RetryConfig,
    progress: Option<ProgressCallback>,
    cancel: CancellationToken,
    metrics: DownloadMetrics,
}

impl DownloadStage {
    pub fn new(fetcher: Arc<dyn ArtifactFetcher>, config: &PipelineConfig) -> Self {
        Self {
            fetcher,
            cache: ArtifactCache::new(&config.cache_dir),
            target_folder: config.target_folder.clone(),
            concurrency_limit: config.concurrency_limit.max(1),
            retry: config.retry.clone(),
            progress: None,
            cancel: CancellationToken::new(),
            metrics: DownloadMetrics::default(),
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn metrics(&self) -> DownloadMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn run(&self, manifest_paths: &[PathBuf]) -> StageReport {
        info!(
            "Downloading mods from {} manifest(s) into {}",
            manifest_paths.len(),
            self.target_folder.display()
        );

        let mut manifests = Vec::with_capacity(manifest_paths.len());
        let mut units = Vec::new();
        for path in manifest_paths {
            match load_or_report(path).await {
                Ok(document) => {
                    let manifest = manifests.len();
                    manifests.push(ManifestReport::new(path.clone()));
                    for descriptor in document.mods {
                        units.push(Unit {
                            sequence: units.len(),
                            manifest,
                            descriptor,
                            superseded_by: None,
                            overwrites: Vec::new(),
                        });
                    }
                }
                Err(report) => manifests.push(report),
            }
        }

        let collisions = plan_collisions(&mut units);
        if !collisions.is_empty() {
            debug!("{} file name collision(s) planned", collisions.len());
        }

        let mut results: Vec<(usize, usize, DescriptorReport)> = stream::iter(units)
            .map(|unit| async move {
                let report = self.process(&unit).await;
                (unit.sequence, unit.manifest, report)
            })
            .buffer_unordered(self.concurrency_limit)
            .collect()
            .await;
        results.sort_by_key(|(sequence, _, _)| *sequence);

        for (_, manifest, report) in results {
            manifests[manifest].descriptors.push(report);
        }

        let report = StageReport {
            stage: Stage::Download,
            manifests,
            cancelled: self.cancel.is_cancelled(),
        };

        let metrics = self.metrics.snapshot();
        info!(
            "Download finished: {} fetched ({:.0}% of attempts), {} from cache, {} already present, {} failed, {} bytes, {} retries",
            metrics.fetches_completed,
            metrics.success_rate() * 100.0,
            metrics.cache_hits,
            metrics.already_present,
            metrics.failed_downloads,
            metrics.total_bytes,
            metrics.retries_attempted
        );
        report
    }

    async fn process(&self, unit: &Unit) -> DescriptorReport {
        let descriptor = &unit.descriptor;
        let identity = descriptor.identity.clone();

        if descriptor.skip_download {
            let outcome = Outcome::Skipped {
                reason: "skipDownload is set".to_string(),
            };
            return DescriptorReport::new(identity, outcome);
        }
        if let Some(ref winner) = unit.superseded_by {
            debug!("{} is superseded by {}", identity, winner);
            return DescriptorReport::new(identity, Outcome::Superseded { by: winner.clone() });
        }
        if self.cancel.is_cancelled() {
            let cancelled = PipelineError::Cancelled {
                reason: "run cancelled before dispatch".to_string(),
            };
            return DescriptorReport::new(identity, cancelled.into());
        }

        let (Some(version), Some(url)) = (descriptor.version.as_deref(), descriptor.url.as_deref()) else {
            return self.fail(identity, "descriptor is not resolved".to_string());
        };
        let Some(file_name) = descriptor.output_file_name() else {
            return self.fail(identity, format!("cannot derive a file name from '{}'", url));
        };
        if !is_plain_file_name(&file_name) {
            return self.fail(identity, format!("refusing to write outside the target folder: '{}'", file_name));
        }

        let target = self.target_folder.join(&file_name);
        let mut report = match self.acquire(descriptor, version, url, &file_name, &target).await {
            Ok(outcome) => DescriptorReport::new(identity, outcome),
            Err(e) => {
                if matches!(e, FetchError::Validation(_)) {
                    self.metrics.record_validation_failed();
                }
                return self.fail(identity, e.to_string());
            }
        };

        if !unit.overwrites.is_empty() {
            let warning = Warning::FilenameCollision {
                file_name,
                overwritten: unit.overwrites.clone(),
            };
            warn!("{}: {}", report.identity, warning);
            emit(
                self.progress.as_ref(),
                ProgressEvent::Warning {
                    subject: report.identity.to_string(),
                    message: warning.to_string(),
                },
            );
            report = report.with_warning(warning);
        }
        report
    }

    fn fail(&self, identity: ModIdentity, reason: String) -> DescriptorReport {
        self.metrics.record_download_failed();
        emit(
            self.progress.as_ref(),
            ProgressEvent::Error {
                subject: identity.to_string(),
                error: reason.clone(),
            },
        );
        let error = PipelineError::DownloadFailed {
            identity: identity.to_string(),
            reason,
        };
        warn!("{}", error);
        DescriptorReport::new(identity, error.into())
    }

    async fn acquire(
        &self,
        descriptor: &ModDescriptor,
        version: &str,
        url: &str,
        file_name: &str,
        target: &Path,
    ) -> Result<Outcome, FetchError> {
        let identity = &descriptor.identity;

        if let CacheLookup::Hit { entry, path } = self.cache.lookup(identity, version).await? {
            if target_matches(&entry, &path, target).await? {
                debug!("{} is already present at {}", identity, target.display());
                self.metrics.record_already_present();
                return Ok(Outcome::AlreadyPresent);
            }

            let copied = copy_atomic(&path, target).await?;
            self.metrics.record_cache_hit(copied);
            emit(
                self.progress.as_ref(),
                ProgressEvent::CacheHit {
                    identity: identity.to_string(),
                    version: version.to_string(),
                },
            );
            return Ok(Outcome::CacheHit);
        }

        let validation = descriptor.validation();
        let cache = &self.cache;
        let fetcher = self.fetcher.as_ref();
        let progress = self.progress.as_ref();
        let validation = &validation;

        self.metrics.record_fetch_started();
        let fetched = retry_with_backoff(&self.retry, url, progress, move || async move {
            let temp = cache.temp_path(identity, version).await?;
            fetcher.fetch(url, &temp, progress.cloned()).await?;
            let size = validation.validate_file(&temp).await?;
            Ok::<_, FetchError>((temp, size))
        })
        .await;
        self.metrics.record_retries(fetched.attempts.saturating_sub(1) as u64);
        let (temp, size) = fetched.result?;

        let entry = CacheEntry {
            identity: identity.clone(),
            version: version.to_string(),
            file_name: file_name.to_string(),
            size,
            checksum: descriptor.checksum.clone(),
        };
        let cached = self.cache.commit(temp, entry).await?;
        copy_atomic(&cached, target).await?;

        self.metrics.record_fetch_completed(size);
        Ok(Outcome::Downloaded { bytes: size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{self, ManifestDocument};
    use crate::report::FailureKind;
    use crate::test_support::{CountingFetcher, fast_retry, resolved};
    use crate::validation::xxhash64_base64;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        dir: TempDir,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            let config = PipelineConfig {
                target_folder: dir.path().join("mods"),
                cache_dir: dir.path().join("cache"),
                concurrency_limit: 4,
                retry: fast_retry(2),
                ..PipelineConfig::default()
            };
            Self { dir, config }
        }

        async fn manifest(&self, name: &str, mods: Vec<ModDescriptor>) -> PathBuf {
            let path = self.dir.path().join(name);
            let mut document = ManifestDocument::new();
            document.mods = mods;
            manifest::save(&document, &path).await.unwrap();
            path
        }

        fn stage(&self, fetcher: Arc<CountingFetcher>) -> DownloadStage {
            DownloadStage::new(fetcher, &self.config)
        }

        fn target(&self, file_name: &str) -> PathBuf {
            self.config.target_folder.join(file_name)
        }
    }

    const JEI_URL: &str = "https://cdn.example.com/files/jei-4.16.jar";
    const JEI_BYTES: &[u8] = b"jei artifact";

    #[tokio::test]
    async fn test_fetches_then_serves_from_cache() {
        let fixture = Fixture::new();
        let path = fixture.manifest("manifest.json", vec![resolved("238222", "4.16", JEI_URL)]).await;
        let fetcher = Arc::new(CountingFetcher::new().with_body(JEI_URL, JEI_BYTES));

        let first = fixture.stage(fetcher.clone()).run(&[path.clone()]).await;
        assert_eq!(
            first.manifests[0].descriptors[0].outcome,
            Outcome::Downloaded {
                bytes: JEI_BYTES.len() as u64
            }
        );
        assert_eq!(tokio::fs::read(fixture.target("jei-4.16.jar")).await.unwrap(), JEI_BYTES);
        assert!(fixture.config.cache_dir.join("curse/238222/4.16/artifact/jei-4.16.jar").exists());

        let second = fixture.stage(fetcher.clone()).run(&[path.clone()]).await;
        assert_eq!(second.manifests[0].descriptors[0].outcome, Outcome::AlreadyPresent);

        tokio::fs::remove_file(fixture.target("jei-4.16.jar")).await.unwrap();
        let stage = fixture.stage(fetcher.clone());
        let third = stage.run(&[path]).await;
        assert_eq!(third.manifests[0].descriptors[0].outcome, Outcome::CacheHit);
        assert_eq!(stage.metrics().cache_hits, 1);

        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_artifact_named_entry_json_keeps_its_bytes() {
        let fixture = Fixture::new();
        let url = "https://cdn.example.com/files/entry.json";
        let body: &[u8] = b"{\"artifact\":true}";
        let path = fixture.manifest("manifest.json", vec![resolved("1", "1.0", url)]).await;
        let fetcher = Arc::new(CountingFetcher::new().with_body(url, body));

        let first = fixture.stage(fetcher.clone()).run(&[path.clone()]).await;
        assert_eq!(
            first.manifests[0].descriptors[0].outcome,
            Outcome::Downloaded {
                bytes: body.len() as u64
            }
        );
        assert_eq!(tokio::fs::read(fixture.target("entry.json")).await.unwrap(), body);

        let second = fixture.stage(fetcher.clone()).run(&[path]).await;
        assert_eq!(second.manifests[0].descriptors[0].outcome, Outcome::AlreadyPresent);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_same_size_stale_target_is_replaced_from_cache() {
        let fixture = Fixture::new();
        let mut with_checksum = resolved("1", "1.0", "https://cdn.example.com/one.jar");
        with_checksum.checksum = Some(xxhash64_base64(b"NEWNEW"));
        let without_checksum = resolved("2", "1.0", "https://cdn.example.com/two.jar");
        let path = fixture.manifest("manifest.json", vec![with_checksum, without_checksum]).await;
        let fetcher = Arc::new(
            CountingFetcher::new()
                .with_body("https://cdn.example.com/one.jar", b"NEWNEW")
                .with_body("https://cdn.example.com/two.jar", b"NEWTWO"),
        );

        fixture.stage(fetcher.clone()).run(&[path.clone()]).await;
        tokio::fs::write(fixture.target("one.jar"), b"OLDOLD").await.unwrap();
        tokio::fs::write(fixture.target("two.jar"), b"OLDTWO").await.unwrap();

        let report = fixture.stage(fetcher.clone()).run(&[path]).await;
        for descriptor in &report.manifests[0].descriptors {
            assert_eq!(descriptor.outcome, Outcome::CacheHit);
        }
        assert_eq!(tokio::fs::read(fixture.target("one.jar")).await.unwrap(), b"NEWNEW");
        assert_eq!(tokio::fs::read(fixture.target("two.jar")).await.unwrap(), b"NEWTWO");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_rename_names_the_target_file() {
        let fixture = Fixture::new();
        let path = fixture
            .manifest("manifest.json", vec![resolved("238222", "4.16", JEI_URL).with_rename("jei.jar")])
            .await;
        let fetcher = Arc::new(CountingFetcher::new().with_body(JEI_URL, JEI_BYTES));

        let report = fixture.stage(fetcher.clone()).run(&[path]).await;
        assert!(matches!(report.manifests[0].descriptors[0].outcome, Outcome::Downloaded { .. }));
        assert_eq!(tokio::fs::read(fixture.target("jei.jar")).await.unwrap(), JEI_BYTES);
        assert!(!fixture.target("jei-4.16.jar").exists());
    }

    #[tokio::test]
    async fn test_validation_failure_is_download_failure() {
        let fixture = Fixture::new();
        let mut good = resolved("1", "1.0", "https://cdn.example.com/good.jar");
        good.checksum = Some(xxhash64_base64(b"good"));
        let mut bad = resolved("2", "1.0", "https://cdn.example.com/bad.jar");
        bad.checksum = Some(xxhash64_base64(b"expected"));
        let empty = resolved("3", "1.0", "https://cdn.example.com/empty.jar");
        let path = fixture.manifest("manifest.json", vec![good, bad, empty]).await;

        let fetcher = Arc::new(
            CountingFetcher::new()
                .with_body("https://cdn.example.com/good.jar", b"good")
                .with_body("https://cdn.example.com/bad.jar", b"tampered")
                .with_body("https://cdn.example.com/empty.jar", b""),
        );
        let stage = fixture.stage(fetcher.clone());
        let report = stage.run(&[path]).await;

        let outcomes: Vec<_> = report.manifests[0].descriptors.iter().map(|d| d.outcome.clone()).collect();
        assert_eq!(outcomes[0], Outcome::Downloaded { bytes: 4 });
        for failed in &outcomes[1..] {
            match failed {
                Outcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::DownloadFailed),
                other => panic!("expected download failure, got {:?}", other),
            }
        }
        // integrity failures are not retried
        assert_eq!(fetcher.calls(), 3);
        assert!(!fixture.target("bad.jar").exists());
        assert_eq!(stage.metrics().validation_failures, 2);
    }

    #[tokio::test]
    async fn test_transient_fetch_errors_are_retried() {
        let fixture = Fixture::new();
        let path = fixture.manifest("manifest.json", vec![resolved("238222", "4.16", JEI_URL)]).await;
        let fetcher = Arc::new(CountingFetcher::new().with_body(JEI_URL, JEI_BYTES).failing_times(JEI_URL, 2));

        let stage = fixture.stage(fetcher.clone());
        let report = stage.run(&[path]).await;

        assert!(matches!(report.manifests[0].descriptors[0].outcome, Outcome::Downloaded { .. }));
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(stage.metrics().retries_attempted, 2);
    }

    #[tokio::test]
    async fn test_filename_collision_later_descriptor_wins() {
        let fixture = Fixture::new();
        let first = fixture
            .manifest(
                "a.json",
                vec![
                    resolved("1", "1.0", "https://cdn.example.com/one/shared.jar"),
                    resolved("2", "1.0", "https://cdn.example.com/two.jar"),
                ],
            )
            .await;
        let second = fixture
            .manifest("b.json", vec![resolved("3", "1.0", "https://cdn.example.com/three/shared.jar")])
            .await;

        let fetcher = Arc::new(
            CountingFetcher::new()
                .with_body("https://cdn.example.com/one/shared.jar", b"one")
                .with_body("https://cdn.example.com/two.jar", b"two")
                .with_body("https://cdn.example.com/three/shared.jar", b"three"),
        );
        let report = fixture.stage(fetcher.clone()).run(&[first.clone(), second.clone()]).await;

        assert_eq!(tokio::fs::read(fixture.target("shared.jar")).await.unwrap(), b"three");
        assert_eq!(fetcher.calls(), 2);

        let loser = report.manifest(&first).unwrap().find(&ModIdentity::new("curse", "1")).unwrap();
        assert_eq!(
            loser.outcome,
            Outcome::Superseded {
                by: ModIdentity::new("curse", "3")
            }
        );
        let winner = report.manifest(&second).unwrap().find(&ModIdentity::new("curse", "3")).unwrap();
        assert_eq!(
            winner.warnings,
            vec![Warning::FilenameCollision {
                file_name: "shared.jar".to_string(),
                overwritten: vec![ModIdentity::new("curse", "1")],
            }]
        );
        assert_eq!(report.descriptor_failures(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_skipped_and_unsafe_names() {
        let fixture = Fixture::new();
        let mut skipped = resolved("1", "1.0", JEI_URL);
        skipped.skip_download = true;
        let unresolved = ModDescriptor::new(ModIdentity::new("curse", "2"));
        let escaping = resolved("3", "1.0", JEI_URL).with_file_name("../outside.jar");
        let path = fixture.manifest("manifest.json", vec![skipped, unresolved, escaping]).await;

        let fetcher = Arc::new(CountingFetcher::new().with_body(JEI_URL, JEI_BYTES));
        let report = fixture.stage(fetcher.clone()).run(&[path]).await;

        let outcomes: Vec<_> = report.manifests[0].descriptors.iter().map(|d| d.outcome.clone()).collect();
        assert!(matches!(outcomes[0], Outcome::Skipped { .. }));
        assert!(matches!(outcomes[1], Outcome::Failed(_)));
        assert!(matches!(outcomes[2], Outcome::Failed(_)));
        assert_eq!(fetcher.calls(), 0);
        assert!(!fixture.dir.path().join("outside.jar").exists());
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_refetched() {
        let fixture = Fixture::new();
        let path = fixture.manifest("manifest.json", vec![resolved("238222", "4.16", JEI_URL)]).await;
        let fetcher = Arc::new(CountingFetcher::new().with_body(JEI_URL, JEI_BYTES));

        fixture.stage(fetcher.clone()).run(&[path.clone()]).await;
        tokio::fs::remove_file(fixture.config.cache_dir.join("curse/238222/4.16/artifact/jei-4.16.jar"))
            .await
            .unwrap();

        let report = fixture.stage(fetcher.clone()).run(&[path]).await;
        assert!(matches!(report.manifests[0].descriptors[0].outcome, Outcome::Downloaded { .. }));
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let fixture = Fixture::new();
        let path = fixture.manifest("manifest.json", vec![resolved("238222", "4.16", JEI_URL)]).await;
        let fetcher = Arc::new(CountingFetcher::new().with_body(JEI_URL, JEI_BYTES));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = fixture.stage(fetcher.clone()).with_cancellation(cancel).run(&[path]).await;

        assert!(report.cancelled);
        assert_eq!(report.manifests[0].descriptors[0].outcome, Outcome::Cancelled);
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_plain_file_names() {
        assert!(is_plain_file_name("jei.jar"));
        assert!(!is_plain_file_name("../jei.jar"));
        assert!(!is_plain_file_name("sub/jei.jar"));
        assert!(!is_plain_file_name("/etc/passwd"));
        assert!(!is_plain_file_name(".."));
    }
}
