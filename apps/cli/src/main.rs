use anyhow::{Context, Result, anyhow};
use clap::Parser;
use modpack::config::{DEFAULT_MANIFEST_FILE, DEFAULT_MOD_FOLDER};
use modpack::{
    ArtifactCache, CatalogRegistry, ExitStatus, HttpCatalog, HttpFetcher, IntoProgressCallback, Pipeline,
    PipelineConfig, PipelineReport, ReleaseType, RetryConfig, TracingProgressReporter,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const API_KEY_VAR: &str = "MODPACK_CATALOG_API_KEY";
const CACHE_FOLDER: &str = "modpack-downloader";

#[derive(Debug, Parser)]
#[command(
    name = "modpack-downloader",
    version,
    about = "Resolve, download and merge mod pack manifests"
)]
struct Cli {
    /// Manifests whose mods are downloaded into the mod folder.
    #[arg(short, long = "manifest", value_name = "FILE")]
    manifests: Vec<PathBuf>,

    /// Manifests whose mods are resolved to their newest versions.
    #[arg(short, long = "update", value_name = "FILE")]
    update: Vec<PathBuf>,

    /// Manifests merged into a single manifest.
    #[arg(long = "merge", value_name = "FILE")]
    merge: Vec<PathBuf>,

    /// Where the merged manifest is written (default: next to the first merge input).
    #[arg(long, value_name = "FILE")]
    merge_output: Option<PathBuf>,

    /// Folder mods are downloaded into.
    #[arg(short, long, default_value = DEFAULT_MOD_FOLDER)]
    folder: PathBuf,

    /// Least stable release type to accept: stable, beta or alpha.
    #[arg(short, long, default_value = "stable")]
    release_type: ReleaseType,

    /// Maximum number of mods processed at once (default: number of CPUs).
    #[arg(short, long)]
    threads: Option<usize>,

    /// Stop starting new work after this many seconds.
    #[arg(long, value_name = "SECONDS")]
    timeout_secs: Option<u64>,

    /// Retries for failed catalog queries and downloads.
    #[arg(long, default_value_t = 3)]
    retries: usize,

    /// Artifact cache directory (default: the platform cache directory).
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Remove every cached artifact and exit.
    #[arg(long, default_value_t = false)]
    clear_cache: bool,

    /// Base URL of the CurseForge-compatible catalog API.
    #[arg(long, default_value = "https://api.curseforge.com/v1/")]
    catalog_url: String,

    /// Source name the catalog answers for.
    #[arg(long, default_value = "curse")]
    catalog_source: String,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false)]
    trace: bool,
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("MODPACK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn cache_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(ref dir) = cli.cache_dir {
        return Ok(dir.clone());
    }
    dirs::cache_dir()
        .map(|dir| dir.join(CACHE_FOLDER))
        .ok_or_else(|| anyhow!("could not determine a cache directory, pass --cache-dir"))
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut manifests_to_download = cli.manifests.clone();
    if manifests_to_download.is_empty() && cli.update.is_empty() && cli.merge.is_empty() {
        info!("No manifest supplied, using default {}", DEFAULT_MANIFEST_FILE);
        manifests_to_download.push(PathBuf::from(DEFAULT_MANIFEST_FILE));
    }

    let defaults = PipelineConfig::default();
    let config = PipelineConfig {
        manifests_to_update: cli.update.clone(),
        manifests_to_download,
        manifests_to_merge: cli.merge.clone(),
        merge_output: cli.merge_output.clone(),
        target_folder: cli.folder.clone(),
        release_type_filter: cli.release_type,
        concurrency_limit: cli.threads.unwrap_or(defaults.concurrency_limit),
        timeout: cli.timeout_secs.map(Duration::from_secs),
        cache_dir: cache_dir(cli)?,
        retry: RetryConfig {
            max_retries: cli.retries,
            ..RetryConfig::default()
        },
    };
    config.validate().context("invalid arguments")?;
    Ok(config)
}

fn summarize(report: &PipelineReport) {
    for stage in &report.stages {
        for manifest in &stage.manifests {
            for warning in &manifest.warnings {
                warn!("[{}] {}: {}", stage.stage, manifest.path.display(), warning);
            }
            for descriptor in &manifest.descriptors {
                if descriptor.outcome.is_failure() {
                    error!("[{}] {}: {:?}", stage.stage, descriptor.identity, descriptor.outcome);
                }
            }
        }
        info!(
            "{} stage: {} manifest(s), {} failure(s), {} warning(s){}",
            stage.stage,
            stage.manifests.len(),
            stage.descriptor_failures(),
            stage.warning_count(),
            if stage.cancelled { ", cancelled" } else { "" }
        );
    }
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    if cli.clear_cache {
        let cache = ArtifactCache::new(cache_dir(&cli)?);
        cache.clear().await.context("failed to clear cache")?;
        return Ok(ExitStatus::Success);
    }

    let config = build_config(&cli)?;

    dotenv::dotenv().ok(); // Ignore error if .env not present
    let api_key = std::env::var(API_KEY_VAR).ok();
    if api_key.is_none() {
        warn!("{} is not set, querying the catalog without an API key", API_KEY_VAR);
    }

    let catalog = HttpCatalog::new(&cli.catalog_url, api_key).context("failed to create catalog client")?;
    let registry = CatalogRegistry::new().register(cli.catalog_source.clone(), Arc::new(catalog));
    let fetcher = HttpFetcher::new().context("failed to create HTTP client")?;

    let pipeline = Pipeline::new(config, registry, Arc::new(fetcher))
        .with_progress(TracingProgressReporter::new(cli.verbose || cli.trace).into_callback());

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing work in flight");
            cancel.cancel();
        }
    });

    let report = pipeline.run().await?;
    summarize(&report);
    Ok(report.exit_status())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(cli).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(ExitStatus::Fatal.code())
        }
    }
}
