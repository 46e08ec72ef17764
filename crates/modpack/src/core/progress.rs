//! Progress tracking and reporting for pipeline operations

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress callback for pipeline operations
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Events emitted while resolving and downloading
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    ResolveStarted {
        identity: String,
    },
    Resolved {
        identity: String,
        version: String,
    },
    DownloadStarted {
        url: String,
        total_size: Option<u64>,
    },
    DownloadProgress {
        url: String,
        downloaded: u64,
        total: Option<u64>,
        speed_bps: f64,
    },
    DownloadComplete {
        url: String,
        final_size: u64,
    },
    CacheHit {
        identity: String,
        version: String,
    },
    RetryAttempt {
        subject: String,
        attempt: usize,
        max_attempts: usize,
    },
    Warning {
        subject: String,
        message: String,
    },
    Error {
        subject: String,
        error: String,
    },
}

/// Trait for progress reporting with more granular control
pub trait ProgressReporter: Send + Sync {
    fn on_resolve_started(&self, _identity: &str) {}
    fn on_resolved(&self, _identity: &str, _version: &str) {}
    fn on_download_started(&self, _url: &str, _total_size: Option<u64>) {}
    fn on_download_progress(&self, _url: &str, _downloaded: u64, _total: Option<u64>, _speed_bps: f64) {}
    fn on_download_complete(&self, _url: &str, _final_size: u64) {}
    fn on_cache_hit(&self, _identity: &str, _version: &str) {}
    fn on_retry_attempt(&self, _subject: &str, _attempt: usize, _max_attempts: usize) {}
    fn on_warning(&self, _subject: &str, _message: &str) {}
    fn on_error(&self, _subject: &str, _error: &str) {}
}

/// Extension trait to convert ProgressReporter to ProgressCallback
pub trait IntoProgressCallback {
    fn into_callback(self) -> ProgressCallback;
}

impl<T: ProgressReporter + 'static> IntoProgressCallback for T {
    fn into_callback(self) -> ProgressCallback {
        Arc::new(move |event| match event {
            ProgressEvent::ResolveStarted { identity } => {
                self.on_resolve_started(&identity);
            }
            ProgressEvent::Resolved { identity, version } => {
                self.on_resolved(&identity, &version);
            }
            ProgressEvent::DownloadStarted { url, total_size } => {
                self.on_download_started(&url, total_size);
            }
            ProgressEvent::DownloadProgress { url, downloaded, total, speed_bps } => {
                self.on_download_progress(&url, downloaded, total, speed_bps);
            }
            ProgressEvent::DownloadComplete { url, final_size } => {
                self.on_download_complete(&url, final_size);
            }
            ProgressEvent::CacheHit { identity, version } => {
                self.on_cache_hit(&identity, &version);
            }
            ProgressEvent::RetryAttempt { subject, attempt, max_attempts } => {
                self.on_retry_attempt(&subject, attempt, max_attempts);
            }
            ProgressEvent::Warning { subject, message } => {
                self.on_warning(&subject, &message);
            }
            ProgressEvent::Error { subject, error } => {
                self.on_error(&subject, &error);
            }
        })
    }
}

/// Emit an event if a callback is attached
pub(crate) fn emit(callback: Option<&ProgressCallback>, event: ProgressEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

/// Progress reporter that forwards events to `tracing`
#[derive(Debug, Default)]
pub struct TracingProgressReporter {
    pub verbose: bool,
}

impl TracingProgressReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for TracingProgressReporter {
    fn on_resolve_started(&self, identity: &str) {
        debug!("Resolving {}", identity);
    }

    fn on_resolved(&self, identity: &str, version: &str) {
        info!("Resolved {} -> {}", identity, version);
    }

    fn on_download_started(&self, url: &str, total_size: Option<u64>) {
        match total_size {
            Some(size) => info!("Downloading {} ({} bytes)", url, size),
            None => info!("Downloading {}", url),
        }
    }

    fn on_download_progress(&self, url: &str, downloaded: u64, total: Option<u64>, speed_bps: f64) {
        if !self.verbose {
            return;
        }
        let speed_mb = speed_bps / 1_000_000.0;
        match total {
            Some(total) if total > 0 => {
                let percent = (downloaded as f64 / total as f64) * 100.0;
                debug!("{}: {:.1}% ({}/{} bytes, {:.1} MB/s)", url, percent, downloaded, total, speed_mb);
            }
            _ => debug!("{}: {} bytes downloaded ({:.1} MB/s)", url, downloaded, speed_mb),
        }
    }

    fn on_download_complete(&self, url: &str, final_size: u64) {
        info!("Download complete: {} ({} bytes)", url, final_size);
    }

    fn on_cache_hit(&self, identity: &str, version: &str) {
        debug!("Cache hit for {} at {}", identity, version);
    }

    fn on_retry_attempt(&self, subject: &str, attempt: usize, max_attempts: usize) {
        warn!("Retry {}/{} for {}", attempt, max_attempts, subject);
    }

    fn on_warning(&self, subject: &str, message: &str) {
        warn!("{}: {}", subject, message);
    }

    fn on_error(&self, subject: &str, error: &str) {
        warn!("Error for {}: {}", subject, error);
    }
}

/// Null progress reporter that does nothing
#[derive(Debug, Default)]
pub struct NullProgressReporter;

impl ProgressReporter for NullProgressReporter {}
