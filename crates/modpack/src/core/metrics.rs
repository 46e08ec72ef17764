//! Counters for the download stage
//!
//! Updated from concurrent units with relaxed atomics and read once at the end
//! of the stage through a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DownloadMetrics {
    pub total_bytes: AtomicU64,
    pub fetches_started: AtomicU64,
    pub fetches_completed: AtomicU64,
    pub failed_downloads: AtomicU64,
    pub validation_failures: AtomicU64,
    pub retries_attempted: AtomicU64,
    pub cache_hits: AtomicU64,
    pub already_present: AtomicU64,
}

impl DownloadMetrics {
    pub fn record_fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_completed(&self, size: u64) {
        self.fetches_completed.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_download_failed(&self) {
        self.failed_downloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failed(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retries(&self, retries: u64) {
        self.retries_attempted.fetch_add(retries, Ordering::Relaxed);
    }

    /// Artifact was copied out of the cache
    pub fn record_cache_hit(&self, size: u64) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub fn record_already_present(&self) {
        self.already_present.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DownloadMetricsSnapshot {
        DownloadMetricsSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_completed: self.fetches_completed.load(Ordering::Relaxed),
            failed_downloads: self.failed_downloads.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            retries_attempted: self.retries_attempted.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of download metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadMetricsSnapshot {
    pub total_bytes: u64,
    pub fetches_started: u64,
    pub fetches_completed: u64,
    pub failed_downloads: u64,
    pub validation_failures: u64,
    pub retries_attempted: u64,
    pub cache_hits: u64,
    pub already_present: u64,
}

impl DownloadMetricsSnapshot {
    pub fn success_rate(&self) -> f64 {
        if self.fetches_started == 0 {
            0.0
        } else {
            self.fetches_completed as f64 / self.fetches_started as f64
        }
    }
}
