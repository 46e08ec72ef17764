//! Fakes and builders shared by the unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::catalog::{Catalog, CatalogVersion};
use crate::config::RetryConfig;
use crate::core::error::{CatalogError, FetchError, FileOperation};
use crate::core::progress::ProgressCallback;
use crate::fetch::ArtifactFetcher;
use crate::manifest::{ModDescriptor, ModIdentity, ReleaseType};

pub(crate) fn fast_retry(max_retries: usize) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub(crate) fn catalog_version(version: &str, release_type: ReleaseType, published_at: u64) -> CatalogVersion {
    CatalogVersion {
        version: version.to_string(),
        release_type,
        published_at,
        platform_compat: Vec::new(),
        download_url: format!("https://cdn.example.com/{version}.jar"),
        file_name: None,
        size: None,
        checksum: None,
        dependencies: Vec::new(),
    }
}

pub(crate) fn resolved(id: &str, version: &str, url: &str) -> ModDescriptor {
    ModDescriptor::new(ModIdentity::new("curse", id))
        .with_version(version)
        .with_url(url)
}

#[derive(Default)]
struct FakeCatalogState {
    versions: HashMap<String, Vec<CatalogVersion>>,
    /// `None` fails forever, `Some(n)` fails the next `n` calls
    failures: HashMap<String, Option<usize>>,
    calls: HashMap<String, usize>,
}

/// In-memory catalog keyed by mod id; unknown ids are `NotFound`
#[derive(Default)]
pub(crate) struct FakeCatalog {
    state: Mutex<FakeCatalogState>,
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_versions(mut self, id: &str, versions: Vec<CatalogVersion>) -> Self {
        self.state.get_mut().unwrap().versions.insert(id.to_string(), versions);
        self
    }

    pub(crate) fn failing_permanently(mut self, id: &str) -> Self {
        self.state.get_mut().unwrap().failures.insert(id.to_string(), None);
        self
    }

    pub(crate) fn failing_times(mut self, id: &str, times: usize) -> Self {
        self.state.get_mut().unwrap().failures.insert(id.to_string(), Some(times));
        self
    }

    pub(crate) fn calls(&self, id: &str) -> usize {
        self.state.lock().unwrap().calls.get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn list_versions(&self, identity: &ModIdentity) -> Result<Vec<CatalogVersion>, CatalogError> {
        let mut state = self.state.lock().unwrap();
        *state.calls.entry(identity.id.clone()).or_default() += 1;

        match state.failures.get_mut(&identity.id) {
            Some(None) => return Err(CatalogError::Unavailable("connection reset".to_string())),
            Some(Some(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(CatalogError::Unavailable("connection reset".to_string()));
            }
            _ => {}
        }

        state
            .versions
            .get(&identity.id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound {
                identity: identity.to_string(),
            })
    }
}

/// Fetcher serving fixed bodies by URL and counting every call
#[derive(Default)]
pub(crate) struct CountingFetcher {
    bodies: HashMap<String, Vec<u8>>,
    failures: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_body(mut self, url: &str, body: &[u8]) -> Self {
        self.bodies.insert(url.to_string(), body.to_vec());
        self
    }

    pub(crate) fn failing_times(mut self, url: &str, times: usize) -> Self {
        self.failures.get_mut().unwrap().insert(url.to_string(), times);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for CountingFetcher {
    async fn fetch(&self, url: &str, dest: &Path, _progress: Option<ProgressCallback>) -> Result<u64, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(url) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if failing {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 503,
            });
        }

        let Some(body) = self.bodies.get(url) else {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            });
        };
        tokio::fs::write(dest, body).await.map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            operation: FileOperation::Write,
            source: e,
        })?;
        Ok(body.len() as u64)
    }
}
