//! Catalog capability and the registry that routes identities to catalogs
//!
//! A catalog lists the published versions of a mod. Which catalog answers for
//! a given identity is decided by its `source`, and that mapping is fixed when
//! the registry is built at startup.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::error::CatalogError;
use crate::manifest::{ModIdentity, ReleaseType};

pub use http::HttpCatalog;

/// One published version of a mod as the catalog reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogVersion {
    pub version: String,
    pub release_type: ReleaseType,
    /// Publication time in unix seconds
    pub published_at: u64,
    /// Platform versions this release declares support for
    #[serde(default)]
    pub platform_compat: Vec<String>,
    pub download_url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl CatalogVersion {
    /// Whether this release supports `platform`; unknown on either side counts as yes
    pub fn supports_platform(&self, platform: Option<&str>) -> bool {
        match platform {
            None => true,
            Some(_) if self.platform_compat.is_empty() => true,
            Some(platform) => self.platform_compat.iter().any(|p| p == platform),
        }
    }
}

/// Source of version listings for mod identities
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All published versions of `identity`, in any order
    async fn list_versions(&self, identity: &ModIdentity) -> Result<Vec<CatalogVersion>, CatalogError>;
}

/// Maps a source name to the catalog that serves it
#[derive(Clone, Default)]
pub struct CatalogRegistry {
    catalogs: HashMap<String, Arc<dyn Catalog>>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a catalog for `source`, replacing any previous one
    pub fn register<S: Into<String>>(mut self, source: S, catalog: Arc<dyn Catalog>) -> Self {
        self.catalogs.insert(source.into(), catalog);
        self
    }

    pub fn get(&self, source: &str) -> Option<&Arc<dyn Catalog>> {
        self.catalogs.get(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.catalogs.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CatalogRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sources: Vec<&str> = self.sources().collect();
        sources.sort_unstable();
        f.debug_struct("CatalogRegistry").field("sources", &sources).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeCatalog, catalog_version};

    #[test]
    fn test_platform_support() {
        let mut version = catalog_version("1.0", ReleaseType::Stable, 1);
        assert!(version.supports_platform(Some("1.12.2")));

        version.platform_compat = vec!["1.12.2".to_string()];
        assert!(version.supports_platform(Some("1.12.2")));
        assert!(!version.supports_platform(Some("1.16.5")));
        assert!(version.supports_platform(None));
    }

    #[test]
    fn test_registry_routes_by_source() {
        let registry = CatalogRegistry::new()
            .register("curse", Arc::new(FakeCatalog::new()))
            .register("modrinth", Arc::new(FakeCatalog::new()));

        assert!(registry.get("curse").is_some());
        assert!(registry.get("direct").is_none());
        assert_eq!(format!("{:?}", registry), "CatalogRegistry { sources: [\"curse\", \"modrinth\"] }");
    }

    #[test]
    fn test_catalog_version_json_shape() {
        let json = r#"{
            "version": "2.1",
            "releaseType": "beta",
            "publishedAt": 1700000000,
            "platformCompat": ["1.20.1"],
            "downloadUrl": "https://cdn.example.com/a-2.1.jar",
            "size": 42
        }"#;
        let version: CatalogVersion = serde_json::from_str(json).unwrap();

        assert_eq!(version.release_type, ReleaseType::Beta);
        assert_eq!(version.size, Some(42));
        assert!(version.dependencies.is_empty());
    }
}
