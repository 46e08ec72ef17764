//! Catalog backed by the CurseForge files API
//!
//! `GET {base}/mods/{id}/files` answers with `{"data": [file, ...]}`. Each
//! file is mapped onto a [`CatalogVersion`] whose version is the numeric file
//! id. Files without a download URL cannot be fetched and are left out.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{Catalog, CatalogVersion};
use crate::core::error::CatalogError;
use crate::manifest::{ModIdentity, ReleaseType};

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// `relationType` of a dependency the mod cannot run without
const REQUIRED_DEPENDENCY: u8 = 3;

#[derive(Deserialize)]
struct FilesResponse {
    data: Vec<CatalogFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    id: u64,
    file_name: String,
    release_type: u8,
    file_date: DateTime<Utc>,
    #[serde(default)]
    file_length: Option<u64>,
    #[serde(default)]
    download_url: Option<String>,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    dependencies: Vec<FileDependency>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileDependency {
    mod_id: u64,
    relation_type: u8,
}

fn release_type(code: u8) -> Option<ReleaseType> {
    match code {
        1 => Some(ReleaseType::Stable),
        2 => Some(ReleaseType::Beta),
        3 => Some(ReleaseType::Alpha),
        _ => None,
    }
}

impl CatalogFile {
    fn into_version(self, source: &str) -> Option<CatalogVersion> {
        let Some(release_type) = release_type(self.release_type) else {
            debug!("File {} has unknown release type {}, ignoring", self.id, self.release_type);
            return None;
        };
        let Some(download_url) = self.download_url.filter(|url| !url.is_empty()) else {
            debug!("File {} has no download URL, ignoring", self.id);
            return None;
        };

        Some(CatalogVersion {
            version: self.id.to_string(),
            release_type,
            published_at: u64::try_from(self.file_date.timestamp()).unwrap_or(0),
            platform_compat: self.game_versions,
            download_url,
            file_name: Some(self.file_name),
            size: self.file_length,
            checksum: None,
            dependencies: self
                .dependencies
                .into_iter()
                .filter(|dependency| dependency.relation_type == REQUIRED_DEPENDENCY)
                .map(|dependency| format!("{}:{}", source, dependency.mod_id))
                .collect(),
        })
    }
}

/// Catalog client for `GET {base}/mods/{id}/files`
#[derive(Debug, Clone)]
pub struct HttpCatalog {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpCatalog {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("modpack-downloader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::Http {
                url: base_url.to_string(),
                source: e,
            })?;
        Self::with_client(client, base_url, api_key)
    }

    /// Use a preconfigured client
    pub fn with_client(client: Client, base_url: &str, api_key: Option<String>) -> Result<Self, CatalogError> {
        let base_url = Url::parse(base_url).map_err(|e| CatalogError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogError::InvalidUrl {
                url: base_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            });
        }

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn files_url(&self, identity: &ModIdentity) -> Result<Url, CatalogError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "URL cannot be used as a base".to_string(),
            })?
            .pop_if_empty()
            .extend(["mods", identity.id.as_str(), "files"]);
        Ok(url)
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn list_versions(&self, identity: &ModIdentity) -> Result<Vec<CatalogVersion>, CatalogError> {
        let url = self.files_url(identity)?;
        debug!("Querying catalog: {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(ref key) = self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| CatalogError::Http {
            url: url.to_string(),
            source: e,
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound {
                identity: identity.to_string(),
            });
        }
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| CatalogError::Http {
            url: url.to_string(),
            source: e,
        })?;
        let files: FilesResponse = serde_json::from_slice(&body).map_err(|e| CatalogError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let listed = files.data.len();
        let versions: Vec<CatalogVersion> = files
            .data
            .into_iter()
            .filter_map(|file| file.into_version(&identity.source))
            .collect();
        debug!("Catalog returned {} files for {}, {} usable", listed, identity, versions.len());
        Ok(versions)
    }
}
