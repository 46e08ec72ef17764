//! Manifest data model
//!
//! A manifest is a JSON document listing the mods of one pack. Keys this crate
//! does not understand are carried along in sorted maps so a load followed by
//! a save never drops data and always produces the same bytes.

pub mod store;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::catalog::CatalogVersion;
use crate::validation::FileValidation;

pub use store::{load, load_unchecked, save, to_bytes};

/// Source name for mods pinned to a fixed third-party URL
pub const DIRECT_SOURCE: &str = "direct";

/// Stable identity of a mod: the catalog it comes from and its id there
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModIdentity {
    pub source: String,
    pub id: String,
}

impl ModIdentity {
    pub fn new<S: Into<String>, I: Into<String>>(source: S, id: I) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }

    /// Third-party entries are never resolved against a catalog
    pub fn is_direct(&self) -> bool {
        self.source == DIRECT_SOURCE
    }
}

impl fmt::Display for ModIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// Stability tier of a published version, ordered from strictest to loosest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    #[default]
    #[serde(alias = "release")]
    Stable,
    Beta,
    Alpha,
}

impl ReleaseType {
    /// Whether a version of `candidate` type passes this filter
    ///
    /// `Stable` admits only stable, `Beta` admits beta and stable, `Alpha`
    /// admits everything.
    pub fn admits(self, candidate: ReleaseType) -> bool {
        candidate <= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseType::Stable => "stable",
            ReleaseType::Beta => "beta",
            ReleaseType::Alpha => "alpha",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReleaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stable" | "release" => Ok(ReleaseType::Stable),
            "beta" => Ok(ReleaseType::Beta),
            "alpha" => Ok(ReleaseType::Alpha),
            other => Err(format!("unknown release type '{other}' (expected stable, beta or alpha)")),
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One mod entry in a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModDescriptor {
    #[serde(flatten)]
    pub identity: ModIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Release-type filter requested for this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_type: Option<ReleaseType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Name to save the artifact under, kept across updates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// xxHash64 of the artifact, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_update: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_download: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ModDescriptor {
    pub fn new(identity: ModIdentity) -> Self {
        Self {
            identity,
            name: None,
            release_type: None,
            version: None,
            url: None,
            file_name: None,
            rename: None,
            size: None,
            checksum: None,
            dependencies: Vec::new(),
            skip_update: false,
            skip_download: false,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_url<S: Into<String>>(mut self, url: S) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_file_name<S: Into<String>>(mut self, file_name: S) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_rename<S: Into<String>>(mut self, rename: S) -> Self {
        self.rename = Some(rename.into());
        self
    }

    pub fn with_release_type(mut self, release_type: ReleaseType) -> Self {
        self.release_type = Some(release_type);
        self
    }

    /// Has a version and a download location
    pub fn is_resolved(&self) -> bool {
        self.version.is_some() && self.url.is_some()
    }

    /// Name of the file this descriptor produces in the target folder
    ///
    /// `rename` wins over `fileName`; without either the last non-empty path
    /// segment of the URL is used.
    pub fn output_file_name(&self) -> Option<String> {
        let named = [&self.rename, &self.file_name]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty());
        if let Some(name) = named {
            return Some(name.clone());
        }

        let parsed = url::Url::parse(self.url.as_deref()?).ok()?;
        parsed
            .path_segments()?
            .next_back()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }

    /// What the fetched artifact is checked against
    pub fn validation(&self) -> FileValidation {
        FileValidation {
            xxhash64_base64: self.checksum.clone(),
            expected_size: self.size,
        }
    }

    /// Overwrite the catalog-owned fields with a catalog version
    ///
    /// Identity, `rename` and the flags are left alone.
    pub fn apply_resolution(&mut self, resolved: &CatalogVersion) {
        self.version = Some(resolved.version.clone());
        self.url = Some(resolved.download_url.clone());
        self.file_name = resolved.file_name.clone();
        self.size = resolved.size;
        self.checksum = resolved.checksum.clone();
        self.dependencies = resolved.dependencies.clone();
    }
}

/// A whole manifest: metadata plus the ordered list of mods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestDocument {
    /// Game or loader version the manifest was authored against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    /// Default release-type filter for entries that do not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_type: Option<ReleaseType>,
    #[serde(default)]
    pub mods: Vec<ModDescriptor>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ManifestDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_platform_version<S: Into<String>>(mut self, platform_version: S) -> Self {
        self.platform_version = Some(platform_version.into());
        self
    }

    pub fn with_mod(mut self, descriptor: ModDescriptor) -> Self {
        self.mods.push(descriptor);
        self
    }

    pub fn find(&self, identity: &ModIdentity) -> Option<&ModDescriptor> {
        self.mods.iter().find(|descriptor| &descriptor.identity == identity)
    }

    /// Identities that appear more than once, in first-repeat order
    pub fn duplicate_identities(&self) -> Vec<ModIdentity> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for descriptor in &self.mods {
            if !seen.insert(&descriptor.identity) && !duplicates.contains(&descriptor.identity) {
                duplicates.push(descriptor.identity.clone());
            }
        }
        duplicates
    }
}
