//! Integrity checks for fetched artifacts
//!
//! Checksums are xxHash64 digests encoded as base64 over the little-endian
//! bytes of the hash.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Downloaded file '{path}' is empty")]
    Empty { path: PathBuf },

    #[error("Size mismatch for '{path}': expected {expected} bytes, got {actual}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("Could not read '{path}' for validation")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Convert an xxHash64 digest to its base64 form
pub fn xxhash64_to_base64(hash: u64) -> String {
    base64::engine::general_purpose::STANDARD.encode(hash.to_le_bytes())
}

/// Checksum of an in-memory buffer in manifest format
pub fn xxhash64_base64(bytes: &[u8]) -> String {
    let mut hasher = Xxh64::new(0);
    hasher.update(bytes);
    xxhash64_to_base64(hasher.digest())
}

/// Checksum of a file on disk in manifest format
pub async fn xxhash64_file(path: &Path) -> Result<String, ValidationError> {
    let io_error = |source| ValidationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).await.map_err(io_error)?;
    let mut hasher = Xxh64::new(0);
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).await.map_err(io_error)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(xxhash64_to_base64(hasher.digest()))
}

/// Expected properties of a file, any of which may be unknown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileValidation {
    /// Expected xxHash64 hash in base64 format
    pub xxhash64_base64: Option<String>,
    /// Expected file size in bytes
    pub expected_size: Option<u64>,
}

impl FileValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xxhash64_base64<S: Into<String>>(mut self, hash: S) -> Self {
        self.xxhash64_base64 = Some(hash.into());
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Validate a file, returning its size on success
    ///
    /// The file must be non-empty. Size is checked before the checksum since it
    /// is the cheaper of the two.
    pub async fn validate_file(&self, path: &Path) -> Result<u64, ValidationError> {
        let io_error = |source| ValidationError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file_size = fs::metadata(path).await.map_err(io_error)?.len();
        if file_size == 0 {
            return Err(ValidationError::Empty {
                path: path.to_path_buf(),
            });
        }

        if let Some(expected) = self.expected_size {
            if file_size != expected {
                return Err(ValidationError::SizeMismatch {
                    path: path.to_path_buf(),
                    expected,
                    actual: file_size,
                });
            }
        }

        if let Some(ref expected) = self.xxhash64_base64 {
            let actual = xxhash64_file(path).await?;
            debug!(
                "XXHash64 validation for {}: expected={}, actual={}",
                path.display(),
                expected,
                actual
            );
            if &actual != expected {
                return Err(ValidationError::ChecksumMismatch {
                    path: path.to_path_buf(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(file_size)
    }
}
