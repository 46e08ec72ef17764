//! File operation utilities
//!
//! Every write into the manifest location, the cache or the target folder goes
//! through these helpers: content lands in a temp file in the destination's own
//! directory and is renamed into place, so readers see either the old file or
//! the complete new one.

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};
use tokio::fs;
use tracing::debug;

use crate::core::error::{FileOperation, PipelineError, Result};

fn parent_dir(dest: &Path) -> PathBuf {
    match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Make sure a directory exists
pub async fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::io(dir, FileOperation::CreateDir, e))
}

/// Create an empty temp file next to `dest` and hand back its path
///
/// The file is removed when the returned `TempPath` is dropped without being
/// persisted.
pub async fn temp_path_beside(dest: &Path) -> Result<TempPath> {
    let dir = parent_dir(dest);
    ensure_dir(&dir).await?;
    let dir_for_task = dir.clone();
    tokio::task::spawn_blocking(move || NamedTempFile::new_in(&dir_for_task).map(NamedTempFile::into_temp_path))
        .await
        .map_err(|e| PipelineError::io(&dir, FileOperation::Create, std::io::Error::other(e)))?
        .map_err(|e| PipelineError::io(&dir, FileOperation::Create, e))
}

/// Atomically write `bytes` to `dest`
pub async fn write_atomic(dest: &Path, bytes: Vec<u8>) -> Result<()> {
    let dir = parent_dir(dest);
    ensure_dir(&dir).await?;

    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| PipelineError::io(&dir, FileOperation::Create, e))?;
        temp.write_all(&bytes)
            .map_err(|e| PipelineError::io(temp.path(), FileOperation::Write, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| PipelineError::io(temp.path(), FileOperation::Write, e))?;
        temp.persist(&dest_owned)
            .map_err(|e| PipelineError::io(&dest_owned, FileOperation::Move, e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| PipelineError::io(dest, FileOperation::Write, std::io::Error::other(e)))??;

    debug!("Atomically wrote {}", dest.display());
    Ok(())
}

/// Atomically copy `src` to `dest`, returning the number of bytes copied
pub async fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    let dir = parent_dir(dest);
    ensure_dir(&dir).await?;

    let src_owned = src.to_path_buf();
    let dest_owned = dest.to_path_buf();
    let copied = tokio::task::spawn_blocking(move || -> Result<u64> {
        let mut source = std::fs::File::open(&src_owned)
            .map_err(|e| PipelineError::io(&src_owned, FileOperation::Read, e))?;
        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| PipelineError::io(&dir, FileOperation::Create, e))?;
        let copied = std::io::copy(&mut source, temp.as_file_mut())
            .map_err(|e| PipelineError::io(&src_owned, FileOperation::Copy, e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| PipelineError::io(temp.path(), FileOperation::Write, e))?;
        temp.persist(&dest_owned)
            .map_err(|e| PipelineError::io(&dest_owned, FileOperation::Move, e.error))?;
        Ok(copied)
    })
    .await
    .map_err(|e| PipelineError::io(dest, FileOperation::Copy, std::io::Error::other(e)))??;

    debug!("Atomically copied {} to {} ({} bytes)", src.display(), dest.display(), copied);
    Ok(copied)
}

/// Rename a finished temp file to its final destination
pub async fn persist_temp(temp: TempPath, dest: &Path) -> Result<()> {
    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || temp.persist(&dest_owned))
        .await
        .map_err(|e| PipelineError::io(dest, FileOperation::Move, std::io::Error::other(e)))?
        .map_err(|e| PipelineError::io(dest, FileOperation::Move, e.error))?;
    debug!("Atomically renamed temp file to {}", dest.display());
    Ok(())
}

/// Size of a file, or `None` when it does not exist
pub async fn file_size(path: &Path) -> Result<Option<u64>> {
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PipelineError::io(path, FileOperation::Metadata, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_atomic_replaces_content_without_leftovers() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("nested").join("manifest.json");

        write_atomic(&dest, b"first".to_vec()).await.unwrap();
        write_atomic(&dest, b"second".to_vec()).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(dest.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_copy_atomic_reports_size() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.jar");
        tokio::fs::write(&src, b"artifact").await.unwrap();

        let dest = dir.path().join("mods").join("dest.jar");
        let copied = copy_atomic(&src, &dest).await.unwrap();

        assert_eq!(copied, 8);
        assert_eq!(file_size(&dest).await.unwrap(), Some(8));
    }

    #[tokio::test]
    async fn test_dropped_temp_path_is_removed() {
        let dir = tempdir().unwrap();
        let temp = temp_path_beside(&dir.path().join("x.jar")).await.unwrap();
        let path = temp.to_path_buf();
        assert!(path.exists());
        drop(temp);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_size_missing() {
        let dir = tempdir().unwrap();
        assert_eq!(file_size(&dir.path().join("nope")).await.unwrap(), None);
    }
}
