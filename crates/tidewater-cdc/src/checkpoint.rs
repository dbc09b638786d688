//! Durable offset checkpoint file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::CdcError;
use crate::offset::Offset;

/// A single-line text file holding the last persisted [`Offset`].
///
/// Writes go to a sibling temporary file that is then renamed over the
/// checkpoint, so a reader never sees a partial line.
#[derive(Debug, Clone)]
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    /// Uses `path` as the checkpoint location.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Checkpoint location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted offset, or `None` if no checkpoint exists yet.
    ///
    /// An existing file must hold an offset; a blank one is an error rather
    /// than a fresh start, so the reader never resumes behind a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Checkpoint` if the file exists but cannot be read,
    /// or `CdcError::InvalidOffset` if its content is blank or does not
    /// parse.
    pub async fn load(&self) -> Result<Option<Offset>, CdcError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.parse().map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CdcError::Checkpoint(e)),
        }
    }

    /// Atomically replaces the checkpoint with `offset`.
    ///
    /// # Errors
    ///
    /// Returns `CdcError::Checkpoint` if writing or renaming fails.
    pub async fn store(&self, offset: &Offset) -> Result<(), CdcError> {
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, format!("{offset}\n")).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("offset"));

        assert!(checkpoint.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_then_load() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("offset"));

        // Act
        checkpoint.store(&Offset::new("bin.001", 454)).await.unwrap();
        checkpoint.store(&Offset::new("bin.001", 912)).await.unwrap();

        // Assert
        let content = std::fs::read_to_string(checkpoint.path()).unwrap();
        assert_eq!(content, "bin.001/912\n");
        assert_eq!(
            checkpoint.load().await.unwrap(),
            Some(Offset::new("bin.001", 912))
        );
        assert!(!dir.path().join("offset.tmp").exists());
    }

    #[tokio::test]
    async fn test_load_corrupt_file_is_invalid_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offset");
        std::fs::write(&path, "garbage").unwrap();

        let result = CheckpointFile::new(path).load().await;

        assert!(matches!(result, Err(CdcError::InvalidOffset(_))));
    }

    #[tokio::test]
    async fn test_load_blank_file_is_invalid_offset() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointFile::new(dir.path().join("offset"));
        checkpoint.store(&Offset::new("bin.001", 454)).await.unwrap();
        std::fs::write(checkpoint.path(), "").unwrap();

        // Act
        let result = checkpoint.load().await;

        // Assert
        assert!(matches!(result, Err(CdcError::InvalidOffset(_))));
    }
}
