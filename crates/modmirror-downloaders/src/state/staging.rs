use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;

/// Temporary file next to the destination. Dropping it without
/// [`commit`](Self::commit) removes it, so a failed fetch never leaves a file
/// at the destination.
pub(crate) struct StagedFile {
    file: tokio::fs::File,
    path: TempPath,
    destination: PathBuf,
}

impl StagedFile {
    pub(crate) async fn create(destination: &Path) -> Result<Self, DownloadError> {
        let dir = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let staged = tempfile::Builder::new()
            .prefix(".modmirror-")
            .suffix(".partial")
            .tempfile_in(&dir)?;
        let (file, path) = staged.into_parts();

        Ok(Self {
            file: tokio::fs::File::from_std(file),
            path,
            destination: destination.to_path_buf(),
        })
    }

    pub(crate) fn file(&mut self) -> &mut tokio::fs::File {
        &mut self.file
    }

    /// Flush to disk and move over the destination.
    pub(crate) async fn commit(mut self) -> Result<(), DownloadError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        drop(self.file);

        self.path
            .persist(&self.destination)
            .map_err(|e| DownloadError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_stage_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a.zip");
        {
            let mut staged = StagedFile::create(&destination).await.unwrap();
            staged.file().write_all(b"half").await.unwrap();
        }
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn commit_moves_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("nested").join("a.zip");
        let mut staged = StagedFile::create(&destination).await.unwrap();
        staged.file().write_all(b"whole").await.unwrap();
        staged.commit().await.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"whole");
    }
}
