//! Local filesystem storage

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument, warn};

use super::{LocateRequest, Locator, RemoveOutcome, StorageBackend, StorageError, StorageResult};
use crate::content_type;
use crate::readable::ReadableFile;

/// Stores each style at its interpolated absolute path
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    /// Pruning boundary for callers that do not pass the current `:root`
    root: PathBuf,
    /// Mode applied to every stored file
    file_mode: u32,
}

impl FilesystemBackend {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            file_mode: 0o644,
        }
    }

    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of<'a>(&self, locator: &'a Locator) -> StorageResult<&'a Path> {
        match locator {
            Locator::Path(path) => Ok(path),
            other => Err(StorageError::InvalidPath(format!(
                "filesystem backend cannot address '{}'",
                other
            ))),
        }
    }

    /// Remove now-empty directories above `path`, stopping at `root`, at the
    /// backend's own root or at the first directory that cannot be removed
    async fn prune_empty_parents(&self, path: &Path, root: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == root || dir == self.root || !dir.starts_with(root) {
                break;
            }
            if !is_empty_dir(dir).await {
                break;
            }
            if let Err(e) = fs::remove_dir(dir).await {
                debug!(dir = ?dir, error = %e, "Stopped pruning");
                break;
            }
            debug!(dir = ?dir, "Pruned empty directory");
            current = dir.parent();
        }
    }

    #[cfg(unix)]
    async fn apply_mode(&self, path: &Path) -> StorageResult<()> {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, std::fs::Permissions::from_mode(self.file_mode)).await?;
        Ok(())
    }

    #[cfg(not(unix))]
    async fn apply_mode(&self, _path: &Path) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn locate(&self, request: &LocateRequest<'_>) -> StorageResult<Locator> {
        if request.path.is_empty() {
            return Err(StorageError::InvalidPath(format!(
                "empty path for style '{}'",
                request.style.name
            )));
        }
        Ok(Locator::Path(PathBuf::from(&request.path)))
    }

    async fn exists(&self, locator: &Locator) -> StorageResult<bool> {
        let path = self.path_of(locator)?;
        Ok(fs::try_exists(path).await?)
    }

    #[instrument(skip(self, file), fields(storage = "filesystem"))]
    async fn store(&self, locator: &Locator, file: &ReadableFile) -> StorageResult<()> {
        let path = self.path_of(locator)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        file.move_to(path).await?;
        self.apply_mode(path).await?;

        debug!(path = ?path, size = file.size(), "File stored");
        Ok(())
    }

    async fn remove(&self, locator: &Locator) -> StorageResult<RemoveOutcome> {
        self.remove_within(locator, &self.root).await
    }

    #[instrument(skip(self), fields(storage = "filesystem"))]
    async fn remove_within(&self, locator: &Locator, root: &Path) -> StorageResult<RemoveOutcome> {
        let path = self.path_of(locator)?;
        match fs::remove_file(path).await {
            Ok(()) => {
                debug!(path = ?path, "File deleted");
                self.prune_empty_parents(path, root).await;
                Ok(RemoveOutcome::Removed)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.prune_empty_parents(path, root).await;
                Ok(RemoveOutcome::NotFound)
            }
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to delete file");
                Err(e.into())
            }
        }
    }

    async fn read(&self, locator: &Locator) -> StorageResult<Option<ReadableFile>> {
        let path = self.path_of(locator)?;
        if !fs::try_exists(path).await? {
            return Ok(None);
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content_type = content_type::from_extension(&filename);
        Ok(Some(ReadableFile::from_committed(
            path,
            filename,
            content_type,
        )?))
    }
}

async fn is_empty_dir(dir: &Path) -> bool {
    match fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}
