//! Inputs that already are files: adapted handles and stored styles

use async_trait::async_trait;

use super::{AdapterContext, AttachmentSource, IoAdapter};
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::ReadableFile;
use crate::storage::StorageError;

/// Copies a committed style of another attachment
pub struct StoredFileAdapter;

#[async_trait]
impl IoAdapter for StoredFileAdapter {
    fn name(&self) -> &'static str {
        "stored_file"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        matches!(source, AttachmentSource::Stored(_))
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        _ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        let stored = match source {
            AttachmentSource::Stored(stored) => stored,
            other => return Err(AttachmentError::NoHandler(other.describe())),
        };
        let file = stored
            .backend
            .read(&stored.locator)
            .await?
            .ok_or_else(|| StorageError::NotFound(stored.locator.to_string()))?;

        // Own the bytes: the source may be deleted before this copy is flushed
        let copy = if file.is_temporary() {
            file
        } else {
            file.duplicate()?
        };
        Ok(copy
            .with_original_filename(stored.original_filename)
            .with_content_type(stored.content_type))
    }
}

/// Returns already-adapted handles unchanged. Registered last so it never
/// shadows a concrete shape.
pub struct IdentityAdapter;

#[async_trait]
impl IoAdapter for IdentityAdapter {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        matches!(source, AttachmentSource::Readable(_))
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        _ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        match source {
            AttachmentSource::Readable(file) => Ok(file),
            other => Err(AttachmentError::NoHandler(other.describe())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::{IoRegistry, StoredFile};
    use super::*;
    use crate::storage::{FilesystemBackend, Locator, StorageBackend};

    #[tokio::test]
    async fn test_identity_returns_same_handle() {
        let file = ReadableFile::from_bytes(b"same", "same.txt", "text/plain").unwrap();
        let path = file.path().unwrap().to_path_buf();

        let resolved = IoRegistry::default().resolve(file.into()).await.unwrap();
        assert_eq!(resolved.path().unwrap(), path.as_path());
        assert_eq!(resolved.original_filename(), "same.txt");
    }

    #[tokio::test]
    async fn test_stored_file_is_copied() {
        let root = tempfile::tempdir().unwrap();
        let backend = Arc::new(FilesystemBackend::new(root.path()));
        let locator = Locator::Path(root.path().join("users/1/original/me.png"));
        let source = ReadableFile::from_bytes(b"png-bytes", "me.png", "image/png").unwrap();
        backend.store(&locator, &source).await.unwrap();

        let stored = StoredFile {
            backend: backend.clone(),
            locator: locator.clone(),
            original_filename: "me.png".to_string(),
            content_type: "image/png".to_string(),
        };
        let file = IoRegistry::default().resolve(stored.into()).await.unwrap();
        assert_eq!(file.original_filename(), "me.png");
        assert_eq!(file.content_type(), "image/png");
        assert_eq!(file.size(), 9);
        assert!(file.is_temporary());
    }

    #[tokio::test]
    async fn test_missing_stored_file() {
        let root = tempfile::tempdir().unwrap();
        let stored = StoredFile {
            backend: Arc::new(FilesystemBackend::new(root.path())),
            locator: Locator::Path(root.path().join("nothing/here.png")),
            original_filename: "here.png".to_string(),
            content_type: "image/png".to_string(),
        };
        let result = IoRegistry::default().resolve(stored.into()).await;
        assert!(matches!(
            result,
            Err(AttachmentError::Storage(StorageError::NotFound(_)))
        ));
    }
}
