//! Storage Abstraction
//!
//! Provides a unified interface for the backends that hold committed styles:
//! local filesystem, object store and database blob columns.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tether_core::RecordKey;
use thiserror::Error;

use crate::readable::ReadableFile;
use crate::style::StyleDefinition;

mod database;
mod filesystem;
mod object_client;
mod object_store;

pub use database::{BlobSource, DatabaseBackend, DatabaseOptions, MemoryBlobSource};
pub use filesystem::FilesystemBackend;
pub use object_client::{
    MemoryObjectClient, ObjectClient, OpendalClient, PutOptions, S3Connection, StoredObject,
};
pub use object_store::{ObjectStoreBackend, ObjectStoreOptions, S3Credentials, UrlStyle};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Result of a successful remove call. Absence is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

/// Backend-specific address of one style's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Path(PathBuf),
    Object { bucket: String, key: String },
    Column { record: RecordKey, column: String },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Object { key, .. } => write!(f, "{}", key),
            Self::Column { column, .. } => write!(f, "{}", column),
        }
    }
}

/// What a backend needs to derive a locator for one style
#[derive(Debug)]
pub struct LocateRequest<'a> {
    pub record: &'a RecordKey,
    pub attachment: &'a str,
    pub style: &'a StyleDefinition,
    /// Name of the attachment's default style
    pub default_style: &'a str,
    /// The attachment's path template, already interpolated
    pub path: String,
}

/// Storage backend trait - unified interface for storage backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get storage name for logging
    fn name(&self) -> &str;

    /// Derive the locator for one style
    fn locate(&self, request: &LocateRequest<'_>) -> StorageResult<Locator>;

    /// Whether `:style` renders empty for the default style
    fn omits_default_style(&self) -> bool {
        false
    }

    /// Check if a locator holds committed bytes
    async fn exists(&self, locator: &Locator) -> StorageResult<bool>;

    /// Durably store `file` at `locator`. Backends may move a temp-backed
    /// file's bytes instead of copying them.
    async fn store(&self, locator: &Locator, file: &ReadableFile) -> StorageResult<()>;

    /// Remove the bytes at `locator`
    async fn remove(&self, locator: &Locator) -> StorageResult<RemoveOutcome>;

    /// Remove the bytes at `locator` with `root` as the current `:root`.
    /// Backends that clean up around removed content never touch `root`.
    async fn remove_within(&self, locator: &Locator, _root: &Path) -> StorageResult<RemoveOutcome> {
        self.remove(locator).await
    }

    /// Open committed bytes, `None` when absent
    async fn read(&self, locator: &Locator) -> StorageResult<Option<ReadableFile>>;

    /// Public URL; `rendered` is the interpolated URL template
    fn url(&self, _locator: &Locator, rendered: String) -> String {
        rendered
    }

    /// Time-limited URL for private content
    async fn expiring_url(
        &self,
        locator: &Locator,
        rendered: String,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        Ok(self.url(locator, rendered))
    }

    /// Column values written since the last call, for the owning record's
    /// own save. Only the database backend has any.
    fn take_pending_columns(&self) -> Vec<(String, Option<Bytes>)> {
        Vec::new()
    }
}

/// How an attachment definition obtains its backend instance
#[derive(Clone)]
pub enum BackendSpec {
    Filesystem(Arc<FilesystemBackend>),
    ObjectStore(Arc<ObjectStoreBackend>),
    /// Instantiated per attachment, since column state lives with the record
    Database(DatabaseOptions),
}

impl BackendSpec {
    pub fn instantiate(&self) -> Arc<dyn StorageBackend> {
        match self {
            Self::Filesystem(backend) => backend.clone(),
            Self::ObjectStore(backend) => backend.clone(),
            Self::Database(options) => Arc::new(DatabaseBackend::new(options.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::ObjectStore(_) => "object_store",
            Self::Database(_) => "database",
        }
    }
}

impl fmt::Debug for BackendSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
