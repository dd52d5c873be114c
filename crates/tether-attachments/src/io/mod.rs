//! IO Adapters
//!
//! Normalizes heterogeneous input values into a [`ReadableFile`]. Adapters
//! are consulted in priority order, and in registration order within the
//! same priority; the first adapter whose predicate matches wins.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::content_type::{ContentTypeDetector, ExtensionDetector};
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::ReadableFile;
use crate::storage::{Locator, StorageBackend};

mod buffer;
mod data_uri;
mod file;
mod nil;
mod reference;
mod upload;
mod uri;

pub use buffer::BufferAdapter;
pub use data_uri::DataUriAdapter;
pub use file::{FileAdapter, PathAdapter};
pub use nil::{EmptyStringAdapter, NilAdapter};
pub use reference::{IdentityAdapter, StoredFileAdapter};
pub use upload::{FormFieldsAdapter, UploadedFileAdapter};
pub use uri::UriAdapter;

/// Adapter priorities. Lower runs first.
pub mod priority {
    /// Cheap short-circuits (nil, empty string)
    pub const FIRST: i32 = 0;
    /// Concrete input shapes
    pub const CONCRETE: i32 = 100;
    /// Catch-alls that must never mask a concrete shape
    pub const LAST: i32 = 1000;
}

/// An already-open local file and where it lives
#[derive(Debug)]
pub struct OpenFile {
    pub file: std::fs::File,
    pub path: PathBuf,
}

impl OpenFile {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        Ok(Self {
            file: std::fs::File::open(&path)?,
            path,
        })
    }
}

/// In-memory content, optionally carrying a name and type
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    pub data: Bytes,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl Buffer {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A file received by a web framework: resident temp file plus client metadata
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub tempfile: PathBuf,
    pub original_filename: String,
    pub content_type: Option<String>,
}

impl UploadedFile {
    pub fn new(tempfile: impl Into<PathBuf>, original_filename: impl Into<String>) -> Self {
        Self {
            tempfile: tempfile.into(),
            original_filename: original_filename.into(),
            content_type: None,
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A committed style of another attachment
#[derive(Clone)]
pub struct StoredFile {
    pub backend: Arc<dyn StorageBackend>,
    pub locator: Locator,
    pub original_filename: String,
    pub content_type: String,
}

impl fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredFile")
            .field("backend", &self.backend.name())
            .field("locator", &self.locator)
            .field("original_filename", &self.original_filename)
            .finish()
    }
}

/// Everything an attachment can be assigned from
#[derive(Debug)]
pub enum AttachmentSource {
    /// Explicit "no file": clears the attachment
    Nil,
    /// Path, `http(s)://` URL, `data:` URI, or the empty string
    Text(String),
    File(OpenFile),
    Temp(NamedTempFile),
    Buffer(Buffer),
    Upload(UploadedFile),
    /// Untyped form fields; adaptable when a `tempfile` entry is present
    Fields(HashMap<String, String>),
    Stored(StoredFile),
    /// Already adapted
    Readable(ReadableFile),
}

impl AttachmentSource {
    /// Short description used in logs and `NoHandler` errors
    pub fn describe(&self) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::Text(s) if s.len() > 64 => format!("text ({} bytes)", s.len()),
            Self::Text(s) => format!("text {:?}", s),
            Self::File(f) => format!("file {}", f.path.display()),
            Self::Temp(t) => format!("temp file {}", t.path().display()),
            Self::Buffer(b) => format!("buffer ({} bytes)", b.data.len()),
            Self::Upload(u) => format!("upload {:?}", u.original_filename),
            Self::Fields(f) => format!("fields {:?}", f.keys().collect::<Vec<_>>()),
            Self::Stored(s) => format!("stored {}", s.locator),
            Self::Readable(r) => format!("readable {:?}", r.original_filename()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttachmentSource {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for AttachmentSource {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Bytes> for AttachmentSource {
    fn from(data: Bytes) -> Self {
        Self::Buffer(Buffer::new(data))
    }
}

impl From<Vec<u8>> for AttachmentSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Buffer(Buffer::new(data))
    }
}

impl From<Buffer> for AttachmentSource {
    fn from(buffer: Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<OpenFile> for AttachmentSource {
    fn from(file: OpenFile) -> Self {
        Self::File(file)
    }
}

impl From<NamedTempFile> for AttachmentSource {
    fn from(temp: NamedTempFile) -> Self {
        Self::Temp(temp)
    }
}

impl From<UploadedFile> for AttachmentSource {
    fn from(upload: UploadedFile) -> Self {
        Self::Upload(upload)
    }
}

impl From<HashMap<String, String>> for AttachmentSource {
    fn from(fields: HashMap<String, String>) -> Self {
        Self::Fields(fields)
    }
}

impl From<StoredFile> for AttachmentSource {
    fn from(stored: StoredFile) -> Self {
        Self::Stored(stored)
    }
}

impl From<ReadableFile> for AttachmentSource {
    fn from(file: ReadableFile) -> Self {
        Self::Readable(file)
    }
}

impl<T: Into<AttachmentSource>> From<Option<T>> for AttachmentSource {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}

/// Shared collaborators handed to adapters
#[derive(Clone)]
pub struct AdapterContext {
    pub detector: Arc<dyn ContentTypeDetector>,
    pub http: reqwest::Client,
}

impl AdapterContext {
    pub fn new(detector: Arc<dyn ContentTypeDetector>) -> Self {
        Self {
            detector,
            http: reqwest::Client::new(),
        }
    }
}

impl Default for AdapterContext {
    fn default() -> Self {
        Self::new(Arc::new(ExtensionDetector))
    }
}

/// One input shape: a predicate plus the conversion it guards
#[async_trait]
pub trait IoAdapter: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &'static str;

    /// Whether this adapter handles `source`
    fn handles(&self, source: &AttachmentSource) -> bool;

    /// Convert `source`; only called when `handles` returned true
    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile>;
}

struct Registration {
    priority: i32,
    adapter: Arc<dyn IoAdapter>,
}

/// Ordered adapter registry
pub struct IoRegistry {
    registrations: Vec<Registration>,
    context: AdapterContext,
}

impl IoRegistry {
    /// Registry without any adapters
    pub fn empty(context: AdapterContext) -> Self {
        Self {
            registrations: Vec::new(),
            context,
        }
    }

    /// Registry with every built-in adapter
    pub fn with_defaults(context: AdapterContext) -> Self {
        let mut registry = Self::empty(context);
        registry
            .register_at(priority::FIRST, NilAdapter)
            .register_at(priority::FIRST, EmptyStringAdapter)
            .register_at(priority::CONCRETE, DataUriAdapter)
            .register_at(priority::CONCRETE, UriAdapter)
            .register_at(priority::CONCRETE, PathAdapter)
            .register_at(priority::CONCRETE, BufferAdapter)
            .register_at(priority::CONCRETE, UploadedFileAdapter::default())
            .register_at(priority::CONCRETE, FormFieldsAdapter::default())
            .register_at(priority::CONCRETE, FileAdapter)
            .register_at(priority::CONCRETE, StoredFileAdapter)
            .register_at(priority::LAST, IdentityAdapter);
        registry
    }

    /// Register with [`priority::CONCRETE`]
    pub fn register(&mut self, adapter: impl IoAdapter + 'static) -> &mut Self {
        self.register_at(priority::CONCRETE, adapter)
    }

    pub fn register_at(&mut self, priority: i32, adapter: impl IoAdapter + 'static) -> &mut Self {
        let index = self
            .registrations
            .iter()
            .position(|r| r.priority > priority)
            .unwrap_or(self.registrations.len());
        self.registrations.insert(
            index,
            Registration {
                priority,
                adapter: Arc::new(adapter),
            },
        );
        self
    }

    /// Adapter names in evaluation order
    pub fn adapter_names(&self) -> Vec<&'static str> {
        self.registrations.iter().map(|r| r.adapter.name()).collect()
    }

    pub fn context(&self) -> &AdapterContext {
        &self.context
    }

    /// First adapter that handles `source`
    pub fn handler_for(&self, source: &AttachmentSource) -> Option<Arc<dyn IoAdapter>> {
        self.registrations
            .iter()
            .find(|r| r.adapter.handles(source))
            .map(|r| Arc::clone(&r.adapter))
    }

    /// Resolve `source` to a readable file
    #[instrument(skip_all, fields(source = %source.describe()))]
    pub async fn resolve(&self, source: AttachmentSource) -> AttachmentResult<ReadableFile> {
        let adapter = self
            .handler_for(&source)
            .ok_or_else(|| AttachmentError::NoHandler(source.describe()))?;
        debug!(adapter = adapter.name(), "Adapting attachment source");
        adapter.adapt(source, &self.context).await
    }
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::with_defaults(AdapterContext::default())
    }
}

/// Last path component of `path`, or `fallback`
pub(crate) fn basename_or(path: &std::path::Path, fallback: &str) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}
