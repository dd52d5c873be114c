//! # tether-attachments
//!
//! Attachment lifecycle engine for Tether.
//!
//! ## Features
//!
//! - Input adapters (paths, open files, buffers, uploads, `data:` URIs, remote URLs)
//! - Style generation through a pluggable [`Processor`]
//! - Path/URL templates with `:token` interpolation
//! - Deferred writes and deletes, flushed from the owning record's save
//! - Storage backends (local filesystem, S3-compatible object store, database columns)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_attachments::{Attachment, AttachmentDefinition, AttachmentRuntime, StyleDefinition};
//! use tether_core::{AppConfig, RecordKey};
//!
//! let config = AppConfig::from_env()?;
//! let runtime = Arc::new(AttachmentRuntime::from_config(&config));
//! let definition = AttachmentDefinition::from_config("avatar", &config)?
//!     .with_style(StyleDefinition::new("thumb").with_geometry("100x100>"));
//!
//! let mut avatar = Attachment::new(Arc::new(definition), runtime, RecordKey::new("User", Some(42)));
//! avatar.assign("/tmp/me.png").await?;
//! avatar.save().await?;
//!
//! println!("{}", avatar.url("thumb"));
//! ```

pub mod attachment;
pub mod content_type;
pub mod definition;
pub mod error;
pub mod interpolation;
pub mod io;
pub mod model;
pub mod processor;
pub mod readable;
pub mod runtime;
pub mod set;
pub mod storage;
pub mod style;

pub use attachment::Attachment;
pub use content_type::{ContentTypeDetector, ExtensionDetector, FileCommandDetector};
pub use definition::{AttachmentDefinition, OBJECT_STORE_PATH};
pub use error::{AttachmentError, AttachmentResult, ProcessingError};
pub use interpolation::{InterpolationContext, Interpolator, TokenFn};
pub use io::{
    AdapterContext, AttachmentSource, Buffer, IoAdapter, IoRegistry, OpenFile, StoredFile,
    UploadedFile,
};
pub use model::{sanitize_filename, AttachmentMetadata};
pub use processor::{Passthrough, Processor};
pub use readable::ReadableFile;
pub use runtime::AttachmentRuntime;
pub use set::AttachmentSet;
pub use storage::{
    BackendSpec, BlobSource, DatabaseBackend, DatabaseOptions, FilesystemBackend, Locator,
    MemoryBlobSource, MemoryObjectClient, ObjectClient, ObjectStoreBackend, ObjectStoreOptions,
    OpendalClient, RemoveOutcome, S3Credentials, StorageBackend, StorageError, StorageResult,
    UrlStyle,
};
pub use style::{StyleDefinition, StyleResolver, StylesConfig, ORIGINAL};
