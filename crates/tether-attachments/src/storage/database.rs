//! Database column backend
//!
//! Each style lives in a blob column of the owning record. Writes only
//! update the in-memory column values; the record's own save persists them
//! (see [`StorageBackend::take_pending_columns`]).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tether_core::RecordKey;
use tracing::{debug, instrument};

use super::{LocateRequest, Locator, RemoveOutcome, StorageBackend, StorageError, StorageResult};
use crate::readable::{ReadableFile, OCTET_STREAM};

/// Loads a single blob column, e.g. when the record was fetched with a
/// projection that left the blob columns out
#[async_trait]
pub trait BlobSource: Send + Sync {
    async fn fetch_column(&self, record: &RecordKey, column: &str) -> StorageResult<Option<Bytes>>;
}

/// Blob columns kept in a process-local table
#[derive(Debug, Default)]
pub struct MemoryBlobSource {
    rows: RwLock<HashMap<(RecordKey, String), Bytes>>,
}

impl MemoryBlobSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply column values as the record's save would
    pub fn persist(&self, record: &RecordKey, columns: Vec<(String, Option<Bytes>)>) {
        let mut rows = self.rows.write();
        for (column, value) in columns {
            let key = (record.clone(), column);
            match value {
                Some(bytes) => {
                    rows.insert(key, bytes);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
    }

    pub fn column(&self, record: &RecordKey, column: &str) -> Option<Bytes> {
        self.rows
            .read()
            .get(&(record.clone(), column.to_string()))
            .cloned()
    }
}

#[async_trait]
impl BlobSource for MemoryBlobSource {
    async fn fetch_column(&self, record: &RecordKey, column: &str) -> StorageResult<Option<Bytes>> {
        Ok(self.column(record, column))
    }
}

/// Column naming overrides and the source used for lazy loads
#[derive(Clone)]
pub struct DatabaseOptions {
    /// style name -> column name
    pub columns: BTreeMap<String, String>,
    pub source: Arc<dyn BlobSource>,
}

impl DatabaseOptions {
    pub fn new(source: Arc<dyn BlobSource>) -> Self {
        Self {
            columns: BTreeMap::new(),
            source,
        }
    }

    pub fn with_column(mut self, style: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.insert(style.into(), column.into());
        self
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("columns", &self.columns)
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Column {
    /// Value as last loaded from or written to the record store
    Loaded(Option<Bytes>),
    /// Changed in memory, not yet handed to the record's save
    Dirty(Option<Bytes>),
}

impl Column {
    fn value(&self) -> Option<&Bytes> {
        match self {
            Self::Loaded(value) | Self::Dirty(value) => value.as_ref(),
        }
    }
}

/// Blob column storage for one record's attachment
pub struct DatabaseBackend {
    options: DatabaseOptions,
    columns: Mutex<HashMap<String, Column>>,
}

impl DatabaseBackend {
    pub fn new(options: DatabaseOptions) -> Self {
        Self {
            options,
            columns: Mutex::new(HashMap::new()),
        }
    }

    /// Column holding `style`: an explicit override, else `{name}_file` for
    /// the default style and `{name}_{style}_file` for the rest
    pub fn column_name(&self, request: &LocateRequest<'_>) -> String {
        if let Some(column) = &request.style.column {
            return column.clone();
        }
        if let Some(column) = self.options.columns.get(&request.style.name) {
            return column.clone();
        }
        if request.style.name == request.default_style {
            format!("{}_file", request.attachment)
        } else {
            format!("{}_{}_file", request.attachment, request.style.name)
        }
    }

    fn column_of<'a>(&self, locator: &'a Locator) -> StorageResult<(&'a RecordKey, &'a str)> {
        match locator {
            Locator::Column { record, column } => Ok((record, column)),
            other => Err(StorageError::InvalidPath(format!(
                "database backend cannot address '{}'",
                other
            ))),
        }
    }

    /// Cached value, lazily loading columns this instance has not seen
    async fn load(&self, record: &RecordKey, column: &str) -> StorageResult<Option<Bytes>> {
        let cached = self.columns.lock().get(column).map(|state| state.value().cloned());
        if let Some(value) = cached {
            return Ok(value);
        }

        debug!(column, "Loading blob column");
        let value = self.options.source.fetch_column(record, column).await?;
        self.columns
            .lock()
            .entry(column.to_string())
            .or_insert_with(|| Column::Loaded(value.clone()));
        Ok(value)
    }
}

#[async_trait]
impl StorageBackend for DatabaseBackend {
    fn name(&self) -> &str {
        "database"
    }

    fn locate(&self, request: &LocateRequest<'_>) -> StorageResult<Locator> {
        Ok(Locator::Column {
            record: request.record.clone(),
            column: self.column_name(request),
        })
    }

    async fn exists(&self, locator: &Locator) -> StorageResult<bool> {
        let (record, column) = self.column_of(locator)?;
        Ok(self.load(record, column).await?.is_some())
    }

    #[instrument(skip(self, file), fields(storage = "database"))]
    async fn store(&self, locator: &Locator, file: &ReadableFile) -> StorageResult<()> {
        let (_, column) = self.column_of(locator)?;
        let data = file.bytes().await?;
        debug!(column, size = data.len(), "Blob column written");
        self.columns
            .lock()
            .insert(column.to_string(), Column::Dirty(Some(data)));
        Ok(())
    }

    #[instrument(skip(self), fields(storage = "database"))]
    async fn remove(&self, locator: &Locator) -> StorageResult<RemoveOutcome> {
        let (record, column) = self.column_of(locator)?;
        let previous = self.load(record, column).await?;
        self.columns
            .lock()
            .insert(column.to_string(), Column::Dirty(None));
        Ok(match previous {
            Some(_) => RemoveOutcome::Removed,
            None => RemoveOutcome::NotFound,
        })
    }

    async fn read(&self, locator: &Locator) -> StorageResult<Option<ReadableFile>> {
        let (record, column) = self.column_of(locator)?;
        match self.load(record, column).await? {
            Some(data) => Ok(Some(ReadableFile::from_bytes(&data, column, OCTET_STREAM)?)),
            None => Ok(None),
        }
    }

    fn take_pending_columns(&self) -> Vec<(String, Option<Bytes>)> {
        let mut columns = self.columns.lock();
        let mut pending: Vec<(String, Option<Bytes>)> = columns
            .iter_mut()
            .filter_map(|(name, state)| {
                let value = match state {
                    Column::Dirty(value) => value.take(),
                    Column::Loaded(_) => return None,
                };
                *state = Column::Loaded(value.clone());
                Some((name.clone(), value))
            })
            .collect();
        pending.sort_by(|a, b| a.0.cmp(&b.0));
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::StyleDefinition;

    fn request<'a>(record: &'a RecordKey, style: &'a StyleDefinition) -> LocateRequest<'a> {
        LocateRequest {
            record,
            attachment: "avatar",
            style,
            default_style: "original",
            path: String::new(),
        }
    }

    #[test]
    fn test_column_naming() {
        let source = Arc::new(MemoryBlobSource::new());
        let backend = DatabaseBackend::new(
            DatabaseOptions::new(source).with_column("small", "avatar_small_blob"),
        );
        let record = RecordKey::new("User", Some(1));

        let original = StyleDefinition::new("original");
        let thumb = StyleDefinition::new("thumb");
        let small = StyleDefinition::new("small");
        let custom = StyleDefinition::new("large").with_column("big_picture");

        assert_eq!(backend.column_name(&request(&record, &original)), "avatar_file");
        assert_eq!(backend.column_name(&request(&record, &thumb)), "avatar_thumb_file");
        assert_eq!(backend.column_name(&request(&record, &small)), "avatar_small_blob");
        assert_eq!(backend.column_name(&request(&record, &custom)), "big_picture");

        let locator = backend.locate(&request(&record, &thumb)).unwrap();
        assert_eq!(locator.to_string(), "avatar_thumb_file");
    }

    #[tokio::test]
    async fn test_writes_stay_in_memory_until_taken() {
        let source = Arc::new(MemoryBlobSource::new());
        let backend = DatabaseBackend::new(DatabaseOptions::new(source.clone()));
        let record = RecordKey::new("User", Some(1));
        let locator = Locator::Column {
            record: record.clone(),
            column: "avatar_file".to_string(),
        };

        let file = ReadableFile::from_bytes(b"blob", "a.png", "image/png").unwrap();
        backend.store(&locator, &file).await.unwrap();
        assert!(backend.exists(&locator).await.unwrap());
        assert!(source.column(&record, "avatar_file").is_none());

        let pending = backend.take_pending_columns();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, "avatar_file");
        assert_eq!(pending[0].1.as_deref(), Some(&b"blob"[..]));
        assert!(backend.take_pending_columns().is_empty());

        source.persist(&record, pending);
        assert_eq!(
            source.column(&record, "avatar_file").as_deref(),
            Some(&b"blob"[..])
        );
    }

    #[tokio::test]
    async fn test_lazy_load_and_remove() {
        let source = Arc::new(MemoryBlobSource::new());
        let record = RecordKey::new("User", Some(7));
        source.persist(
            &record,
            vec![("avatar_file".to_string(), Some(Bytes::from_static(b"stored")))],
        );

        // Fresh instance, as after loading the record without blob columns
        let backend = DatabaseBackend::new(DatabaseOptions::new(source.clone()));
        let locator = Locator::Column {
            record: record.clone(),
            column: "avatar_file".to_string(),
        };
        let read = backend.read(&locator).await.unwrap().unwrap();
        assert_eq!(read.size(), 6);

        assert_eq!(backend.remove(&locator).await.unwrap(), RemoveOutcome::Removed);
        assert!(!backend.exists(&locator).await.unwrap());
        assert_eq!(
            backend.remove(&locator).await.unwrap(),
            RemoveOutcome::NotFound
        );

        let pending = backend.take_pending_columns();
        assert_eq!(pending, vec![("avatar_file".to_string(), None)]);
        source.persist(&record, pending);
        assert!(source.column(&record, "avatar_file").is_none());
    }
}
