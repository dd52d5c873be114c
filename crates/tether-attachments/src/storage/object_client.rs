//! Object store clients
//!
//! The object-store backend talks to providers through [`ObjectClient`].
//! [`OpendalClient`] covers S3-compatible services; [`MemoryObjectClient`]
//! keeps objects in process for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use opendal::{services, ErrorKind, Operator};
use tether_core::Permission;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use super::{RemoveOutcome, StorageError, StorageResult};

/// Per-object options applied on upload
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: String,
    pub permission: Permission,
    /// Extra HTTP headers (`Cache-Control`, `Content-Disposition`, ...)
    pub headers: BTreeMap<String, String>,
    /// User metadata stored alongside the object
    pub metadata: BTreeMap<String, String>,
}

/// An object as returned by [`ObjectClient::get`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub permission: Permission,
    pub metadata: BTreeMap<String, String>,
}

/// Minimal provider contract used by the object-store backend
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>>;

    async fn head(&self, key: &str) -> StorageResult<bool>;

    async fn delete(&self, key: &str) -> StorageResult<RemoveOutcome>;

    /// Signed GET URL valid for `expires_in`
    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<String>;
}

impl From<opendal::Error> for StorageError {
    fn from(err: opendal::Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound(err.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            ErrorKind::Unsupported => Self::Unsupported(err.to_string()),
            _ => Self::BackendError(err.to_string()),
        }
    }
}

/// S3-compatible client backed by Apache OpenDAL
pub struct OpendalClient {
    operator: Operator,
    name: &'static str,
}

/// Connection settings for [`OpendalClient::s3`]
#[derive(Debug, Clone)]
pub struct S3Connection<'a> {
    pub bucket: &'a str,
    pub region: &'a str,
    pub endpoint: Option<&'a str>,
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
}

impl OpendalClient {
    pub fn s3(connection: S3Connection<'_>) -> StorageResult<Self> {
        let mut builder = services::S3::default()
            .bucket(connection.bucket)
            .region(connection.region)
            .access_key_id(connection.access_key_id)
            .secret_access_key(connection.secret_access_key);
        if let Some(endpoint) = connection.endpoint {
            builder = builder.endpoint(endpoint);
        }

        let operator = Operator::new(builder)?.finish();
        Ok(Self {
            operator,
            name: "s3",
        })
    }

    /// In-process OpenDAL operator
    pub fn memory() -> StorageResult<Self> {
        let operator = Operator::new(services::Memory::default())?.finish();
        Ok(Self {
            operator,
            name: "opendal-memory",
        })
    }
}

#[async_trait]
impl ObjectClient for OpendalClient {
    fn name(&self) -> &str {
        self.name
    }

    #[instrument(skip(self, data, options), fields(client = self.name))]
    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()> {
        let mut write = self
            .operator
            .write_with(key, data)
            .content_type(&options.content_type);
        for (name, value) in &options.headers {
            write = match name.to_ascii_lowercase().as_str() {
                "cache-control" => write.cache_control(value),
                "content-disposition" => write.content_disposition(value),
                "content-encoding" => write.content_encoding(value),
                _ => {
                    debug!(header = %name, "Header not supported by provider, skipped");
                    write
                }
            };
        }
        if options.permission != Permission::default() {
            debug!(
                permission = options.permission.as_str(),
                "Object permission not supported by provider, bucket policy applies"
            );
        }
        if !options.metadata.is_empty() {
            let metadata: HashMap<String, String> = options
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            write = write.user_metadata(metadata);
        }
        write.await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        let meta = match self.operator.stat(key).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = self.operator.read(key).await?.to_bytes();
        Ok(Some(StoredObject {
            data,
            content_type: meta.content_type().map(String::from),
            // Object ACLs are managed by bucket policy on this client
            permission: Permission::default(),
            metadata: meta
                .user_metadata()
                .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
        }))
    }

    async fn head(&self, key: &str) -> StorageResult<bool> {
        match self.operator.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<RemoveOutcome> {
        if !self.head(key).await? {
            return Ok(RemoveOutcome::NotFound);
        }
        match self.operator.delete(key).await {
            Ok(()) => Ok(RemoveOutcome::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(RemoveOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let presigned = self.operator.presign_read(key, expires_in).await?;
        Ok(presigned.uri().to_string())
    }
}

/// Objects kept in a process-local map
#[derive(Debug, Default)]
pub struct MemoryObjectClient {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryObjectClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object as stored, including the options it was uploaded with
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectClient for MemoryObjectClient {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, key: &str, data: Bytes, options: &PutOptions) -> StorageResult<()> {
        let object = StoredObject {
            data,
            content_type: Some(options.content_type.clone()),
            permission: options.permission,
            metadata: options.metadata.clone(),
        };
        self.objects.write().await.insert(key.to_string(), object);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        Ok(self.object(key).await)
    }

    async fn head(&self, key: &str) -> StorageResult<bool> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<RemoveOutcome> {
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(RemoveOutcome::Removed),
            None => Ok(RemoveOutcome::NotFound),
        }
    }

    async fn presign(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        if !self.head(key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        Ok(format!(
            "memory:///{}?expires_in={}",
            key,
            expires_in.as_secs()
        ))
    }
}
