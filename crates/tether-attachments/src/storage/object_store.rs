//! Object store backend
//!
//! Styles are uploaded under bucket-relative keys derived from the
//! interpolated path. The URL convention (virtual host, path style or a
//! CNAME alias) only changes how public URLs are rendered.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tether_core::{ObjectStoreConfig, Permission};
use tracing::{debug, instrument};
use url::Url;

use super::object_client::{ObjectClient, OpendalClient, PutOptions, S3Connection};
use super::{LocateRequest, Locator, RemoveOutcome, StorageBackend, StorageError, StorageResult};
use crate::content_type;
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::ReadableFile;

const DEFAULT_REGION: &str = "us-east-1";

/// How public URLs address the bucket
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum UrlStyle {
    /// `{protocol}://{bucket}.{host}/{key}`
    #[default]
    VirtualHost,
    /// `{protocol}://{host}/{bucket}/{key}`
    Path,
    /// `{protocol}://{alias}/{key}`
    Alias(String),
}

impl UrlStyle {
    /// Parse the `S3_URL_STYLE` value; `alias` takes its host separately
    pub fn parse(style: &str, host_alias: Option<&str>) -> AttachmentResult<Self> {
        match style {
            "virtual_host" | "domain" => Ok(Self::VirtualHost),
            "path" => Ok(Self::Path),
            "alias" => match host_alias {
                Some(alias) if !alias.is_empty() => Ok(Self::Alias(alias.to_string())),
                _ => Err(AttachmentError::InvalidConfiguration(
                    "alias URL style requires a host alias".to_string(),
                )),
            },
            other => Err(AttachmentError::InvalidConfiguration(format!(
                "unknown URL style '{}'",
                other
            ))),
        }
    }
}

/// Object store settings, validated by [`ObjectStoreBackend::new`]
#[derive(Debug, Clone)]
pub struct ObjectStoreOptions {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub permission: Permission,
    /// Explicit protocol; derived from `permission` when `None`
    pub protocol: Option<String>,
    pub url_style: UrlStyle,
    pub headers: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
    /// Render `:style` empty for the default style
    pub omit_default_style: bool,
}

impl ObjectStoreOptions {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            permission: Permission::default(),
            protocol: None,
            url_style: UrlStyle::default(),
            headers: BTreeMap::new(),
            metadata: BTreeMap::new(),
            omit_default_style: false,
        }
    }

    pub fn from_config(config: &ObjectStoreConfig) -> AttachmentResult<Self> {
        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            permission: config.permission,
            protocol: config.protocol.clone(),
            url_style: UrlStyle::parse(&config.url_style, config.host_alias.as_deref())?,
            headers: BTreeMap::new(),
            metadata: BTreeMap::new(),
            omit_default_style: false,
        })
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    pub fn with_url_style(mut self, style: UrlStyle) -> Self {
        self.url_style = style;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_omit_default_style(mut self, omit: bool) -> Self {
        self.omit_default_style = omit;
        self
    }

    /// Public content defaults to `http`, anything else to `https`
    pub fn resolved_protocol(&self) -> String {
        match &self.protocol {
            Some(protocol) => protocol.to_ascii_lowercase(),
            None if self.permission == Permission::PublicRead => "http".to_string(),
            None => "https".to_string(),
        }
    }

    /// Reject invalid combinations before any client exists
    pub fn validate(&self) -> AttachmentResult<()> {
        if self.bucket.trim().is_empty() {
            return Err(AttachmentError::InvalidConfiguration(
                "bucket must not be empty".to_string(),
            ));
        }

        let protocol = self.resolved_protocol();
        if protocol != "http" && protocol != "https" {
            return Err(AttachmentError::InvalidConfiguration(format!(
                "unsupported protocol '{}'",
                protocol
            )));
        }
        if let UrlStyle::Alias(alias) = &self.url_style {
            if protocol == "https" {
                return Err(AttachmentError::InvalidConfiguration(format!(
                    "host alias '{}' cannot be served over https (permission {})",
                    alias,
                    self.permission.as_str()
                )));
            }
        }

        self.host()?;
        Ok(())
    }

    fn host(&self) -> AttachmentResult<String> {
        match &self.endpoint {
            Some(endpoint) => {
                let url = Url::parse(endpoint).map_err(|e| {
                    AttachmentError::InvalidConfiguration(format!(
                        "invalid endpoint '{}': {}",
                        endpoint, e
                    ))
                })?;
                let host = url.host_str().ok_or_else(|| {
                    AttachmentError::InvalidConfiguration(format!(
                        "endpoint '{}' has no host",
                        endpoint
                    ))
                })?;
                Ok(match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                })
            }
            None if self.region == DEFAULT_REGION => Ok("s3.amazonaws.com".to_string()),
            None => Ok(format!("s3.{}.amazonaws.com", self.region)),
        }
    }
}

/// Access keys, given inline or loaded from YAML
#[derive(Clone, Deserialize)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub bucket: Option<String>,
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl S3Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            bucket: None,
        }
    }

    /// Parse a credentials document. A section named after `environment`
    /// takes precedence over top-level keys.
    pub fn from_yaml(document: &str, environment: &str) -> AttachmentResult<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(document)
            .map_err(|e| AttachmentError::CredentialsConfig(e.to_string()))?;
        let section = match value.get(environment) {
            Some(section) if section.is_mapping() => section.clone(),
            _ => value,
        };
        let credentials: Self = serde_yaml::from_value(section)
            .map_err(|e| AttachmentError::CredentialsConfig(e.to_string()))?;
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn validate(&self) -> AttachmentResult<()> {
        if self.access_key_id.trim().is_empty() {
            return Err(AttachmentError::CredentialsConfig(
                "access_key_id is empty".to_string(),
            ));
        }
        if self.secret_access_key.trim().is_empty() {
            return Err(AttachmentError::CredentialsConfig(
                "secret_access_key is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stores styles as objects in one bucket
pub struct ObjectStoreBackend {
    options: ObjectStoreOptions,
    protocol: String,
    host: String,
    client: Arc<dyn ObjectClient>,
}

impl ObjectStoreBackend {
    /// Validate `options` and wrap an existing client
    pub fn new(options: ObjectStoreOptions, client: Arc<dyn ObjectClient>) -> AttachmentResult<Self> {
        options.validate()?;
        let protocol = options.resolved_protocol();
        let host = options.host()?;
        Ok(Self {
            options,
            protocol,
            host,
            client,
        })
    }

    /// Validate configuration and credentials, then build an S3 client. A
    /// bucket named in the credentials replaces the configured one.
    pub fn s3(mut options: ObjectStoreOptions, credentials: &S3Credentials) -> AttachmentResult<Self> {
        if let Some(bucket) = &credentials.bucket {
            options.bucket = bucket.clone();
        }
        options.validate()?;
        credentials.validate()?;

        let client = OpendalClient::s3(S3Connection {
            bucket: &options.bucket,
            region: &options.region,
            endpoint: options.endpoint.as_deref(),
            access_key_id: &credentials.access_key_id,
            secret_access_key: &credentials.secret_access_key,
        })
        .map_err(|e| AttachmentError::CredentialsConfig(e.to_string()))?;
        Self::new(options, Arc::new(client))
    }

    pub fn from_config(config: &ObjectStoreConfig) -> AttachmentResult<Self> {
        let options = ObjectStoreOptions::from_config(config)?;
        let credentials = S3Credentials::new(&config.access_key_id, &config.secret_access_key);
        Self::s3(options, &credentials)
    }

    pub fn options(&self) -> &ObjectStoreOptions {
        &self.options
    }

    /// Public URL of `key` under the configured convention
    pub fn public_url(&self, key: &str) -> String {
        match &self.options.url_style {
            UrlStyle::VirtualHost => format!(
                "{}://{}.{}/{}",
                self.protocol, self.options.bucket, self.host, key
            ),
            UrlStyle::Path => format!(
                "{}://{}/{}/{}",
                self.protocol, self.host, self.options.bucket, key
            ),
            UrlStyle::Alias(alias) => format!("{}://{}/{}", self.protocol, alias, key),
        }
    }

    fn key_of<'a>(&self, locator: &'a Locator) -> StorageResult<&'a str> {
        match locator {
            Locator::Object { key, .. } => Ok(key),
            other => Err(StorageError::InvalidPath(format!(
                "object store cannot address '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn name(&self) -> &str {
        "object_store"
    }

    fn locate(&self, request: &LocateRequest<'_>) -> StorageResult<Locator> {
        let key = request.path.trim_start_matches('/');
        if key.is_empty() {
            return Err(StorageError::InvalidPath(format!(
                "empty key for style '{}'",
                request.style.name
            )));
        }
        Ok(Locator::Object {
            bucket: self.options.bucket.clone(),
            key: key.to_string(),
        })
    }

    fn omits_default_style(&self) -> bool {
        self.options.omit_default_style
    }

    async fn exists(&self, locator: &Locator) -> StorageResult<bool> {
        self.client.head(self.key_of(locator)?).await
    }

    #[instrument(skip(self, file), fields(storage = "object_store", client = self.client.name()))]
    async fn store(&self, locator: &Locator, file: &ReadableFile) -> StorageResult<()> {
        let key = self.key_of(locator)?;
        let data = file.bytes().await?;
        let options = PutOptions {
            content_type: file.content_type().to_string(),
            permission: self.options.permission,
            headers: self.options.headers.clone(),
            metadata: self.options.metadata.clone(),
        };
        self.client.put(key, data, &options).await?;

        debug!(
            bucket = %self.options.bucket,
            key,
            permission = self.options.permission.as_str(),
            "Object stored"
        );
        Ok(())
    }

    #[instrument(skip(self), fields(storage = "object_store"))]
    async fn remove(&self, locator: &Locator) -> StorageResult<RemoveOutcome> {
        let key = self.key_of(locator)?;
        match self.client.delete(key).await {
            Ok(outcome) => {
                debug!(key, ?outcome, "Object deleted");
                Ok(outcome)
            }
            Err(StorageError::NotFound(_)) => Ok(RemoveOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    async fn read(&self, locator: &Locator) -> StorageResult<Option<ReadableFile>> {
        let key = self.key_of(locator)?;
        let object = match self.client.get(key).await? {
            Some(object) => object,
            None => return Ok(None),
        };

        let filename = key.rsplit('/').next().unwrap_or(key).to_string();
        let content_type = object
            .content_type
            .unwrap_or_else(|| content_type::from_extension(&filename));
        Ok(Some(ReadableFile::from_bytes(
            &object.data,
            filename,
            content_type,
        )?))
    }

    fn url(&self, locator: &Locator, rendered: String) -> String {
        match self.key_of(locator) {
            Ok(key) => self.public_url(key),
            Err(_) => rendered,
        }
    }

    async fn expiring_url(
        &self,
        locator: &Locator,
        rendered: String,
        expires_in: Duration,
    ) -> StorageResult<String> {
        if self.options.permission == Permission::PublicRead {
            return Ok(self.url(locator, rendered));
        }
        self.client.presign(self.key_of(locator)?, expires_in).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectClient;

    fn object(key: &str) -> Locator {
        object_in("assets", key)
    }

    fn object_in(bucket: &str, key: &str) -> Locator {
        Locator::Object {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    #[test]
    fn test_protocol_follows_permission() {
        let public = ObjectStoreOptions::new("assets");
        assert_eq!(public.resolved_protocol(), "http");

        let private = ObjectStoreOptions::new("assets").with_permission(Permission::Private);
        assert_eq!(private.resolved_protocol(), "https");

        let explicit = private.with_protocol("HTTP");
        assert_eq!(explicit.resolved_protocol(), "http");
    }

    #[test]
    fn test_alias_with_https_is_rejected() {
        let options = ObjectStoreOptions::new("assets")
            .with_permission(Permission::Private)
            .with_url_style(UrlStyle::Alias("cdn.example.com".to_string()));
        assert!(matches!(
            options.validate(),
            Err(AttachmentError::InvalidConfiguration(_))
        ));

        let explicit = ObjectStoreOptions::new("assets")
            .with_protocol("https")
            .with_url_style(UrlStyle::Alias("cdn.example.com".to_string()));
        assert!(explicit.validate().is_err());

        let public = ObjectStoreOptions::new("assets")
            .with_url_style(UrlStyle::Alias("cdn.example.com".to_string()));
        assert!(public.validate().is_ok());
    }

    #[test]
    fn test_s3_rejects_before_building_client() {
        let options = ObjectStoreOptions::new("assets")
            .with_permission(Permission::Private)
            .with_url_style(UrlStyle::Alias("cdn.example.com".to_string()));
        let credentials = S3Credentials::new("key", "secret");
        assert!(matches!(
            ObjectStoreBackend::s3(options, &credentials),
            Err(AttachmentError::InvalidConfiguration(_))
        ));

        let options = ObjectStoreOptions::new("assets");
        assert!(matches!(
            ObjectStoreBackend::s3(options, &S3Credentials::new("", "secret")),
            Err(AttachmentError::CredentialsConfig(_))
        ));
    }

    #[test]
    fn test_url_styles() {
        let client = Arc::new(MemoryObjectClient::new());
        let key = "users/1/original/a.png";

        let virtual_host =
            ObjectStoreBackend::new(ObjectStoreOptions::new("assets"), client.clone()).unwrap();
        assert_eq!(
            virtual_host.public_url(key),
            "http://assets.s3.amazonaws.com/users/1/original/a.png"
        );

        let path = ObjectStoreBackend::new(
            ObjectStoreOptions::new("assets")
                .with_url_style(UrlStyle::Path)
                .with_region("eu-west-1")
                .with_permission(Permission::Private),
            client.clone(),
        )
        .unwrap();
        assert_eq!(
            path.public_url(key),
            "https://s3.eu-west-1.amazonaws.com/assets/users/1/original/a.png"
        );

        let alias = ObjectStoreBackend::new(
            ObjectStoreOptions::new("assets")
                .with_url_style(UrlStyle::Alias("cdn.example.com".to_string())),
            client.clone(),
        )
        .unwrap();
        assert_eq!(
            alias.public_url(key),
            "http://cdn.example.com/users/1/original/a.png"
        );

        let endpoint = ObjectStoreBackend::new(
            ObjectStoreOptions::new("assets")
                .with_url_style(UrlStyle::Path)
                .with_endpoint("http://localhost:9000"),
            client,
        )
        .unwrap();
        assert_eq!(
            endpoint.public_url(key),
            "http://localhost:9000/assets/users/1/original/a.png"
        );
    }

    #[test]
    fn test_credentials_bucket_wins() {
        let mut credentials = S3Credentials::new("key", "secret");
        credentials.bucket = Some("prod-assets".to_string());
        let backend =
            ObjectStoreBackend::s3(ObjectStoreOptions::new("assets"), &credentials).unwrap();

        assert_eq!(backend.options().bucket, "prod-assets");
        assert_eq!(
            backend.public_url("users/1/original/a.png"),
            "http://prod-assets.s3.amazonaws.com/users/1/original/a.png"
        );

        let record = tether_core::RecordKey::new("User", Some(1));
        let style = crate::style::StyleDefinition::new("original");
        let locator = backend
            .locate(&LocateRequest {
                record: &record,
                attachment: "avatar",
                style: &style,
                default_style: "original",
                path: "users/1/original/a.png".to_string(),
            })
            .unwrap();
        assert_eq!(locator, object_in("prod-assets", "users/1/original/a.png"));
    }

    #[test]
    fn test_url_style_parsing() {
        assert_eq!(UrlStyle::parse("path", None).unwrap(), UrlStyle::Path);
        assert_eq!(
            UrlStyle::parse("alias", Some("cdn.example.com")).unwrap(),
            UrlStyle::Alias("cdn.example.com".to_string())
        );
        assert!(UrlStyle::parse("alias", None).is_err());
        assert!(UrlStyle::parse("ftp", None).is_err());
    }

    #[test]
    fn test_credentials_from_yaml() {
        let document = r#"
development:
  access_key_id: dev-key
  secret_access_key: dev-secret
production:
  access_key_id: prod-key
  secret_access_key: prod-secret
  bucket: prod-assets
"#;
        let production = S3Credentials::from_yaml(document, "production").unwrap();
        assert_eq!(production.access_key_id, "prod-key");
        assert_eq!(production.bucket.as_deref(), Some("prod-assets"));

        let flat = "access_key_id: k\nsecret_access_key: s\n";
        let credentials = S3Credentials::from_yaml(flat, "test").unwrap();
        assert_eq!(credentials.secret_access_key, "s");
        assert!(!format!("{:?}", credentials).contains("\"s\""));

        assert!(matches!(
            S3Credentials::from_yaml("access_key_id: k\n", "test"),
            Err(AttachmentError::CredentialsConfig(_))
        ));
        assert!(matches!(
            S3Credentials::from_yaml(": : :", "test"),
            Err(AttachmentError::CredentialsConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_store_read_remove() {
        let client = Arc::new(MemoryObjectClient::new());
        let backend = ObjectStoreBackend::new(
            ObjectStoreOptions::new("assets")
                .with_permission(Permission::Private)
                .with_header("Cache-Control", "max-age=60")
                .with_metadata("source", "tether"),
            client.clone(),
        )
        .unwrap();

        let locator = object("users/1/original/a.png");
        let file = ReadableFile::from_bytes(b"png-bytes", "a.png", "image/png").unwrap();
        backend.store(&locator, &file).await.unwrap();

        let stored = client.object("users/1/original/a.png").await.unwrap();
        assert_eq!(stored.permission, Permission::Private);
        assert_eq!(stored.content_type.as_deref(), Some("image/png"));
        assert_eq!(stored.metadata.get("source").unwrap(), "tether");

        let read = backend.read(&locator).await.unwrap().unwrap();
        assert_eq!(read.fingerprint().unwrap(), file.fingerprint().unwrap());
        assert_eq!(read.content_type(), "image/png");

        let signed = backend
            .expiring_url(&locator, String::new(), Duration::from_secs(300))
            .await
            .unwrap();
        assert!(signed.contains("expires_in=300"));

        assert_eq!(backend.remove(&locator).await.unwrap(), RemoveOutcome::Removed);
        assert_eq!(
            backend.remove(&locator).await.unwrap(),
            RemoveOutcome::NotFound
        );
        assert!(!backend.exists(&locator).await.unwrap());
        assert!(backend.read(&locator).await.unwrap().is_none());
    }
}
