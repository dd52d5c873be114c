//! Configuration types and loading
//!
//! Process-wide defaults for the attachment engine. Built once at startup
//! (usually through [`AppConfig::from_env`]) and handed to the components
//! that need it.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Attachment storage defaults
    pub storage: StorageConfig,

    /// Object store configuration (used when `storage.backend` is `object_store`)
    pub object_store: Option<ObjectStoreConfig>,

    /// Content processing configuration
    pub processing: ProcessingConfig,
}

/// Which backend new attachments use unless they override it
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Filesystem,
    ObjectStore,
    Database,
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" | "fs" => Ok(Self::Filesystem),
            "object_store" | "s3" => Ok(Self::ObjectStore),
            "database" | "db" => Ok(Self::Database),
            other => Err(ConfigError::InvalidValue {
                key: "TETHER_STORAGE".to_string(),
                message: format!("unknown backend '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Value of the `:root` token, read at interpolation time
    pub root: PathBuf,
    /// Default backend
    pub backend: BackendKind,
    /// Default path template
    pub path: String,
    /// Default URL template
    pub url: String,
    /// URL rendered when an attachment has no file
    pub default_url: String,
    /// Raise on delete failures instead of logging them
    pub whiny: bool,
    /// Mode applied to files written by the filesystem backend
    pub file_mode: u32,
}

/// Access policy applied to uploaded objects
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    #[default]
    PublicRead,
    Private,
    AuthenticatedRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PublicRead => "public-read",
            Self::Private => "private",
            Self::AuthenticatedRead => "authenticated-read",
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('_', "-").as_str() {
            "public-read" | "public" => Ok(Self::PublicRead),
            "private" => Ok(Self::Private),
            "authenticated-read" => Ok(Self::AuthenticatedRead),
            other => Err(ConfigError::InvalidValue {
                key: "S3_PERMISSION".to_string(),
                message: format!("unknown permission '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
    pub permission: Permission,
    /// `virtual_host`, `path` or `alias`
    pub url_style: String,
    /// Host used by the `alias` URL style
    pub host_alias: Option<String>,
    /// Explicit protocol; derived from `permission` when absent
    pub protocol: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// Command used to sniff content types (`file -b --mime-type <path>`)
    pub file_command: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                root: PathBuf::from("."),
                backend: BackendKind::Filesystem,
                path: ":root/public/system/:class/:attachment/:id_partition/:style/:filename"
                    .to_string(),
                url: "/system/:class/:attachment/:id_partition/:style/:filename".to_string(),
                default_url: "/:attachment/:style/missing.png".to_string(),
                whiny: false,
                file_mode: 0o644,
            },
            object_store: None,
            processing: ProcessingConfig {
                file_command: "file".to_string(),
            },
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable not set: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(root) = std::env::var("TETHER_ROOT") {
            config.storage.root = PathBuf::from(root);
        }
        if let Ok(backend) = std::env::var("TETHER_STORAGE") {
            config.storage.backend = backend.parse()?;
        }
        if let Ok(path) = std::env::var("TETHER_PATH") {
            config.storage.path = path;
        }
        if let Ok(url) = std::env::var("TETHER_URL") {
            config.storage.url = url;
        }
        if let Ok(url) = std::env::var("TETHER_DEFAULT_URL") {
            config.storage.default_url = url;
        }
        if let Ok(v) = std::env::var("TETHER_WHINY") {
            config.storage.whiny = parse_bool(&v);
        }
        if let Ok(mode) = std::env::var("TETHER_FILE_MODE") {
            config.storage.file_mode =
                u32::from_str_radix(mode.trim_start_matches("0o"), 8).map_err(|e| {
                    ConfigError::InvalidValue {
                        key: "TETHER_FILE_MODE".to_string(),
                        message: e.to_string(),
                    }
                })?;
        }
        if let Ok(command) = std::env::var("TETHER_FILE_COMMAND") {
            config.processing.file_command = command;
        }

        // Object store
        if let Ok(bucket) = std::env::var("S3_BUCKET") {
            let permission = match std::env::var("S3_PERMISSION") {
                Ok(p) => p.parse()?,
                Err(_) => Permission::default(),
            };
            config.object_store = Some(ObjectStoreConfig {
                bucket,
                region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                access_key_id: std::env::var("S3_ACCESS_KEY_ID").unwrap_or_default(),
                secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").unwrap_or_default(),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
                permission,
                url_style: std::env::var("S3_URL_STYLE")
                    .unwrap_or_else(|_| "virtual_host".to_string()),
                host_alias: std::env::var("S3_HOST_ALIAS").ok(),
                protocol: std::env::var("S3_PROTOCOL").ok(),
            });
        }

        if config.storage.backend == BackendKind::ObjectStore && config.object_store.is_none() {
            return Err(ConfigError::MissingEnvVar("S3_BUCKET".to_string()));
        }

        debug!(
            backend = ?config.storage.backend,
            root = %config.storage.root.display(),
            object_store = config.object_store.is_some(),
            "Attachment configuration loaded"
        );
        Ok(config)
    }
}

fn parse_bool(v: &str) -> bool {
    v == "true" || v == "1" || v == "yes"
}
