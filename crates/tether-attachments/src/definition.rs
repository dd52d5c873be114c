//! Attachment definitions
//!
//! Per-attachment configuration, fixed once the owning record type is set
//! up. Defaults come from [`AppConfig`].

use std::fmt;
use std::sync::Arc;

use tether_core::{AppConfig, BackendKind};

use crate::error::{AttachmentError, AttachmentResult};
use crate::processor::{Passthrough, Processor};
use crate::storage::{BackendSpec, FilesystemBackend, ObjectStoreBackend};
use crate::style::{StyleDefinition, StylesConfig, ORIGINAL};

/// Default key template for the object store; `:root` has no meaning there
pub const OBJECT_STORE_PATH: &str = ":class/:attachment/:id_partition/:style/:filename";

/// Configuration of one named attachment
#[derive(Clone)]
pub struct AttachmentDefinition {
    pub name: String,
    pub path: String,
    pub url: String,
    /// URL rendered while no file is assigned
    pub default_url: String,
    pub styles: StylesConfig,
    pub default_style: String,
    /// Surface delete failures instead of logging them
    pub whiny: bool,
    /// Append `?<updated_at>` to URLs
    pub use_timestamp: bool,
    pub storage: BackendSpec,
    pub processor: Arc<dyn Processor>,
}

/// Object keys are bucket-relative: a `:root`-anchored template falls back
/// to [`OBJECT_STORE_PATH`]
fn path_for_storage(path: String, storage: &BackendSpec) -> String {
    match storage {
        BackendSpec::ObjectStore(_) if path.starts_with(":root") => OBJECT_STORE_PATH.to_string(),
        _ => path,
    }
}

impl AttachmentDefinition {
    pub fn new(name: impl Into<String>, storage: BackendSpec) -> Self {
        let defaults = AppConfig::default();
        Self {
            name: name.into(),
            path: path_for_storage(defaults.storage.path, &storage),
            url: defaults.storage.url,
            default_url: defaults.storage.default_url,
            styles: StylesConfig::default(),
            default_style: ORIGINAL.to_string(),
            whiny: defaults.storage.whiny,
            use_timestamp: true,
            storage,
            processor: Arc::new(Passthrough),
        }
    }

    /// Definition using the configured default backend. The database
    /// backend needs a blob source and must be set with [`Self::with_storage`].
    pub fn from_config(name: impl Into<String>, config: &AppConfig) -> AttachmentResult<Self> {
        let storage = match config.storage.backend {
            BackendKind::Filesystem => BackendSpec::Filesystem(Arc::new(
                FilesystemBackend::new(&config.storage.root)
                    .with_file_mode(config.storage.file_mode),
            )),
            BackendKind::ObjectStore => {
                let object_store = config.object_store.as_ref().ok_or_else(|| {
                    AttachmentError::InvalidConfiguration(
                        "object store backend selected without object store settings".to_string(),
                    )
                })?;
                BackendSpec::ObjectStore(Arc::new(ObjectStoreBackend::from_config(object_store)?))
            }
            BackendKind::Database => {
                return Err(AttachmentError::InvalidConfiguration(
                    "database backend requires a blob source".to_string(),
                ))
            }
        };

        Ok(Self {
            path: path_for_storage(config.storage.path.clone(), &storage),
            url: config.storage.url.clone(),
            default_url: config.storage.default_url.clone(),
            whiny: config.storage.whiny,
            ..Self::new(name, storage)
        })
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_default_url(mut self, url: impl Into<String>) -> Self {
        self.default_url = url.into();
        self
    }

    pub fn with_styles(mut self, styles: impl Into<StylesConfig>) -> Self {
        self.styles = styles.into();
        self
    }

    pub fn with_style(mut self, style: StyleDefinition) -> Self {
        match &mut self.styles {
            StylesConfig::Static(styles) => styles.push(style),
            StylesConfig::Dynamic(_) => self.styles = StylesConfig::Static(vec![style]),
        }
        self
    }

    pub fn with_default_style(mut self, style: impl Into<String>) -> Self {
        self.default_style = style.into();
        self
    }

    pub fn with_whiny(mut self, whiny: bool) -> Self {
        self.whiny = whiny;
        self
    }

    pub fn with_use_timestamp(mut self, use_timestamp: bool) -> Self {
        self.use_timestamp = use_timestamp;
        self
    }

    pub fn with_storage(mut self, storage: BackendSpec) -> Self {
        self.path = path_for_storage(self.path, &storage);
        self.storage = storage;
        self
    }

    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processor = processor;
        self
    }
}

impl fmt::Debug for AttachmentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentDefinition")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("url", &self.url)
            .field("styles", &self.styles)
            .field("default_style", &self.default_style)
            .field("whiny", &self.whiny)
            .field("storage", &self.storage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tether_core::{ObjectStoreConfig, Permission};

    use super::*;
    use crate::storage::{MemoryObjectClient, ObjectStoreOptions};

    fn object_store_config(permission: Permission, url_style: &str) -> ObjectStoreConfig {
        ObjectStoreConfig {
            bucket: "assets".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: "key".to_string(),
            secret_access_key: "secret".to_string(),
            endpoint: None,
            permission,
            url_style: url_style.to_string(),
            host_alias: Some("cdn.example.com".to_string()),
            protocol: None,
        }
    }

    #[test]
    fn test_from_config_filesystem() {
        let mut config = AppConfig::default();
        config.storage.whiny = true;
        config.storage.root = "/srv/app".into();

        let definition = AttachmentDefinition::from_config("avatar", &config).unwrap();
        assert_eq!(definition.name, "avatar");
        assert!(definition.whiny);
        assert_eq!(definition.default_style, "original");
        assert_eq!(definition.storage.name(), "filesystem");
        assert!(definition.path.starts_with(":root/"));
    }

    #[test]
    fn test_from_config_object_store() {
        let mut config = AppConfig::default();
        config.storage.backend = BackendKind::ObjectStore;
        config.object_store = Some(object_store_config(Permission::PublicRead, "alias"));

        let definition = AttachmentDefinition::from_config("avatar", &config).unwrap();
        assert_eq!(definition.storage.name(), "object_store");
        assert_eq!(definition.path, OBJECT_STORE_PATH);
    }

    #[test]
    fn test_object_store_definitions_drop_root() {
        let backend = Arc::new(
            ObjectStoreBackend::new(
                ObjectStoreOptions::new("assets"),
                Arc::new(MemoryObjectClient::new()),
            )
            .unwrap(),
        );

        let built = AttachmentDefinition::new("avatar", BackendSpec::ObjectStore(backend.clone()));
        assert_eq!(built.path, OBJECT_STORE_PATH);

        let switched = AttachmentDefinition::new(
            "avatar",
            BackendSpec::Filesystem(Arc::new(FilesystemBackend::new("/tmp"))),
        )
        .with_storage(BackendSpec::ObjectStore(backend.clone()));
        assert_eq!(switched.path, OBJECT_STORE_PATH);

        let custom = AttachmentDefinition::new("avatar", BackendSpec::ObjectStore(backend))
            .with_path("uploads/:id/:filename");
        assert_eq!(custom.path, "uploads/:id/:filename");
    }

    #[test]
    fn test_private_alias_rejected_at_configuration() {
        let mut config = AppConfig::default();
        config.storage.backend = BackendKind::ObjectStore;
        config.object_store = Some(object_store_config(Permission::Private, "alias"));

        assert!(matches!(
            AttachmentDefinition::from_config("avatar", &config),
            Err(AttachmentError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_missing_backend_settings() {
        let mut config = AppConfig::default();
        config.storage.backend = BackendKind::ObjectStore;
        assert!(AttachmentDefinition::from_config("avatar", &config).is_err());

        config.storage.backend = BackendKind::Database;
        assert!(AttachmentDefinition::from_config("avatar", &config).is_err());
    }

    #[test]
    fn test_builders() {
        let definition = AttachmentDefinition::new(
            "avatar",
            BackendSpec::Filesystem(Arc::new(FilesystemBackend::new("/tmp"))),
        )
        .with_style(StyleDefinition::new("thumb").with_geometry("8x8"))
        .with_style(StyleDefinition::new("medium").with_geometry("300x300"))
        .with_default_style("medium")
        .with_use_timestamp(false);

        match &definition.styles {
            StylesConfig::Static(styles) => assert_eq!(styles.len(), 2),
            StylesConfig::Dynamic(_) => panic!("expected static styles"),
        }
        assert_eq!(definition.default_style, "medium");
        assert!(!definition.use_timestamp);
    }
}
