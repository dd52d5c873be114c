//! Attachment runtime
//!
//! Process-wide collaborators: the adapter registry and the interpolator.
//! Built once at startup, then shared by reference with every attachment.

use std::sync::Arc;

use tether_core::AppConfig;

use crate::content_type::FileCommandDetector;
use crate::interpolation::Interpolator;
use crate::io::{AdapterContext, IoRegistry};

pub struct AttachmentRuntime {
    registry: IoRegistry,
    interpolator: Interpolator,
}

impl AttachmentRuntime {
    pub fn new(registry: IoRegistry, interpolator: Interpolator) -> Self {
        Self {
            registry,
            interpolator,
        }
    }

    /// Built-in adapters with `file` sniffing, rooted at the configured root
    pub fn from_config(config: &AppConfig) -> Self {
        let detector = FileCommandDetector::new(&config.processing.file_command);
        let registry = IoRegistry::with_defaults(AdapterContext::new(Arc::new(detector)));
        Self::new(registry, Interpolator::new(&config.storage.root))
    }

    pub fn registry(&self) -> &IoRegistry {
        &self.registry
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }
}

impl Default for AttachmentRuntime {
    fn default() -> Self {
        Self::new(IoRegistry::default(), Interpolator::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = AppConfig::default();
        config.storage.root = "/srv/app".into();

        let runtime = AttachmentRuntime::from_config(&config);
        assert_eq!(runtime.interpolator().root(), std::path::PathBuf::from("/srv/app"));
        assert_eq!(runtime.registry().adapter_names().first(), Some(&"nil"));
        assert_eq!(runtime.registry().adapter_names().last(), Some(&"identity"));
    }
}
