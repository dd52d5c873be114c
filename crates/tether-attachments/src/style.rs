//! Style Resolver
//!
//! Turns an attachment's style configuration into the ordered set of styles
//! to store, and generates one file per style from the original.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::AttachmentResult;
use crate::model::AttachmentMetadata;
use crate::processor::Processor;
use crate::readable::ReadableFile;

/// Name of the unprocessed style
pub const ORIGINAL: &str = "original";

/// A named variant of an attachment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StyleDefinition {
    pub name: String,
    /// Processor geometry, e.g. `"100x100#"`
    pub geometry: Option<String>,
    /// Output format; also overrides the `:extension` token
    pub format: Option<String>,
    /// Free-form processor options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// Storage column override (database backend)
    pub column: Option<String>,
}

impl StyleDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = Some(geometry.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }

    /// Whether the processor has anything to do for this style
    pub fn has_params(&self) -> bool {
        self.geometry.is_some() || self.format.is_some() || !self.options.is_empty()
    }
}

/// Computes styles from the attachment's current metadata
pub type StylesFn = Arc<dyn Fn(&AttachmentMetadata) -> Vec<StyleDefinition> + Send + Sync>;

/// Configured styles: a fixed list or a function of the attachment
#[derive(Clone)]
pub enum StylesConfig {
    Static(Vec<StyleDefinition>),
    Dynamic(StylesFn),
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self::Static(Vec::new())
    }
}

impl fmt::Debug for StylesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(styles) => f.debug_tuple("Static").field(styles).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<Vec<StyleDefinition>> for StylesConfig {
    fn from(styles: Vec<StyleDefinition>) -> Self {
        Self::Static(styles)
    }
}

/// Resolves and generates styles for one attachment definition
pub struct StyleResolver<'a> {
    styles: &'a StylesConfig,
    default_style: &'a str,
}

impl<'a> StyleResolver<'a> {
    pub fn new(styles: &'a StylesConfig, default_style: &'a str) -> Self {
        Self {
            styles,
            default_style,
        }
    }

    /// `original`, then the default style when it is not configured, then
    /// configured styles in declaration order. Names are unique.
    pub fn resolve(&self, metadata: &AttachmentMetadata) -> Vec<StyleDefinition> {
        let configured = match self.styles {
            StylesConfig::Static(styles) => styles.clone(),
            StylesConfig::Dynamic(styles) => styles(metadata),
        };

        let mut resolved: Vec<StyleDefinition> = Vec::with_capacity(configured.len() + 2);
        let lookup = |name: &str| configured.iter().find(|s| s.name == name).cloned();

        resolved.push(lookup(ORIGINAL).unwrap_or_else(|| StyleDefinition::new(ORIGINAL)));
        if self.default_style != ORIGINAL {
            resolved.push(
                lookup(self.default_style)
                    .unwrap_or_else(|| StyleDefinition::new(self.default_style)),
            );
        }
        for style in configured {
            if !resolved.iter().any(|s| s.name == style.name) {
                resolved.push(style);
            }
        }
        resolved
    }

    /// One file per style. The original is kept as-is; image styles with
    /// parameters go through `processor`, everything else gets a copy.
    /// The first processing error aborts the whole set.
    #[instrument(skip_all, fields(styles = styles.len()))]
    pub async fn generate(
        &self,
        original: ReadableFile,
        styles: &[StyleDefinition],
        processor: &dyn Processor,
    ) -> AttachmentResult<Vec<(String, ReadableFile)>> {
        let processable = is_image(original.content_type());
        let mut derived = Vec::with_capacity(styles.len());

        for style in styles.iter().filter(|s| s.name != ORIGINAL) {
            let file = if processable && style.has_params() {
                debug!(style = %style.name, geometry = ?style.geometry, "Processing style");
                processor.process(&original, style).await?
            } else {
                original.duplicate()?
            };
            derived.push((style.name.clone(), file));
        }

        let mut files = Vec::with_capacity(derived.len() + 1);
        files.push((ORIGINAL.to_string(), original));
        files.extend(derived);
        Ok(files)
    }
}

fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}
