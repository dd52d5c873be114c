//! Attachment State Machine
//!
//! One [`Attachment`] exists per (record, attachment name). Assignment
//! resolves the input, generates every style and queues them for write,
//! queuing the previous files for delete. Nothing touches storage until
//! [`Attachment::flush_writes`] and [`Attachment::flush_deletes`] run.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tether_core::{Id, RecordKey};
use tracing::{debug, error, info, instrument, warn};

use crate::content_type;
use crate::definition::AttachmentDefinition;
use crate::error::{AttachmentError, AttachmentResult};
use crate::interpolation::InterpolationContext;
use crate::io::{AttachmentSource, StoredFile};
use crate::model::{sanitize_filename, AttachmentMetadata};
use crate::readable::ReadableFile;
use crate::runtime::AttachmentRuntime;
use crate::storage::{LocateRequest, Locator, StorageBackend, StorageError};
use crate::style::{StyleDefinition, StyleResolver, ORIGINAL};

/// Attachment handle bound to one record
pub struct Attachment {
    definition: Arc<AttachmentDefinition>,
    runtime: Arc<AttachmentRuntime>,
    backend: Arc<dyn StorageBackend>,
    record: RecordKey,
    metadata: AttachmentMetadata,
    queued_for_write: Vec<(String, ReadableFile)>,
    queued_for_delete: Vec<Locator>,
    dirty: bool,
}

impl Attachment {
    pub fn new(
        definition: Arc<AttachmentDefinition>,
        runtime: Arc<AttachmentRuntime>,
        record: RecordKey,
    ) -> Self {
        let backend = definition.storage.instantiate();
        Self {
            definition,
            runtime,
            backend,
            record,
            metadata: AttachmentMetadata::default(),
            queued_for_write: Vec::new(),
            queued_for_delete: Vec::new(),
            dirty: false,
        }
    }

    /// Start from metadata loaded with the record
    pub fn with_metadata(mut self, metadata: AttachmentMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &AttachmentDefinition {
        &self.definition
    }

    pub fn record(&self) -> &RecordKey {
        &self.record
    }

    /// Bind the record's primary key once it has been assigned
    pub fn set_record_id(&mut self, id: Id) {
        self.record.id = Some(id);
    }

    pub fn metadata(&self) -> &AttachmentMetadata {
        &self.metadata
    }

    pub fn is_present(&self) -> bool {
        self.metadata.is_present()
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.metadata.file_name.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.metadata.content_type.as_deref()
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.file_size
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.updated_at
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.metadata.fingerprint.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Styles with a pending write, in write order
    pub fn queued_styles(&self) -> Vec<&str> {
        self.queued_for_write
            .iter()
            .map(|(style, _)| style.as_str())
            .collect()
    }

    pub fn queued_deletes(&self) -> &[Locator] {
        &self.queued_for_delete
    }

    /// Resolved styles for the current metadata
    pub fn styles(&self) -> Vec<StyleDefinition> {
        self.resolver().resolve(&self.metadata)
    }

    fn resolver(&self) -> StyleResolver<'_> {
        StyleResolver::new(&self.definition.styles, &self.definition.default_style)
    }

    fn style(&self, name: &str) -> StyleDefinition {
        self.styles()
            .into_iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| StyleDefinition::new(name))
    }

    fn context<'a>(
        &'a self,
        style: &'a StyleDefinition,
        metadata: &'a AttachmentMetadata,
    ) -> InterpolationContext<'a> {
        InterpolationContext {
            record: &self.record,
            attachment: &self.definition.name,
            style,
            default_style: &self.definition.default_style,
            omit_default_style: self.backend.omits_default_style(),
            metadata,
        }
    }

    fn locate_with(
        &self,
        style: &StyleDefinition,
        metadata: &AttachmentMetadata,
    ) -> Result<Locator, StorageError> {
        let ctx = self.context(style, metadata);
        let path = self
            .runtime
            .interpolator()
            .interpolate(&self.definition.path, &ctx);
        self.backend.locate(&LocateRequest {
            record: &self.record,
            attachment: &self.definition.name,
            style,
            default_style: &self.definition.default_style,
            path,
        })
    }

    /// Locators of every style described by `metadata`
    fn locators_for(&self, metadata: &AttachmentMetadata) -> AttachmentResult<Vec<Locator>> {
        if !metadata.is_present() {
            return Ok(Vec::new());
        }
        self.resolver()
            .resolve(metadata)
            .iter()
            .map(|style| {
                self.locate_with(style, metadata)
                    .map_err(AttachmentError::from)
            })
            .collect()
    }

    /// Locator of `style` for the current file, if any
    pub fn locator(&self, style: &str) -> AttachmentResult<Option<Locator>> {
        if !self.is_present() {
            return Ok(None);
        }
        Ok(Some(self.locate_with(&self.style(style), &self.metadata)?))
    }

    /// Backend-specific identifier of `style`: a filesystem path, an object
    /// key or a column name
    pub fn path(&self, style: &str) -> AttachmentResult<Option<String>> {
        Ok(self.locator(style)?.map(|locator| locator.to_string()))
    }

    /// Public URL of `style`, or the default URL when no file is assigned
    pub fn url(&self, style: &str) -> String {
        let style = self.style(style);
        let interpolator = self.runtime.interpolator();
        if !self.is_present() {
            return interpolator.interpolate(
                &self.definition.default_url,
                &self.context(&style, &self.metadata),
            );
        }

        let ctx = self.context(&style, &self.metadata);
        let rendered = interpolator.interpolate(&self.definition.url, &ctx);
        let url = match self.locate_with(&style, &self.metadata) {
            Ok(locator) => self.backend.url(&locator, rendered),
            Err(_) => rendered,
        };
        self.timestamped(url)
    }

    /// Time-limited URL where the backend can sign, else [`Self::url`]
    pub async fn expiring_url(&self, style: &str, expires_in: Duration) -> AttachmentResult<String> {
        let definition = self.style(style);
        let locator = match self.locator(style)? {
            Some(locator) => locator,
            None => return Ok(self.url(style)),
        };
        let rendered = self
            .runtime
            .interpolator()
            .interpolate(&self.definition.url, &self.context(&definition, &self.metadata));
        Ok(self
            .backend
            .expiring_url(&locator, rendered, expires_in)
            .await?)
    }

    fn timestamped(&self, url: String) -> String {
        match self.metadata.updated_at {
            Some(updated_at) if self.definition.use_timestamp => {
                let separator = if url.contains('?') { '&' } else { '?' };
                format!("{}{}{}", url, separator, updated_at.timestamp())
            }
            _ => url,
        }
    }

    /// Assign a new file. Nil clears the attachment; a non-assignment such
    /// as the empty string leaves everything untouched. On error nothing
    /// is queued and the previous state is kept.
    #[instrument(skip_all, fields(attachment = %self.definition.name, record = ?self.record.id))]
    pub async fn assign(&mut self, source: impl Into<AttachmentSource>) -> AttachmentResult<()> {
        let file = self.runtime.registry().resolve(source.into()).await?;
        if !file.is_assignment() {
            debug!("Not an assignment, attachment unchanged");
            return Ok(());
        }
        if file.is_nil() {
            return self.clear();
        }

        let metadata = AttachmentMetadata {
            file_name: Some(sanitize_filename(file.original_filename())),
            content_type: Some(file.content_type().to_string()),
            file_size: Some(file.size()),
            updated_at: Some(Utc::now()),
            fingerprint: Some(file.fingerprint()?.to_string()),
        };

        let previous = self.locators_for(&self.metadata)?;
        let current = self.locators_for(&metadata)?;

        let resolver = self.resolver();
        let styles = resolver.resolve(&metadata);
        let files = resolver
            .generate(file, &styles, self.definition.processor.as_ref())
            .await?;

        for locator in previous {
            if !current.contains(&locator) && !self.queued_for_delete.contains(&locator) {
                self.queued_for_delete.push(locator);
            }
        }
        self.queued_for_write = files;
        self.metadata = metadata;
        self.dirty = true;

        debug!(
            file_name = ?self.metadata.file_name,
            content_type = ?self.metadata.content_type,
            size = ?self.metadata.file_size,
            styles = self.queued_for_write.len(),
            "Attachment assigned"
        );
        Ok(())
    }

    /// Queue every stored style for delete and drop pending writes
    pub fn clear(&mut self) -> AttachmentResult<()> {
        let previous = self.locators_for(&self.metadata)?;
        for locator in previous {
            if !self.queued_for_delete.contains(&locator) {
                self.queued_for_delete.push(locator);
            }
        }
        self.queued_for_write.clear();
        self.metadata.clear();
        self.dirty = true;
        debug!(
            attachment = %self.definition.name,
            deletes = self.queued_for_delete.len(),
            "Attachment cleared"
        );
        Ok(())
    }

    /// Regenerate derived styles from the stored original and queue them
    #[instrument(skip_all, fields(attachment = %self.definition.name))]
    pub async fn reprocess(&mut self) -> AttachmentResult<()> {
        let original = self.to_readable(ORIGINAL).await?.ok_or_else(|| {
            StorageError::NotFound(format!("{} has no original to reprocess", self.definition.name))
        })?;

        let styles = self.styles();
        let files = self
            .resolver()
            .generate(original, &styles, self.definition.processor.as_ref())
            .await?;

        for (style, file) in files.into_iter().filter(|(style, _)| style != ORIGINAL) {
            self.queued_for_write.retain(|(queued, _)| queued != &style);
            self.queued_for_write.push((style, file));
        }
        self.dirty = true;
        Ok(())
    }

    /// A queued write, or committed bytes the backend reports as present
    pub async fn exists(&self, style: &str) -> AttachmentResult<bool> {
        if self.queued_for_write.iter().any(|(queued, _)| queued == style) {
            return Ok(true);
        }
        match self.locator(style)? {
            Some(locator) => Ok(self.backend.exists(&locator).await?),
            None => Ok(false),
        }
    }

    /// Readable copy of `style`: the queued file if any, else the committed one
    pub async fn to_readable(&self, style: &str) -> AttachmentResult<Option<ReadableFile>> {
        if let Some((_, file)) = self.queued_for_write.iter().find(|(queued, _)| queued == style) {
            return Ok(Some(file.duplicate()?));
        }
        let locator = match self.locator(style)? {
            Some(locator) => locator,
            None => return Ok(None),
        };
        let file = match self.backend.read(&locator).await? {
            Some(file) => file,
            None => return Ok(None),
        };

        let definition = self.style(style);
        let content_type = match (&definition.format, self.content_type()) {
            (Some(format), _) => content_type::from_extension(&format!("x.{}", format)),
            (None, Some(content_type)) => content_type.to_string(),
            (None, None) => file.content_type().to_string(),
        };
        let filename = self
            .original_filename()
            .map(String::from)
            .unwrap_or_else(|| file.original_filename().to_string());
        Ok(Some(
            file.with_original_filename(filename)
                .with_content_type(content_type),
        ))
    }

    /// Source for assigning `style` of this attachment to another one
    pub fn as_source(&self, style: &str) -> AttachmentResult<AttachmentSource> {
        if let Some((_, file)) = self.queued_for_write.iter().find(|(queued, _)| queued == style) {
            return Ok(AttachmentSource::Readable(file.duplicate()?));
        }
        let locator = match self.locator(style)? {
            Some(locator) => locator,
            None => return Ok(AttachmentSource::Nil),
        };
        Ok(AttachmentSource::Stored(StoredFile {
            backend: Arc::clone(&self.backend),
            locator,
            original_filename: self.original_filename().unwrap_or_default().to_string(),
            content_type: self.content_type().unwrap_or_default().to_string(),
        }))
    }

    /// Commit queued writes in order. A failed style stays queued together
    /// with everything after it; earlier styles remain committed.
    #[instrument(skip_all, fields(attachment = %self.definition.name, record = ?self.record.id))]
    pub async fn flush_writes(&mut self) -> AttachmentResult<()> {
        if self.queued_for_write.is_empty() {
            return Ok(());
        }

        let styles = self.styles();
        let mut pending = std::mem::take(&mut self.queued_for_write).into_iter();
        let mut written = 0usize;

        while let Some((style, file)) = pending.next() {
            let definition = styles
                .iter()
                .find(|s| s.name == style)
                .cloned()
                .unwrap_or_else(|| StyleDefinition::new(&style));

            match self.store_style(&definition, &file).await {
                Ok(locator) => {
                    debug!(style = %style, locator = %locator, "Style committed");
                    self.queued_for_delete.retain(|queued| queued != &locator);
                    written += 1;
                }
                Err(source) => {
                    error!(style = %style, error = %source, "Failed to store style");
                    self.queued_for_write.push((style.clone(), file));
                    self.queued_for_write.extend(pending);
                    self.refresh_dirty();
                    return Err(AttachmentError::StorageWrite { style, source });
                }
            }
        }

        self.refresh_dirty();
        info!(written, backend = self.backend.name(), "Flushed attachment writes");
        Ok(())
    }

    async fn store_style(
        &self,
        style: &StyleDefinition,
        file: &ReadableFile,
    ) -> Result<Locator, StorageError> {
        let locator = self.locate_with(style, &self.metadata)?;
        self.backend.store(&locator, file).await?;
        Ok(locator)
    }

    /// Remove queued locators. Missing files count as removed. Other
    /// failures are logged, or returned when the attachment is whiny; the
    /// failed locators then stay queued.
    #[instrument(skip_all, fields(attachment = %self.definition.name, record = ?self.record.id))]
    pub async fn flush_deletes(&mut self) -> AttachmentResult<()> {
        if self.queued_for_delete.is_empty() {
            return Ok(());
        }

        let queue = std::mem::take(&mut self.queued_for_delete);
        let root = self.runtime.interpolator().root();
        let mut failed = Vec::new();
        let mut first_error = None;
        let mut removed = 0usize;

        for locator in queue {
            match self.backend.remove_within(&locator, &root).await {
                Ok(outcome) => {
                    debug!(locator = %locator, ?outcome, "Style removed");
                    removed += 1;
                }
                Err(StorageError::NotFound(_)) => {
                    debug!(locator = %locator, "Style already gone");
                    removed += 1;
                }
                Err(source) if self.definition.whiny => {
                    error!(locator = %locator, error = %source, "Failed to delete style");
                    if first_error.is_none() {
                        first_error = Some(AttachmentError::StorageDelete {
                            locator: locator.to_string(),
                            source,
                        });
                    }
                    failed.push(locator);
                }
                Err(source) => {
                    warn!(locator = %locator, error = %source, "Ignoring failed delete");
                }
            }
        }

        self.queued_for_delete = failed;
        self.refresh_dirty();
        info!(removed, backend = self.backend.name(), "Flushed attachment deletes");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Writes, then deletes
    pub async fn save(&mut self) -> AttachmentResult<()> {
        self.flush_writes().await?;
        self.flush_deletes().await
    }

    /// Blob column values the owning record must persist (database backend)
    pub fn take_pending_columns(&self) -> Vec<(String, Option<Bytes>)> {
        self.backend.take_pending_columns()
    }

    fn refresh_dirty(&mut self) {
        self.dirty = !(self.queued_for_write.is_empty() && self.queued_for_delete.is_empty());
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.definition.name)
            .field("record", &self.record)
            .field("metadata", &self.metadata)
            .field("queued_for_write", &self.queued_styles())
            .field("queued_for_delete", &self.queued_for_delete)
            .field("dirty", &self.dirty)
            .finish()
    }
}
