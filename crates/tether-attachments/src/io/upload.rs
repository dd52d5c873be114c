//! Framework upload wrappers

use std::fs::File;

use async_trait::async_trait;

use super::{AdapterContext, AttachmentSource, IoAdapter, UploadedFile};
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::ReadableFile;

async fn adapt_upload(
    upload: UploadedFile,
    trust_content_type: bool,
    ctx: &AdapterContext,
) -> AttachmentResult<ReadableFile> {
    let filename = upload.original_filename.trim().to_string();
    let copy = ReadableFile::from_reader(File::open(&upload.tempfile)?, filename.clone(), "")?;

    let declared = upload
        .content_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let content_type = match (declared, copy.path()) {
        (Some(declared), _) if trust_content_type => declared,
        (_, Some(path)) => ctx.detector.detect(path, &filename).await,
        (declared, None) => declared.unwrap_or_else(|| crate::readable::OCTET_STREAM.to_string()),
    };
    Ok(copy.with_content_type(content_type))
}

/// Typed upload wrappers. The resident temp file is copied; the declared
/// content type is trusted unless `trust_content_type` is off.
pub struct UploadedFileAdapter {
    pub trust_content_type: bool,
}

impl Default for UploadedFileAdapter {
    fn default() -> Self {
        Self {
            trust_content_type: true,
        }
    }
}

#[async_trait]
impl IoAdapter for UploadedFileAdapter {
    fn name(&self) -> &'static str {
        "uploaded_file"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        matches!(source, AttachmentSource::Upload(_))
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        match source {
            AttachmentSource::Upload(upload) => {
                adapt_upload(upload, self.trust_content_type, ctx).await
            }
            other => Err(AttachmentError::NoHandler(other.describe())),
        }
    }
}

/// Untyped form fields carrying `tempfile`, plus optional `filename` and
/// `content_type` entries
pub struct FormFieldsAdapter {
    pub trust_content_type: bool,
}

impl Default for FormFieldsAdapter {
    fn default() -> Self {
        Self {
            trust_content_type: true,
        }
    }
}

#[async_trait]
impl IoAdapter for FormFieldsAdapter {
    fn name(&self) -> &'static str {
        "form_fields"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        match source {
            AttachmentSource::Fields(fields) => fields
                .get("tempfile")
                .map_or(false, |path| std::path::Path::new(path).is_file()),
            _ => false,
        }
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        let mut fields = match source {
            AttachmentSource::Fields(fields) => fields,
            other => return Err(AttachmentError::NoHandler(other.describe())),
        };
        let tempfile = fields
            .remove("tempfile")
            .ok_or_else(|| AttachmentError::NoHandler("fields without tempfile".to_string()))?;
        let filename = fields
            .remove("filename")
            .or_else(|| fields.remove("original_filename"))
            .unwrap_or_else(|| super::basename_or(std::path::Path::new(&tempfile), "data"));
        let upload = UploadedFile {
            tempfile: tempfile.into(),
            original_filename: filename,
            content_type: fields.remove("content_type"),
        };
        adapt_upload(upload, self.trust_content_type, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::super::IoRegistry;
    use super::*;

    #[tokio::test]
    async fn test_uploaded_file() {
        let dir = tempfile::tempdir().unwrap();
        let resident = dir.path().join("RackMultipart-1234");
        std::fs::write(&resident, b"GIF89a....").unwrap();

        let upload = UploadedFile::new(&resident, " spinner.gif ").content_type("image/gif");
        let file = IoRegistry::default().resolve(upload.into()).await.unwrap();
        assert_eq!(file.original_filename(), "spinner.gif");
        assert_eq!(file.content_type(), "image/gif");
        assert_eq!(file.size(), 10);
        assert!(resident.exists());
    }

    #[tokio::test]
    async fn test_untrusted_content_type_is_redetected() {
        let dir = tempfile::tempdir().unwrap();
        let resident = dir.path().join("upload");
        std::fs::write(&resident, b"a,b,c").unwrap();

        let mut registry = IoRegistry::empty(AdapterContext::default());
        registry.register(UploadedFileAdapter {
            trust_content_type: false,
        });
        let upload = UploadedFile::new(&resident, "table.csv").content_type("image/png");
        let file = registry.resolve(upload.into()).await.unwrap();
        assert_eq!(file.content_type(), "text/csv");
    }

    #[tokio::test]
    async fn test_form_fields() {
        let dir = tempfile::tempdir().unwrap();
        let resident = dir.path().join("upload");
        std::fs::write(&resident, b"hello").unwrap();

        let mut fields = HashMap::new();
        fields.insert("tempfile".to_string(), resident.to_string_lossy().to_string());
        fields.insert("filename".to_string(), "hello.txt".to_string());

        let file = IoRegistry::default().resolve(fields.into()).await.unwrap();
        assert_eq!(file.original_filename(), "hello.txt");
        assert_eq!(file.content_type(), "text/plain");
        assert_eq!(file.size(), 5);
    }

    #[tokio::test]
    async fn test_fields_without_tempfile_are_unhandled() {
        let mut fields = HashMap::new();
        fields.insert("filename".to_string(), "x.txt".to_string());
        let result = IoRegistry::default().resolve(fields.into()).await;
        assert!(matches!(result, Err(AttachmentError::NoHandler(_))));
    }
}
