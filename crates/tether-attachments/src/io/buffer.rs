//! In-memory buffers

use async_trait::async_trait;

use super::{AdapterContext, AttachmentSource, Buffer, IoAdapter};
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::ReadableFile;

/// Filename used when a buffer carries none
pub const DEFAULT_FILENAME: &str = "data";

/// Spool `buffer` into a temp file. The given content type is trusted;
/// otherwise the detector decides.
pub(crate) async fn adapt_buffer(
    buffer: Buffer,
    ctx: &AdapterContext,
) -> AttachmentResult<ReadableFile> {
    let filename = buffer
        .filename
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
        .to_string();

    let file = ReadableFile::from_bytes(&buffer.data, filename.clone(), "")?;
    let content_type = match buffer.content_type {
        Some(content_type) if !content_type.trim().is_empty() => content_type.trim().to_string(),
        _ => match file.path() {
            Some(path) => ctx.detector.detect(path, &filename).await,
            None => crate::readable::OCTET_STREAM.to_string(),
        },
    };
    Ok(file.with_content_type(content_type))
}

pub struct BufferAdapter;

#[async_trait]
impl IoAdapter for BufferAdapter {
    fn name(&self) -> &'static str {
        "buffer"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        matches!(source, AttachmentSource::Buffer(_))
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        match source {
            AttachmentSource::Buffer(buffer) => adapt_buffer(buffer, ctx).await,
            other => Err(AttachmentError::NoHandler(other.describe())),
        }
    }
}
