//! Nil and empty-string inputs

use async_trait::async_trait;

use super::{AdapterContext, AttachmentSource, IoAdapter};
use crate::error::AttachmentResult;
use crate::readable::ReadableFile;

/// Explicit nil: a real assignment that clears the attachment
pub struct NilAdapter;

#[async_trait]
impl IoAdapter for NilAdapter {
    fn name(&self) -> &'static str {
        "nil"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        matches!(source, AttachmentSource::Nil)
    }

    async fn adapt(
        &self,
        _source: AttachmentSource,
        _ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        Ok(ReadableFile::nil(true))
    }
}

/// Empty string, as sent by a blank form field: not an assignment at all
pub struct EmptyStringAdapter;

#[async_trait]
impl IoAdapter for EmptyStringAdapter {
    fn name(&self) -> &'static str {
        "empty_string"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        source.as_text().map_or(false, str::is_empty)
    }

    async fn adapt(
        &self,
        _source: AttachmentSource,
        _ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        Ok(ReadableFile::nil(false))
    }
}

#[cfg(test)]
mod tests {
    use super::super::IoRegistry;
    use super::*;

    #[tokio::test]
    async fn test_nil_is_a_clearing_assignment() {
        let file = IoRegistry::default()
            .resolve(AttachmentSource::Nil)
            .await
            .unwrap();
        assert!(file.is_nil());
        assert!(file.is_assignment());
        assert_eq!(file.size(), 0);
    }

    #[tokio::test]
    async fn test_empty_string_is_not_an_assignment() {
        let file = IoRegistry::default().resolve("".into()).await.unwrap();
        assert!(file.is_nil());
        assert!(!file.is_assignment());
    }
}
