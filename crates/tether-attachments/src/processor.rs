//! Processing capability
//!
//! Pixel work (resizing, cropping, format conversion) happens outside this
//! crate. The engine only hands a processor the original file and a style.

use async_trait::async_trait;

use crate::error::ProcessingError;
use crate::readable::ReadableFile;
use crate::style::StyleDefinition;

/// Produces one derived file per style
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(
        &self,
        source: &ReadableFile,
        style: &StyleDefinition,
    ) -> Result<ReadableFile, ProcessingError>;
}

/// Copies the source unchanged
#[derive(Debug, Default, Clone)]
pub struct Passthrough;

#[async_trait]
impl Processor for Passthrough {
    async fn process(
        &self,
        source: &ReadableFile,
        style: &StyleDefinition,
    ) -> Result<ReadableFile, ProcessingError> {
        source
            .duplicate()
            .map_err(|e| ProcessingError::new(&style.name, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_copies() {
        let source = ReadableFile::from_bytes(b"pixels", "a.png", "image/png").unwrap();
        let style = StyleDefinition::new("thumb").with_geometry("8x8");

        let copy = Passthrough.process(&source, &style).await.unwrap();
        assert_ne!(copy.path(), source.path());
        assert_eq!(copy.fingerprint().unwrap(), source.fingerprint().unwrap());
        assert_eq!(copy.content_type(), "image/png");
    }
}
