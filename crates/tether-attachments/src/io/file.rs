//! Local files: open handles, temp files and path strings

use std::fs::File;
use std::path::Path;

use async_trait::async_trait;

use super::{basename_or, AdapterContext, AttachmentSource, IoAdapter};
use crate::error::AttachmentResult;
use crate::readable::ReadableFile;

/// Copy `file` into a temp file owned by the handle and sniff its type
pub(crate) async fn adapt_local(
    file: File,
    path: &Path,
    ctx: &AdapterContext,
) -> AttachmentResult<ReadableFile> {
    let filename = basename_or(path, "data");
    let copy = ReadableFile::from_reader(file, filename.clone(), "")?;
    let content_type = match copy.path() {
        Some(temp) => ctx.detector.detect(temp, &filename).await,
        None => crate::readable::OCTET_STREAM.to_string(),
    };
    Ok(copy.with_content_type(content_type))
}

/// Already-open files and temp files
pub struct FileAdapter;

#[async_trait]
impl IoAdapter for FileAdapter {
    fn name(&self) -> &'static str {
        "file"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        matches!(source, AttachmentSource::File(_) | AttachmentSource::Temp(_))
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        match source {
            AttachmentSource::File(open) => adapt_local(open.file, &open.path, ctx).await,
            AttachmentSource::Temp(temp) => {
                let file = temp.reopen()?;
                adapt_local(file, temp.path(), ctx).await
            }
            other => Err(crate::error::AttachmentError::NoHandler(other.describe())),
        }
    }
}

/// Strings naming an existing file on disk
pub struct PathAdapter;

#[async_trait]
impl IoAdapter for PathAdapter {
    fn name(&self) -> &'static str {
        "path"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        source.as_text().map_or(false, |s| Path::new(s).is_file())
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        let path = match source {
            AttachmentSource::Text(path) => path,
            other => return Err(crate::error::AttachmentError::NoHandler(other.describe())),
        };
        let file = File::open(&path)?;
        adapt_local(file, Path::new(&path), ctx).await
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::super::{IoRegistry, OpenFile};
    use super::*;

    fn fixture(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), "notes.txt", b"some notes");

        let source = OpenFile::open(&path).unwrap();
        let file = IoRegistry::default().resolve(source.into()).await.unwrap();
        assert_eq!(file.original_filename(), "notes.txt");
        assert_eq!(file.content_type(), "text/plain");
        assert_eq!(file.size(), 10);
        assert!(file.is_temporary());
        assert_ne!(file.path().unwrap(), path.as_path());
    }

    #[tokio::test]
    async fn test_path_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(dir.path(), "photo.png", &[0x89, b'P', b'N', b'G']);

        let file = IoRegistry::default()
            .resolve(path.to_string_lossy().to_string().into())
            .await
            .unwrap();
        assert_eq!(file.original_filename(), "photo.png");
        assert_eq!(file.content_type(), "image/png");
        assert_eq!(file.size(), 4);
        // The source stays where it was
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_temp_file() {
        let mut temp = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        temp.write_all(br#"{"a":1}"#).unwrap();

        let file = IoRegistry::default().resolve(temp.into()).await.unwrap();
        assert!(file.original_filename().ends_with(".json"));
        assert_eq!(file.content_type(), "application/json");
        assert_eq!(file.size(), 7);
    }
}
