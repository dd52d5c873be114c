//! Readable File
//!
//! The uniform handle every input adapter produces and every backend
//! consumes. A handle either owns a temp file (removed when the handle is
//! dropped) or points at a committed file it must never delete.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Chunk size used when streaming into temp files
pub const CHUNK_SIZE: usize = 16 * 1024;

/// Content type used when nothing better is known
pub const OCTET_STREAM: &str = "application/octet-stream";

enum Backing {
    Empty,
    Temp(NamedTempFile),
    Committed(PathBuf),
}

/// Uniform readable view of an attachment input or stored style
pub struct ReadableFile {
    original_filename: String,
    content_type: String,
    size: u64,
    fingerprint: OnceCell<String>,
    backing: Backing,
    reader: Option<File>,
    nil: bool,
    assignment: bool,
}

impl ReadableFile {
    /// Marker for "no file". `assignment` distinguishes an explicit clear
    /// (true) from a no-op such as an empty form field (false).
    pub fn nil(assignment: bool) -> Self {
        Self {
            original_filename: String::new(),
            content_type: String::new(),
            size: 0,
            fingerprint: OnceCell::new(),
            backing: Backing::Empty,
            reader: None,
            nil: true,
            assignment,
        }
    }

    /// Take ownership of a temp file
    pub fn from_temp(
        temp: NamedTempFile,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> io::Result<Self> {
        let size = temp.as_file().metadata()?.len();
        Ok(Self {
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            size,
            fingerprint: OnceCell::new(),
            backing: Backing::Temp(temp),
            reader: None,
            nil: false,
            assignment: true,
        })
    }

    /// Wrap a committed file without taking ownership of it
    pub fn from_committed(
        path: impl Into<PathBuf>,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> io::Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self {
            original_filename: original_filename.into(),
            content_type: content_type.into(),
            size,
            fingerprint: OnceCell::new(),
            backing: Backing::Committed(path),
            reader: None,
            nil: false,
            assignment: true,
        })
    }

    /// Copy a reader into a fresh temp file, `CHUNK_SIZE` bytes at a time
    pub fn from_reader(
        mut source: impl Read,
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> io::Result<Self> {
        let original_filename = original_filename.into();
        let mut temp = temp_file_for(&original_filename)?;
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let read = source.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            temp.write_all(&chunk[..read])?;
        }
        temp.flush()?;
        Self::from_temp(temp, original_filename, content_type)
    }

    /// Spool in-memory bytes into a temp file
    pub fn from_bytes(
        data: &[u8],
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> io::Result<Self> {
        Self::from_reader(data, original_filename, content_type)
    }

    pub fn with_original_filename(mut self, filename: impl Into<String>) -> Self {
        self.original_filename = filename.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_nil(&self) -> bool {
        self.nil
    }

    /// Whether assigning this handle should change the attachment at all
    pub fn is_assignment(&self) -> bool {
        self.assignment
    }

    /// Whether dropping this handle reclaims its backing file
    pub fn is_temporary(&self) -> bool {
        matches!(self.backing, Backing::Temp(_))
    }

    /// Backing storage location, if any
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Empty => None,
            Backing::Temp(temp) => Some(temp.path()),
            Backing::Committed(path) => Some(path),
        }
    }

    /// SHA-256 of the content, computed on first access
    pub fn fingerprint(&self) -> io::Result<&str> {
        self.fingerprint
            .get_or_try_init(|| {
                let mut hasher = Sha256::new();
                if let Some(path) = self.path() {
                    let mut file = File::open(path)?;
                    io::copy(&mut file, &mut hasher)?;
                }
                Ok(hex::encode(hasher.finalize()))
            })
            .map(String::as_str)
    }

    /// Rewind the sequential reader to the start of the content
    pub fn rewind(&mut self) -> io::Result<()> {
        if let Some(reader) = self.reader.as_mut() {
            reader.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }

    /// Whether the sequential reader has consumed all content
    pub fn is_eof(&mut self) -> io::Result<bool> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader.stream_position()? >= self.size),
            None => Ok(self.size == 0),
        }
    }

    /// Whole content, read without disturbing the sequential reader
    pub async fn bytes(&self) -> io::Result<Bytes> {
        match self.path() {
            Some(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            None => Ok(Bytes::new()),
        }
    }

    /// Independent temp copy with the same name and content type
    pub fn duplicate(&self) -> io::Result<Self> {
        let copy = match self.path() {
            Some(path) => Self::from_reader(
                File::open(path)?,
                self.original_filename.clone(),
                self.content_type.clone(),
            )?,
            None => Self::nil(self.assignment),
        };
        if let Some(fingerprint) = self.fingerprint.get() {
            let _ = copy.fingerprint.set(fingerprint.clone());
        }
        Ok(copy)
    }

    /// Move the content to `dest`. Temp files are renamed into place (falling
    /// back to a copy across devices); committed files are copied.
    pub async fn move_to(&self, dest: &Path) -> io::Result<()> {
        match &self.backing {
            Backing::Empty => tokio::fs::File::create(dest).await.map(|_| ()),
            Backing::Temp(temp) => match tokio::fs::rename(temp.path(), dest).await {
                Ok(()) => Ok(()),
                Err(_) => tokio::fs::copy(temp.path(), dest).await.map(|_| ()),
            },
            Backing::Committed(path) => tokio::fs::copy(path, dest).await.map(|_| ()),
        }
    }
}

impl Read for ReadableFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.reader.is_none() {
            match self.path() {
                Some(path) => self.reader = Some(File::open(path)?),
                None => return Ok(0),
            }
        }
        match self.reader.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }
}

impl fmt::Debug for ReadableFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadableFile")
            .field("original_filename", &self.original_filename)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .field("path", &self.path())
            .field("nil", &self.nil)
            .field("assignment", &self.assignment)
            .finish()
    }
}

/// Temp file that keeps the extension of `filename`, so sniffers see it
pub(crate) fn temp_file_for(filename: &str) -> io::Result<NamedTempFile> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    tempfile::Builder::new()
        .prefix("tether")
        .suffix(&extension)
        .tempfile()
}
