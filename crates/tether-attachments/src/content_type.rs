//! Content Type Detection
//!
//! Combines extension lookup with magic-number sniffing through the `file`
//! command. Sniffing is an external process; when it fails the extension
//! guess (or `application/octet-stream`) is used.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::readable::OCTET_STREAM;

/// Content type reported for zero-length files
pub const EMPTY_TYPE: &str = "inode/x-empty";

/// Detects the content type of a file on disk
#[async_trait]
pub trait ContentTypeDetector: Send + Sync {
    /// `filename` is the user-facing name; `path` holds the bytes
    async fn detect(&self, path: &Path, filename: &str) -> String;
}

/// Extension-only detection
#[derive(Debug, Default, Clone)]
pub struct ExtensionDetector;

#[async_trait]
impl ContentTypeDetector for ExtensionDetector {
    async fn detect(&self, path: &Path, filename: &str) -> String {
        if is_empty_file(path).await {
            return EMPTY_TYPE.to_string();
        }
        candidates(filename)
            .into_iter()
            .next()
            .unwrap_or_else(|| OCTET_STREAM.to_string())
    }
}

/// Extension lookup cross-checked with `file -b --mime-type`
#[derive(Debug, Clone)]
pub struct FileCommandDetector {
    command: String,
}

impl Default for FileCommandDetector {
    fn default() -> Self {
        Self::new("file")
    }
}

impl FileCommandDetector {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn sniff(&self, path: &Path) -> Option<String> {
        let output = Command::new(&self.command)
            .arg("-b")
            .arg("--mime-type")
            .arg(path)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let sniffed = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if sniffed.contains('/') {
                    Some(sniffed)
                } else {
                    None
                }
            }
            Ok(output) => {
                warn!(
                    command = %self.command,
                    status = ?output.status.code(),
                    "Content type sniffing failed"
                );
                None
            }
            Err(e) => {
                warn!(command = %self.command, error = %e, "Content type sniffing unavailable");
                None
            }
        }
    }
}

#[async_trait]
impl ContentTypeDetector for FileCommandDetector {
    async fn detect(&self, path: &Path, filename: &str) -> String {
        if is_empty_file(path).await {
            return EMPTY_TYPE.to_string();
        }

        let candidates = candidates(filename);
        if candidates.len() == 1 {
            return candidates[0].clone();
        }

        let sniffed = self.sniff(path).await;
        debug!(filename, ?sniffed, ?candidates, "Content type detection");
        choose(candidates, sniffed)
    }
}

/// Content types registered for the extension of `filename`
pub fn candidates(filename: &str) -> Vec<String> {
    if filename.is_empty() {
        return Vec::new();
    }
    mime_guess::from_path(filename)
        .iter()
        .map(|m| m.essence_str().to_string())
        .collect()
}

/// Content type for `filename` by extension, defaulting to octet-stream
pub fn from_extension(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// Drop parameters (`text/html; charset=utf-8` -> `text/html`)
pub fn essence(content_type: &str) -> Option<String> {
    content_type
        .parse::<mime::Mime>()
        .ok()
        .map(|m| m.essence_str().to_string())
}

fn choose(candidates: Vec<String>, sniffed: Option<String>) -> String {
    match sniffed {
        Some(sniffed) if candidates.is_empty() || candidates.contains(&sniffed) => sniffed,
        sniffed => candidates
            .into_iter()
            .next()
            .or(sniffed)
            .unwrap_or_else(|| OCTET_STREAM.to_string()),
    }
}

async fn is_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len() == 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates() {
        assert_eq!(candidates("photo.png"), vec!["image/png".to_string()]);
        assert!(candidates("").is_empty());
        assert!(candidates("README").is_empty());
    }

    #[test]
    fn test_choose() {
        let both = vec!["audio/mpeg".to_string(), "video/mpeg".to_string()];
        assert_eq!(
            choose(both.clone(), Some("video/mpeg".to_string())),
            "video/mpeg"
        );
        assert_eq!(
            choose(both, Some("text/plain".to_string())),
            "audio/mpeg"
        );
        assert_eq!(choose(Vec::new(), Some("image/gif".to_string())), "image/gif");
        assert_eq!(choose(Vec::new(), None), OCTET_STREAM);
    }

    #[test]
    fn test_essence() {
        assert_eq!(
            essence("text/html; charset=utf-8"),
            Some("text/html".to_string())
        );
        assert_eq!(essence("not a mime"), None);
    }

    #[tokio::test]
    async fn test_extension_detector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let detector = ExtensionDetector;
        assert_eq!(detector.detect(&path, "report.pdf").await, "application/pdf");
        assert_eq!(detector.detect(&path, "report").await, OCTET_STREAM);

        std::fs::write(&path, b"").unwrap();
        assert_eq!(detector.detect(&path, "report.pdf").await, EMPTY_TYPE);
    }

    #[tokio::test]
    async fn test_missing_file_command_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob");
        std::fs::write(&path, b"\x00\x01\x02").unwrap();

        let detector = FileCommandDetector::new("definitely-not-a-real-command");
        assert_eq!(detector.detect(&path, "blob").await, OCTET_STREAM);
    }
}
