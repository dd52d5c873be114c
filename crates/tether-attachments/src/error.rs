//! Attachment Errors
//!
//! Input resolution and processing failures are fatal to an assignment.
//! Write failures are reported per style. Delete failures are logged unless
//! the attachment is configured as whiny.

use thiserror::Error;

use crate::storage::StorageError;

/// Style generation failure reported by a [`Processor`](crate::processor::Processor)
#[derive(Debug, Error)]
#[error("Processing style '{style}' failed: {message}")]
pub struct ProcessingError {
    pub style: String,
    pub message: String,
}

impl ProcessingError {
    pub fn new(style: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            message: message.into(),
        }
    }
}

/// Attachment engine errors
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("No handler found for {0}")]
    NoHandler(String),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    #[error("Failed to store style '{style}': {source}")]
    StorageWrite {
        style: String,
        #[source]
        source: StorageError,
    },
    #[error("Failed to delete {locator}: {source}")]
    StorageDelete {
        locator: String,
        #[source]
        source: StorageError,
    },
    #[error("Invalid storage credentials: {0}")]
    CredentialsConfig(String),
    #[error("Invalid attachment configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

impl AttachmentError {
    /// Whether the error was raised while resolving or processing input,
    /// i.e. before anything was queued.
    pub fn is_assignment_error(&self) -> bool {
        matches!(
            self,
            Self::NoHandler(_) | Self::Processing(_) | Self::Fetch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AttachmentError::NoHandler("Text(\"nope\")".to_string());
        assert_eq!(err.to_string(), "No handler found for Text(\"nope\")");

        let err: AttachmentError = ProcessingError::new("thumb", "bad geometry").into();
        assert_eq!(
            err.to_string(),
            "Processing style 'thumb' failed: bad geometry"
        );
        assert!(err.is_assignment_error());

        let err = AttachmentError::StorageWrite {
            style: "original".to_string(),
            source: StorageError::BackendError("bucket gone".to_string()),
        };
        assert!(err.to_string().contains("'original'"));
        assert!(!err.is_assignment_error());
    }
}
