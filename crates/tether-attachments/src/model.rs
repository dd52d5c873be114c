//! Attachment Model
//!
//! Denormalized attachment columns kept on the owning record.

use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Characters replaced in assigned filenames
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[&$+,/:;=?@<>\[\]{}|\\^~%# ]").unwrap());

/// Column suffixes, in the order they are rendered
const COLUMNS: [&str; 5] = [
    "file_name",
    "content_type",
    "file_size",
    "updated_at",
    "fingerprint",
];

/// Attachment metadata persisted in `{name}_*` columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub file_size: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fingerprint: Option<String>,
}

impl AttachmentMetadata {
    /// Whether a file is assigned
    pub fn is_present(&self) -> bool {
        self.file_name.is_some()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Name without its last extension
    pub fn basename(&self) -> &str {
        match self.file_name.as_deref() {
            Some(name) => match name.rfind('.') {
                Some(dot) if dot > 0 => &name[..dot],
                _ => name,
            },
            None => "",
        }
    }

    /// Last extension without the dot
    pub fn extension(&self) -> &str {
        match self.file_name.as_deref() {
            Some(name) => match name.rfind('.') {
                Some(dot) if dot > 0 => &name[dot + 1..],
                _ => "",
            },
            None => "",
        }
    }

    /// Column name/value pairs for the owning record
    pub fn columns(&self, name: &str) -> Vec<(String, Value)> {
        let values = [
            self.file_name.clone().map(Value::from),
            self.content_type.clone().map(Value::from),
            self.file_size.map(Value::from),
            self.updated_at.map(|t| Value::from(t.timestamp())),
            self.fingerprint.clone().map(Value::from),
        ];
        COLUMNS
            .iter()
            .zip(values)
            .map(|(column, value)| (format!("{}_{}", name, column), value.unwrap_or(Value::Null)))
            .collect()
    }

    /// Rebuild metadata from a row; missing or mistyped columns read as unset
    pub fn from_columns(name: &str, row: &Map<String, Value>) -> Self {
        let get = |column: &str| row.get(&format!("{}_{}", name, column));
        Self {
            file_name: get("file_name").and_then(Value::as_str).map(String::from),
            content_type: get("content_type").and_then(Value::as_str).map(String::from),
            file_size: get("file_size").and_then(Value::as_u64),
            updated_at: get("updated_at")
                .and_then(Value::as_i64)
                .and_then(|t| Utc.timestamp_opt(t, 0).single()),
            fingerprint: get("fingerprint").and_then(Value::as_str).map(String::from),
        }
    }
}

/// Replace characters that are unsafe in paths and URLs with `_`
pub fn sanitize_filename(filename: &str) -> String {
    UNSAFE_FILENAME_CHARS
        .replace_all(filename.trim(), "_")
        .into_owned()
}
