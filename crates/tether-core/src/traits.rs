//! Record identity traits
//!
//! Attachments never own their record; they only need to know which class
//! and primary key they belong to in order to render paths.

use serde::{Deserialize, Serialize};

/// Primary key type
pub type Id = i64;

/// Trait for records that have a primary key
pub trait Identifiable {
    fn id(&self) -> Option<Id>;

    fn is_persisted(&self) -> bool {
        self.id().is_some()
    }

    fn is_new_record(&self) -> bool {
        !self.is_persisted()
    }
}

/// Trait for records that can carry attachments
pub trait Attachable: Identifiable {
    /// Class name as it appears in storage paths (e.g. "User")
    fn class_name(&self) -> &str;

    /// Identity snapshot used by the attachment engine
    fn record_key(&self) -> RecordKey {
        RecordKey {
            class_name: self.class_name().to_string(),
            id: self.id(),
        }
    }
}

/// Owning record identity as seen by an attachment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub class_name: String,
    pub id: Option<Id>,
}

impl RecordKey {
    pub fn new(class_name: impl Into<String>, id: Option<Id>) -> Self {
        Self {
            class_name: class_name.into(),
            id,
        }
    }

    /// Unsaved record of the given class
    pub fn unsaved(class_name: impl Into<String>) -> Self {
        Self::new(class_name, None)
    }

    /// Pluralised, underscored class name ("BlogPost" -> "blog_posts")
    pub fn table_name(&self) -> String {
        let mut underscored = String::with_capacity(self.class_name.len() + 4);
        for (i, ch) in self.class_name.chars().enumerate() {
            if ch == ':' {
                if !underscored.ends_with('/') {
                    underscored.push('/');
                }
                continue;
            }
            if ch.is_uppercase() {
                if i > 0 && !underscored.ends_with('/') {
                    underscored.push('_');
                }
                underscored.extend(ch.to_lowercase());
            } else {
                underscored.push(ch);
            }
        }
        pluralize(&underscored)
    }
}

impl Identifiable for RecordKey {
    fn id(&self) -> Option<Id> {
        self.id
    }
}

/// Naive English plural ("category" -> "categories")
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s') || word.ends_with('x') || word.ends_with("ch") || word.ends_with("sh") {
        format!("{}es", word)
    } else if let Some(stem) = word.strip_suffix('y') {
        match stem.chars().last() {
            Some(c) if !"aeiou".contains(c) => format!("{}ies", stem),
            _ => format!("{}s", word),
        }
    } else {
        format!("{}s", word)
    }
}
