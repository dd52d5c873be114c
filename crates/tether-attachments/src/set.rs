//! Per-record attachment registry
//!
//! A record owns one [`AttachmentSet`] holding its attachments by name and
//! drives them from its save/destroy lifecycle.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tether_core::{Attachable, Id, RecordKey};
use tracing::{debug, instrument};

use crate::attachment::Attachment;
use crate::definition::AttachmentDefinition;
use crate::error::AttachmentResult;
use crate::model::AttachmentMetadata;
use crate::runtime::AttachmentRuntime;

#[derive(Debug)]
pub struct AttachmentSet {
    record: RecordKey,
    attachments: BTreeMap<String, Attachment>,
}

impl AttachmentSet {
    pub fn new(record: RecordKey) -> Self {
        Self {
            record,
            attachments: BTreeMap::new(),
        }
    }

    /// Set up every definition for this record, with empty metadata
    pub fn with_definitions(
        record: RecordKey,
        runtime: &Arc<AttachmentRuntime>,
        definitions: &[Arc<AttachmentDefinition>],
    ) -> Self {
        let mut set = Self::new(record);
        for definition in definitions {
            set.define(Arc::clone(definition), Arc::clone(runtime));
        }
        set
    }

    /// Attachment set for a model implementing [`Attachable`]
    pub fn for_record(
        record: &impl Attachable,
        runtime: &Arc<AttachmentRuntime>,
        definitions: &[Arc<AttachmentDefinition>],
    ) -> Self {
        Self::with_definitions(record.record_key(), runtime, definitions)
    }

    /// Add (or replace) the attachment for `definition`
    pub fn define(
        &mut self,
        definition: Arc<AttachmentDefinition>,
        runtime: Arc<AttachmentRuntime>,
    ) -> &mut Attachment {
        let attachment = Attachment::new(Arc::clone(&definition), runtime, self.record.clone());
        match self.attachments.entry(definition.name.clone()) {
            Entry::Occupied(mut entry) => {
                entry.insert(attachment);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(attachment),
        }
    }

    /// Restore persisted metadata for `name`
    pub fn load(&mut self, name: &str, metadata: AttachmentMetadata) -> bool {
        match self.attachments.remove(name) {
            Some(attachment) => {
                self.attachments
                    .insert(name.to_string(), attachment.with_metadata(metadata));
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Attachment> {
        self.attachments.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Attachment> {
        self.attachments.get_mut(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attachments.keys().map(String::as_str)
    }

    pub fn is_dirty(&self) -> bool {
        self.attachments.values().any(Attachment::is_dirty)
    }

    /// Denormalized columns of every attachment
    pub fn metadata_columns(&self) -> Vec<(String, serde_json::Value)> {
        self.attachments
            .values()
            .flat_map(|a| a.metadata().columns(a.name()))
            .collect()
    }

    /// Blob column values written by database-backed attachments
    pub fn take_pending_columns(&self) -> Vec<(String, Option<Bytes>)> {
        self.attachments
            .values()
            .flat_map(Attachment::take_pending_columns)
            .collect()
    }

    /// Run once the record is persisted: bind its id, then flush writes and
    /// deletes of every attachment. Stops at the first error.
    #[instrument(skip(self), fields(class = %self.record.class_name))]
    pub async fn after_save(&mut self, id: Id) -> AttachmentResult<()> {
        self.record.id = Some(id);
        for attachment in self.attachments.values_mut() {
            attachment.set_record_id(id);
            attachment.flush_writes().await?;
            attachment.flush_deletes().await?;
        }
        debug!(attachments = self.attachments.len(), "Attachments saved");
        Ok(())
    }

    /// Run before the record is destroyed: remove every stored style
    #[instrument(skip(self), fields(class = %self.record.class_name, id = ?self.record.id))]
    pub async fn before_destroy(&mut self) -> AttachmentResult<()> {
        for attachment in self.attachments.values_mut() {
            attachment.clear()?;
            attachment.flush_deletes().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Buffer;
    use crate::storage::{BackendSpec, FilesystemBackend};

    fn definitions(root: &std::path::Path) -> Vec<Arc<AttachmentDefinition>> {
        let backend = BackendSpec::Filesystem(Arc::new(FilesystemBackend::new(root)));
        vec![
            Arc::new(
                AttachmentDefinition::new("avatar", backend.clone())
                    .with_path(":root/:class/:id/:attachment/:style/:filename"),
            ),
            Arc::new(
                AttachmentDefinition::new("resume", backend)
                    .with_path(":root/:class/:id/:attachment/:style/:filename"),
            ),
        ]
    }

    fn runtime(root: &std::path::Path) -> Arc<AttachmentRuntime> {
        let runtime = AttachmentRuntime::default();
        runtime.interpolator().set_root(root);
        Arc::new(runtime)
    }

    #[tokio::test]
    async fn test_after_save_binds_id_and_flushes() {
        let root = tempfile::tempdir().unwrap();
        let mut set = AttachmentSet::with_definitions(
            RecordKey::unsaved("User"),
            &runtime(root.path()),
            &definitions(root.path()),
        );
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["avatar", "resume"]);

        let avatar = set.get_mut("avatar").unwrap();
        avatar
            .assign(Buffer::new(b"pixels".to_vec()).filename("me.png"))
            .await
            .unwrap();
        assert!(set.is_dirty());

        set.after_save(9).await.unwrap();
        assert!(!set.is_dirty());
        assert!(root.path().join("users/9/avatars/original/me.png").exists());

        let columns = set.metadata_columns();
        assert_eq!(columns.len(), 10);
        assert!(columns
            .iter()
            .any(|(name, value)| name == "avatar_file_name" && value == "me.png"));
        assert!(columns
            .iter()
            .any(|(name, value)| name == "resume_file_name" && value.is_null()));
    }

    #[tokio::test]
    async fn test_before_destroy_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        let mut set = AttachmentSet::with_definitions(
            RecordKey::new("User", Some(3)),
            &runtime(root.path()),
            &definitions(root.path()),
        );
        for name in ["avatar", "resume"] {
            set.get_mut(name)
                .unwrap()
                .assign(Buffer::new(b"bytes".to_vec()).filename("f.txt"))
                .await
                .unwrap();
        }
        set.after_save(3).await.unwrap();
        assert!(root.path().join("users/3/resumes/original/f.txt").exists());

        set.before_destroy().await.unwrap();
        assert!(!root.path().join("users").exists());
        assert!(root.path().exists());
        assert!(!set.get("avatar").unwrap().is_present());
    }

    struct Profile {
        id: Option<Id>,
    }

    impl tether_core::Identifiable for Profile {
        fn id(&self) -> Option<Id> {
            self.id
        }
    }

    impl Attachable for Profile {
        fn class_name(&self) -> &str {
            "UserProfile"
        }
    }

    #[tokio::test]
    async fn test_load_restores_metadata() {
        let root = tempfile::tempdir().unwrap();
        let mut set = AttachmentSet::for_record(
            &Profile { id: Some(3) },
            &runtime(root.path()),
            &definitions(root.path()),
        );
        let metadata = AttachmentMetadata {
            file_name: Some("me.png".to_string()),
            ..Default::default()
        };
        assert!(set.load("avatar", metadata));
        assert!(!set.load("missing", AttachmentMetadata::default()));
        let avatar = set.get("avatar").unwrap();
        assert!(avatar.is_present());
        assert!(!avatar.exists("original").await.unwrap());
        assert!(avatar
            .path("original")
            .unwrap()
            .unwrap()
            .ends_with("user_profiles/3/avatars/original/me.png"));
    }
}
