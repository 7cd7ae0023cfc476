use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{ItemOutcome, ObjectOperation};
use crate::storage::Storage;
use crate::types::error::RetryTarget;
use crate::types::{EntryKind, ObjectEntry};

/// Deletes objects and aborts multipart uploads, depending on the kind of
/// each listed entry.
pub struct RemoveOperation {
    storage: Storage,
}

impl RemoveOperation {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ObjectOperation for RemoveOperation {
    fn name(&self) -> &'static str {
        "rm"
    }

    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget {
        RetryTarget::object(self.storage.bucket(), &entry.key)
    }

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome> {
        match (entry.kind, entry.upload_id.as_deref()) {
            (EntryKind::Upload, Some(upload_id)) => {
                self.storage
                    .abort_multipart_upload(&entry.key, upload_id)
                    .await?;
                debug!(key = %entry.key, upload_id = upload_id, "multipart upload aborted.");
            }
            _ => {
                self.storage.delete_object(&entry.key).await?;
                debug!(key = %entry.key, "object removed.");
            }
        }
        Ok(ItemOutcome::Done { bytes: 0 })
    }
}
