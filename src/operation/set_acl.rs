use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::{ItemOutcome, ObjectOperation};
use crate::storage::Storage;
use crate::types::error::RetryTarget;
use crate::types::{ObjectAcl, ObjectEntry};

/// Applies one canned ACL to every object.
pub struct SetAclOperation {
    storage: Storage,
    acl: ObjectAcl,
}

impl SetAclOperation {
    pub fn new(storage: Storage, acl: ObjectAcl) -> Self {
        Self { storage, acl }
    }
}

#[async_trait]
impl ObjectOperation for SetAclOperation {
    fn name(&self) -> &'static str {
        "set-acl"
    }

    fn retry_target(&self, entry: &ObjectEntry) -> RetryTarget {
        RetryTarget::object(self.storage.bucket(), &entry.key)
    }

    async fn process(&self, entry: &ObjectEntry) -> Result<ItemOutcome> {
        self.storage.set_object_acl(&entry.key, self.acl).await?;
        debug!(key = %entry.key, acl = %self.acl, "acl set.");
        Ok(ItemOutcome::Done { bytes: 0 })
    }
}
