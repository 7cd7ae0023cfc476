//! Checkpoint files for resumable multipart transfers.
//!
//! One JSON file per in-flight transfer under the checkpoint directory. It
//! is written after every completed part, kept when the transfer fails, and
//! deleted once the transfer succeeds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transfer::partition::fnv1_64;
use crate::types::CompletedPart;

pub const CHECKPOINT_FILE_SUFFIX: &str = "cp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointKind {
    Upload,
    Download,
}

impl CheckpointKind {
    fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Upload => "upload",
            CheckpointKind::Download => "download",
        }
    }
}

/// Size and modification time of the source of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub size: u64,
    /// Unix seconds.
    pub modified: i64,
}

impl SourceIdentity {
    pub fn of_file(metadata: &fs::Metadata) -> Self {
        let modified = metadata
            .modified()
            .map(|time| DateTime::<Utc>::from(time).timestamp())
            .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH).timestamp());
        Self {
            size: metadata.len(),
            modified,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRecord {
    pub part_number: i32,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    /// fnv1_64 of the bytes of a downloaded part, checked again on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub kind: CheckpointKind,
    pub local_path: PathBuf,
    pub bucket: String,
    pub key: String,
    pub identity: SourceIdentity,
    pub part_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub parts: Vec<PartRecord>,
}

impl Checkpoint {
    pub fn new(
        kind: CheckpointKind,
        local_path: &Path,
        bucket: &str,
        key: &str,
        identity: SourceIdentity,
        part_size: u64,
    ) -> Self {
        Self {
            kind,
            local_path: local_path.to_path_buf(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            identity,
            part_size,
            upload_id: None,
            parts: Vec::new(),
        }
    }

    /// `<dir>/<fnv1_64 of kind, local path and remote object>.cp`
    pub fn file_path(
        dir: &Path,
        kind: CheckpointKind,
        local_path: &Path,
        bucket: &str,
        key: &str,
    ) -> PathBuf {
        let identity = format!(
            "{}|{}|s3://{bucket}/{key}",
            kind.as_str(),
            local_path.display()
        );
        dir.join(format!(
            "{:016x}.{CHECKPOINT_FILE_SUFFIX}",
            fnv1_64(identity.as_bytes())
        ))
    }

    /// Loads a checkpoint. A missing file is `None`; so is an unreadable one,
    /// which only costs a restart of the transfer.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read checkpoint {}", path.display()))?;
        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt checkpoint.");
                Ok(None)
            }
        }
    }

    /// Writes the checkpoint through a temporary file so that a crash never
    /// leaves a half-written checkpoint behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("failed to create checkpoint directory {}", dir.display())
            })?;
        }

        let temp_path = path.with_extension(format!("{CHECKPOINT_FILE_SUFFIX}.tmp"));
        let content = serde_json::to_vec(self)?;
        fs::write(&temp_path, content)
            .with_context(|| format!("failed to write checkpoint {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("failed to write checkpoint {}", path.display()))?;

        Ok(())
    }

    /// Deletes the checkpoint file, and its directory when that became empty.
    pub fn remove(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("failed to remove checkpoint {}", path.display()))?;
        }

        if let Some(dir) = path.parent() {
            let is_empty = fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if is_empty && fs::remove_dir(dir).is_ok() {
                debug!(dir = %dir.display(), "checkpoint directory removed.");
            }
        }

        Ok(())
    }

    /// Whether this checkpoint describes the same source split the same way.
    pub fn matches(&self, identity: &SourceIdentity, part_size: u64) -> bool {
        self.identity == *identity && self.part_size == part_size
    }

    pub fn is_part_done(&self, part_number: i32) -> bool {
        self.parts.iter().any(|part| part.part_number == part_number)
    }

    pub fn record_part(&mut self, part: PartRecord) {
        if !self.is_part_done(part.part_number) {
            self.parts.push(part);
        }
    }

    /// Completed parts in part-number order, as required to complete an upload.
    pub fn completed_parts(&self) -> Vec<CompletedPart> {
        let mut parts: Vec<CompletedPart> = self
            .parts
            .iter()
            .filter_map(|part| {
                part.e_tag.as_ref().map(|e_tag| CompletedPart {
                    part_number: part.part_number,
                    e_tag: e_tag.clone(),
                })
            })
            .collect();
        parts.sort_by_key(|part| part.part_number);
        parts
    }
}
