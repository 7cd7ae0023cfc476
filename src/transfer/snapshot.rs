//! Incremental snapshot sync.
//!
//! Every completed transfer appends one JSON line `{"key":..,"modified":..}`
//! to a snapshot file. A later run loads the file and skips keys whose
//! recorded source modification time is unchanged. Later lines win.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::transfer::KeyMapper;
use crate::types::ObjectEntry;

pub const SNAPSHOT_FILE_NAME: &str = "s3bulk_snapshot.jsonl";

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    key: String,
    modified: i64,
}

#[derive(Debug)]
struct SnapshotState {
    entries: HashMap<String, i64>,
    file: File,
}

/// Snapshot records shared by all workers; appends are serialized.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    state: Mutex<SnapshotState>,
}

impl SnapshotStore {
    /// Opens (or creates) the snapshot kept under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create snapshot directory {}", dir.display()))?;
        let path = dir.join(SNAPSHOT_FILE_NAME);

        let entries = if path.exists() {
            load_records(&path)?
        } else {
            HashMap::new()
        };
        debug!(path = %path.display(), records = entries.len(), "snapshot loaded.");

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open snapshot file {}", path.display()))?;

        Ok(Self {
            path,
            state: Mutex::new(SnapshotState { entries, file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_done(&self, key: &str, modified: i64) -> bool {
        self.state.lock().unwrap().entries.get(key) == Some(&modified)
    }

    pub fn record(&self, key: &str, modified: i64) -> Result<()> {
        let mut line = serde_json::to_string(&SnapshotRecord {
            key: key.to_string(),
            modified,
        })?;
        line.push('\n');

        let mut state = self.state.lock().unwrap();
        state
            .file
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to append to snapshot file {}", self.path.display()))?;
        state.entries.insert(key.to_string(), modified);

        Ok(())
    }
}

fn load_records(path: &Path) -> Result<HashMap<String, i64>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open snapshot file {}", path.display()))?;

    let mut entries = HashMap::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read snapshot file {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SnapshotRecord>(&line) {
            Ok(record) => {
                entries.insert(record.key, record.modified);
            }
            // A line cut short by an interrupted run only loses that record.
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "skipping unreadable snapshot record."
            ),
        }
    }

    Ok(entries)
}

/// How snapshot keys are derived from listed entries.
#[derive(Debug, Clone)]
pub enum SnapshotKeyScheme {
    /// `s3://bucket/key`
    Download { bucket: String },
    /// `<absolute local path>==>s3://bucket/<destination key>`
    Upload {
        local_root: PathBuf,
        bucket: String,
        key_mapper: KeyMapper,
    },
}

/// Binds a [`SnapshotStore`] to the key scheme of one transfer direction.
#[derive(Debug)]
pub struct SnapshotTracker {
    store: SnapshotStore,
    scheme: SnapshotKeyScheme,
}

impl SnapshotTracker {
    pub fn new(store: SnapshotStore, scheme: SnapshotKeyScheme) -> Self {
        Self { store, scheme }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn snapshot_key(&self, entry: &ObjectEntry) -> String {
        match &self.scheme {
            SnapshotKeyScheme::Download { bucket } => format!("s3://{bucket}/{}", entry.key),
            SnapshotKeyScheme::Upload {
                local_root,
                bucket,
                key_mapper,
            } => format!(
                "{}==>s3://{bucket}/{}",
                crate::transfer::local_path(local_root, &entry.key).display(),
                key_mapper.destination_key(&entry.key)
            ),
        }
    }

    pub fn is_done(&self, entry: &ObjectEntry) -> bool {
        self.store
            .is_done(&self.snapshot_key(entry), entry.modified_secs())
    }

    pub fn mark_done(&self, entry: &ObjectEntry) -> Result<()> {
        self.store
            .record(&self.snapshot_key(entry), entry.modified_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let store = SnapshotStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
        store.record("s3://b/a", 10).unwrap();
        store.record("s3://b/b", 20).unwrap();
        store.record("s3://b/a", 11).unwrap();
        drop(store);

        let store = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.is_done("s3://b/a", 11));
        assert!(!store.is_done("s3://b/a", 10));
        assert!(store.is_done("s3://b/b", 20));
        assert!(!store.is_done("s3://b/c", 0));
    }

    #[test]
    fn truncated_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(SNAPSHOT_FILE_NAME),
            "{\"key\":\"s3://b/a\",\"modified\":1}\n{\"key\":\"s3://b/",
        )
        .unwrap();

        let store = SnapshotStore::open(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.is_done("s3://b/a", 1));
    }

    #[test]
    fn download_tracker_keys() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SnapshotTracker::new(
            SnapshotStore::open(dir.path()).unwrap(),
            SnapshotKeyScheme::Download {
                bucket: "bucket".to_string(),
            },
        );
        let entry = ObjectEntry::object("dir/a.txt", 3, DateTime::from_timestamp(100, 0));

        assert_eq!(tracker.snapshot_key(&entry), "s3://bucket/dir/a.txt");
        assert!(!tracker.is_done(&entry));
        tracker.mark_done(&entry).unwrap();
        assert!(tracker.is_done(&entry));

        let modified = ObjectEntry::object("dir/a.txt", 3, DateTime::from_timestamp(101, 0));
        assert!(!tracker.is_done(&modified));
    }

    #[test]
    fn upload_tracker_keys() {
        let dir = tempfile::tempdir().unwrap();
        let root = PathBuf::from("/data/src");
        let tracker = SnapshotTracker::new(
            SnapshotStore::open(dir.path()).unwrap(),
            SnapshotKeyScheme::Upload {
                local_root: root.clone(),
                bucket: "bucket".to_string(),
                key_mapper: KeyMapper::new("", "backup/", true),
            },
        );
        let entry = ObjectEntry::file("sub/a.txt", 3, None);

        assert_eq!(
            tracker.snapshot_key(&entry),
            format!(
                "{}==>s3://bucket/backup/sub/a.txt",
                root.join("sub").join("a.txt").display()
            )
        );
    }
}
