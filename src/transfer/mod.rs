//! Transfer sizing, resumability and the multipart engines used by `cp`.

use std::fmt;
use std::path::{Path, PathBuf};

pub mod checkpoint;
pub mod multipart;
pub mod partition;
pub mod planner;
pub mod snapshot;
pub mod throttle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
    Copy,
}

impl TransferDirection {
    /// Verb used in progress text.
    pub fn verb(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "upload",
            TransferDirection::Download => "download",
            TransferDirection::Copy => "copy",
        }
    }

    /// What the transferred items are called in progress text.
    pub fn subject(&self) -> &'static str {
        match self {
            TransferDirection::Upload => "files",
            TransferDirection::Download | TransferDirection::Copy => "objects",
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Maps a listed source key onto its destination key.
///
/// Recursive batches keep the part of the key after the last `/` of the
/// source prefix. A single item lands at the destination prefix itself,
/// unless that prefix names a directory (empty or ending with `/`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapper {
    source_base: String,
    dest_prefix: String,
    recursive: bool,
}

impl KeyMapper {
    pub fn new(source_prefix: &str, dest_prefix: &str, recursive: bool) -> Self {
        let source_base = match source_prefix.rfind('/') {
            Some(index) if recursive => source_prefix[..=index].to_string(),
            _ => String::new(),
        };
        Self {
            source_base,
            dest_prefix: dest_prefix.to_string(),
            recursive,
        }
    }

    pub fn relative<'a>(&self, source_key: &'a str) -> &'a str {
        if self.recursive {
            source_key
                .strip_prefix(self.source_base.as_str())
                .unwrap_or(source_key)
        } else {
            crate::types::base_name(source_key)
        }
    }

    pub fn destination_key(&self, source_key: &str) -> String {
        let relative = self.relative(source_key);
        if self.dest_prefix.is_empty() || self.dest_prefix.ends_with('/') {
            format!("{}{}", self.dest_prefix, relative)
        } else if self.recursive {
            format!("{}/{}", self.dest_prefix, relative)
        } else {
            self.dest_prefix.clone()
        }
    }
}

/// Joins a `/`-separated relative key onto a local directory.
pub fn local_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|component| !component.is_empty())
        .fold(root.to_path_buf(), |path, component| path.join(component))
}
