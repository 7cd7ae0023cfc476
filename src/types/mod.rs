use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// What an [`ObjectEntry`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// A committed object in a bucket.
    Object,
    /// An in-progress multipart upload (identified by key plus upload id).
    Upload,
    /// A regular file under a local directory.
    File,
}

/// One unit of work flowing from the listing producer to the workers.
///
/// For local files `key` is the path relative to the walked root, always
/// separated by `/`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub upload_id: Option<String>,
    pub kind: EntryKind,
}

impl ObjectEntry {
    pub fn object(key: impl Into<String>, size: u64, last_modified: Option<DateTime<Utc>>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            upload_id: None,
            kind: EntryKind::Object,
        }
    }

    pub fn upload(
        key: impl Into<String>,
        upload_id: impl Into<String>,
        initiated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            key: key.into(),
            size: 0,
            last_modified: initiated,
            upload_id: Some(upload_id.into()),
            kind: EntryKind::Upload,
        }
    }

    pub fn file(relative_path: impl Into<String>, size: u64, modified: Option<DateTime<Utc>>) -> Self {
        Self {
            key: relative_path.into(),
            size,
            last_modified: modified,
            upload_id: None,
            kind: EntryKind::File,
        }
    }

    /// The final path component of the key. Empty for directory markers such as `dir/`.
    pub fn base_name(&self) -> &str {
        base_name(&self.key)
    }

    /// Last modification as unix seconds, `0` when unknown.
    pub fn modified_secs(&self) -> i64 {
        self.last_modified.map(|t| t.timestamp()).unwrap_or(0)
    }

    pub fn is_directory_marker(&self) -> bool {
        self.kind == EntryKind::Object && self.key.ends_with('/')
    }
}

pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// One page of a delimiter-aware object listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub objects: Vec<ObjectEntry>,
    pub common_prefixes: Vec<String>,
    /// The prefix echoed back by the service for this page.
    pub prefix: String,
    pub next_marker: Option<String>,
    pub is_truncated: bool,
}

/// One page of an in-progress multipart upload listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadPage {
    pub uploads: Vec<ObjectEntry>,
    pub prefix: String,
    pub next_key_marker: Option<String>,
    pub next_upload_id_marker: Option<String>,
    pub is_truncated: bool,
}

/// Inclusive byte range. An open end means "to the end of the object".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// Value for the HTTP `Range` header.
    pub fn to_header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }

    /// Number of bytes covered when the object is `object_size` bytes long.
    pub fn len_within(&self, object_size: u64) -> u64 {
        if self.start >= object_size {
            return 0;
        }
        let end = self
            .end
            .map(|end| end.min(object_size - 1))
            .unwrap_or(object_size - 1);
        end + 1 - self.start
    }
}

impl FromStr for ByteRange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid range: {value} (expected <start>-<end> or <start>-)");
        let (start, end) = value.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.parse::<u64>().map_err(|_| invalid())?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse::<u64>().map_err(|_| invalid())?)
        };
        if end.is_some_and(|end| end < start) {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

/// Canned access control lists accepted by `set-acl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAcl {
    Private,
    PublicRead,
    PublicReadWrite,
    AuthenticatedRead,
    BucketOwnerRead,
    BucketOwnerFullControl,
}

impl ObjectAcl {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectAcl::Private => "private",
            ObjectAcl::PublicRead => "public-read",
            ObjectAcl::PublicReadWrite => "public-read-write",
            ObjectAcl::AuthenticatedRead => "authenticated-read",
            ObjectAcl::BucketOwnerRead => "bucket-owner-read",
            ObjectAcl::BucketOwnerFullControl => "bucket-owner-full-control",
        }
    }
}

impl FromStr for ObjectAcl {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "private" => Ok(ObjectAcl::Private),
            "public-read" => Ok(ObjectAcl::PublicRead),
            "public-read-write" => Ok(ObjectAcl::PublicReadWrite),
            "authenticated-read" => Ok(ObjectAcl::AuthenticatedRead),
            "bucket-owner-read" => Ok(ObjectAcl::BucketOwnerRead),
            "bucket-owner-full-control" => Ok(ObjectAcl::BucketOwnerFullControl),
            _ => Err(format!("invalid acl: {value}")),
        }
    }
}

impl fmt::Display for ObjectAcl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System headers plus user metadata of an object.
///
/// Header names are matched case-insensitively; user metadata keys are stored
/// lower-case without the `x-amz-meta-` prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub content_disposition: Option<String>,
    pub content_encoding: Option<String>,
    pub content_language: Option<String>,
    pub user_metadata: BTreeMap<String, String>,
}

pub const USER_METADATA_PREFIX: &str = "x-amz-meta-";

impl ObjectMetadata {
    /// Parses `Name:Value#Name2:Value2`. A name without value (`Name` or
    /// `Name:`) is allowed so that the same syntax can name headers to delete.
    pub fn parse_headers(value: &str) -> Result<Self, String> {
        let mut metadata = ObjectMetadata::default();
        for header in value.split('#').map(str::trim).filter(|h| !h.is_empty()) {
            let (name, value) = header.split_once(':').unwrap_or((header, ""));
            metadata.set(name.trim(), value.trim())?;
        }
        Ok(metadata)
    }

    pub fn set(&mut self, name: &str, value: &str) -> Result<(), String> {
        let lower = name.to_ascii_lowercase();
        let value = value.to_string();
        match lower.as_str() {
            "content-type" => self.content_type = Some(value),
            "cache-control" => self.cache_control = Some(value),
            "content-disposition" => self.content_disposition = Some(value),
            "content-encoding" => self.content_encoding = Some(value),
            "content-language" => self.content_language = Some(value),
            _ => match lower.strip_prefix(USER_METADATA_PREFIX) {
                Some(key) if !key.is_empty() => {
                    self.user_metadata.insert(key.to_string(), value);
                }
                _ => return Err(format!("unsupported header: {name}")),
            },
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        *self == ObjectMetadata::default()
    }

    /// Overlays every header present in `update` onto `self`.
    pub fn merge(&self, update: &ObjectMetadata) -> ObjectMetadata {
        let mut merged = self.clone();
        let overlay = |current: &mut Option<String>, new: &Option<String>| {
            if new.is_some() {
                current.clone_from(new);
            }
        };
        overlay(&mut merged.content_type, &update.content_type);
        overlay(&mut merged.cache_control, &update.cache_control);
        overlay(&mut merged.content_disposition, &update.content_disposition);
        overlay(&mut merged.content_encoding, &update.content_encoding);
        overlay(&mut merged.content_language, &update.content_language);
        for (key, value) in &update.user_metadata {
            merged.user_metadata.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Drops every header named in `names` from `self`.
    pub fn without(&self, names: &ObjectMetadata) -> ObjectMetadata {
        let mut remaining = self.clone();
        let clear = |current: &mut Option<String>, named: &Option<String>| {
            if named.is_some() {
                *current = None;
            }
        };
        clear(&mut remaining.content_type, &names.content_type);
        clear(&mut remaining.cache_control, &names.cache_control);
        clear(&mut remaining.content_disposition, &names.content_disposition);
        clear(&mut remaining.content_encoding, &names.content_encoding);
        clear(&mut remaining.content_language, &names.content_language);
        for key in names.user_metadata.keys() {
            remaining.user_metadata.remove(key);
        }
        remaining
    }
}

/// Result of a head request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub e_tag: Option<String>,
    pub metadata: ObjectMetadata,
}

/// A part acknowledged by the service, persisted in checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: i32,
    pub e_tag: String,
}

/// Where a batch reads from or writes to.
#[derive(Debug, Clone, PartialEq)]
pub enum StoragePath {
    S3 { bucket: String, prefix: String },
    Local(PathBuf),
}

impl StoragePath {
    pub fn is_s3(&self) -> bool {
        matches!(self, StoragePath::S3 { .. })
    }

    pub fn bucket(&self) -> Option<&str> {
        match self {
            StoragePath::S3 { bucket, .. } => Some(bucket),
            StoragePath::Local(_) => None,
        }
    }

    pub fn prefix(&self) -> &str {
        match self {
            StoragePath::S3 { prefix, .. } => prefix,
            StoragePath::Local(_) => "",
        }
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StoragePath::S3 { bucket, prefix } => write!(f, "s3://{bucket}/{prefix}"),
            StoragePath::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// AWS credential types supported by s3bulk.
#[derive(Debug, Clone, Default)]
pub enum S3Credentials {
    Profile(String),
    Credentials { access_keys: AccessKeys },
    #[default]
    FromEnvironment,
}

/// AWS access key pair, cleared from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        let session_token = self
            .session_token
            .as_ref()
            .map_or("None", |_| "** redacted **");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &session_token);
        keys.finish()
    }
}
