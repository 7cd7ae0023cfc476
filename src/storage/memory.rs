//! In-memory storage.
//!
//! Behaves like a small S3 service: marker based listings, multipart uploads
//! and service errors carrying status codes. Clones share state, and
//! [`MemoryStorage::for_bucket`] hands out a storage for another bucket of the
//! same service so that server side copies work. Failures can be injected
//! per key to exercise retry and abort paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::storage::StorageTrait;
use crate::transfer::partition::fnv1_64;
use crate::types::error::StorageError;
use crate::types::{
    ByteRange, CompletedPart, ListPage, ObjectAcl, ObjectEntry, ObjectHead, ObjectMetadata,
    UploadPage,
};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub last_modified: DateTime<Utc>,
    pub metadata: ObjectMetadata,
    pub acl: Option<ObjectAcl>,
}

#[derive(Debug, Default)]
struct PendingUpload {
    key: String,
    initiated: Option<DateTime<Utc>>,
    parts: BTreeMap<i32, (Vec<u8>, String)>,
}

#[derive(Debug, Default)]
struct Bucket {
    objects: BTreeMap<String, StoredObject>,
    // Keyed by upload id.
    uploads: BTreeMap<String, PendingUpload>,
}

#[derive(Debug)]
struct InjectedFailure {
    error: StorageError,
    remaining: u32,
}

#[derive(Debug, Default)]
struct Service {
    buckets: HashMap<String, Bucket>,
    failures: HashMap<String, InjectedFailure>,
    list_failures: HashMap<String, InjectedFailure>,
    part_failures: HashMap<i32, InjectedFailure>,
    calls: HashMap<&'static str, u64>,
    uploaded_parts: Vec<i32>,
    next_upload_id: u64,
    page_size: Option<i32>,
}

impl Service {
    fn count(&mut self, call: &'static str) {
        *self.calls.entry(call).or_default() += 1;
    }

    fn bucket(&self, name: &str) -> Result<&Bucket> {
        self.buckets.get(name).ok_or_else(|| no_such_bucket(name))
    }

    fn bucket_mut(&mut self, name: &str) -> Result<&mut Bucket> {
        self.buckets.get_mut(name).ok_or_else(|| no_such_bucket(name))
    }

    fn take_failure(
        failures: &mut HashMap<String, InjectedFailure>,
        key: &str,
    ) -> Option<StorageError> {
        let failure = failures.get_mut(key)?;
        if failure.remaining == 0 {
            return None;
        }
        failure.remaining -= 1;
        Some(failure.error.clone())
    }

    fn check_key(&mut self, key: &str) -> Result<()> {
        match Self::take_failure(&mut self.failures, key) {
            Some(error) => Err(anyhow!(error)),
            None => Ok(()),
        }
    }

    fn check_list(&mut self, bucket: &str) -> Result<()> {
        match Self::take_failure(&mut self.list_failures, bucket) {
            Some(error) => Err(anyhow!(error)),
            None => Ok(()),
        }
    }

    fn check_part(&mut self, part_number: i32) -> Result<()> {
        let Some(failure) = self.part_failures.get_mut(&part_number) else {
            return Ok(());
        };
        if failure.remaining == 0 {
            return Ok(());
        }
        failure.remaining -= 1;
        Err(anyhow!(failure.error.clone()))
    }
}

fn no_such_bucket(bucket: &str) -> anyhow::Error {
    anyhow!(StorageError::new(
        "NoSuchBucket",
        format!("The specified bucket does not exist: {bucket}"),
        Some(404)
    ))
}

fn no_such_upload(upload_id: &str) -> anyhow::Error {
    anyhow!(StorageError::new(
        "NoSuchUpload",
        format!("The specified upload does not exist: {upload_id}"),
        Some(404)
    ))
}

fn e_tag_of(body: &[u8]) -> String {
    format!("\"{:016x}\"", fnv1_64(body))
}

fn slice_range(body: &[u8], range: ByteRange) -> Result<Vec<u8>> {
    let size = body.len() as u64;
    if range.start >= size {
        return Err(anyhow!(StorageError::new(
            "InvalidRange",
            "The requested range is not satisfiable",
            Some(416)
        )));
    }
    let end = range.end.map_or(size - 1, |end| end.min(size - 1));
    Ok(body[range.start as usize..=end as usize].to_vec())
}

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bucket: String,
    service: Arc<Mutex<Service>>,
}

impl MemoryStorage {
    /// A new service holding one empty bucket.
    pub fn new(bucket: &str) -> Self {
        let mut service = Service::default();
        service.buckets.insert(bucket.to_string(), Bucket::default());
        Self {
            bucket: bucket.to_string(),
            service: Arc::new(Mutex::new(service)),
        }
    }

    /// A storage for `bucket` on the same service, creating the bucket.
    pub fn for_bucket(&self, bucket: &str) -> Self {
        self.service
            .lock()
            .unwrap()
            .buckets
            .entry(bucket.to_string())
            .or_default();
        Self {
            bucket: bucket.to_string(),
            service: self.service.clone(),
        }
    }

    pub fn insert_object(&self, key: &str, body: &[u8], last_modified: DateTime<Utc>) {
        let mut service = self.service.lock().unwrap();
        service
            .buckets
            .entry(self.bucket.clone())
            .or_default()
            .objects
            .insert(
                key.to_string(),
                StoredObject {
                    body: body.to_vec(),
                    last_modified,
                    metadata: ObjectMetadata::default(),
                    acl: None,
                },
            );
    }

    /// Starts a multipart upload with no parts, as left behind by an
    /// interrupted client.
    pub fn insert_upload(&self, key: &str, initiated: DateTime<Utc>) -> String {
        let mut service = self.service.lock().unwrap();
        service.next_upload_id += 1;
        let upload_id = format!("upload-{}", service.next_upload_id);
        service
            .buckets
            .entry(self.bucket.clone())
            .or_default()
            .uploads
            .insert(
                upload_id.clone(),
                PendingUpload {
                    key: key.to_string(),
                    initiated: Some(initiated),
                    parts: BTreeMap::new(),
                },
            );
        upload_id
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        let service = self.service.lock().unwrap();
        service.buckets.get(&self.bucket)?.objects.get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let service = self.service.lock().unwrap();
        service
            .buckets
            .get(&self.bucket)
            .map(|bucket| bucket.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn upload_ids(&self) -> Vec<String> {
        let service = self.service.lock().unwrap();
        service
            .buckets
            .get(&self.bucket)
            .map(|bucket| bucket.uploads.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn bucket_exists(&self) -> bool {
        self.service
            .lock()
            .unwrap()
            .buckets
            .contains_key(&self.bucket)
    }

    /// The next `times` calls touching `key` fail with `error`.
    pub fn inject_failure(&self, key: &str, error: StorageError, times: u32) {
        self.service.lock().unwrap().failures.insert(
            key.to_string(),
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    /// The next `times` listing calls on this bucket fail with `error`.
    pub fn inject_list_failure(&self, error: StorageError, times: u32) {
        self.service.lock().unwrap().list_failures.insert(
            self.bucket.clone(),
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    /// The next `times` uploads of `part_number` fail with `error`.
    pub fn inject_part_failure(&self, part_number: i32, error: StorageError, times: u32) {
        self.service.lock().unwrap().part_failures.insert(
            part_number,
            InjectedFailure {
                error,
                remaining: times,
            },
        );
    }

    /// Caps the size of listing pages below the requested `max_keys`.
    pub fn set_page_size(&self, page_size: i32) {
        self.service.lock().unwrap().page_size = Some(page_size);
    }

    pub fn call_count(&self, call: &str) -> u64 {
        self.service
            .lock()
            .unwrap()
            .calls
            .get(call)
            .copied()
            .unwrap_or(0)
    }

    /// Part numbers of every successful `upload_part` and `upload_part_copy`.
    pub fn uploaded_parts(&self) -> Vec<i32> {
        self.service.lock().unwrap().uploaded_parts.clone()
    }

    fn page_size(service: &Service, max_keys: i32) -> usize {
        let max_keys = match service.page_size {
            Some(page_size) => max_keys.min(page_size),
            None => max_keys,
        };
        max_keys.max(1) as usize
    }
}

#[async_trait]
impl StorageTrait for MemoryStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(
        &self,
        prefix: &str,
        marker: Option<&str>,
        delimiter: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage> {
        let mut service = self.service.lock().unwrap();
        service.count("list_page");
        service.check_list(&self.bucket)?;
        let page_size = Self::page_size(&service, max_keys);
        let bucket = service.bucket(&self.bucket)?;

        let mut page = ListPage {
            prefix: prefix.to_string(),
            ..ListPage::default()
        };
        let mut last = None;
        let mut count = 0;

        for (key, object) in bucket.objects.iter() {
            if !key.starts_with(prefix) || marker.is_some_and(|marker| key.as_str() <= marker) {
                continue;
            }
            // A marker naming a common prefix skips everything rolled up into it.
            let inside_marker = marker.is_some_and(|marker| {
                delimiter.is_some_and(|delimiter| marker.ends_with(delimiter))
                    && key.starts_with(marker)
            });
            if inside_marker {
                continue;
            }

            let common_prefix = delimiter.and_then(|delimiter| {
                key[prefix.len()..]
                    .find(delimiter)
                    .map(|index| key[..prefix.len() + index + delimiter.len()].to_string())
            });
            if let Some(common_prefix) = &common_prefix {
                if page.common_prefixes.last() == Some(common_prefix) {
                    continue;
                }
            }

            if count == page_size {
                page.is_truncated = true;
                break;
            }
            count += 1;

            match common_prefix {
                Some(common_prefix) => {
                    last = Some(common_prefix.clone());
                    page.common_prefixes.push(common_prefix);
                }
                None => {
                    last = Some(key.clone());
                    page.objects.push(ObjectEntry::object(
                        key.clone(),
                        object.body.len() as u64,
                        Some(object.last_modified),
                    ));
                }
            }
        }

        if page.is_truncated {
            page.next_marker = last;
        }
        Ok(page)
    }

    async fn list_multipart_uploads_page(
        &self,
        prefix: &str,
        key_marker: Option<&str>,
        upload_id_marker: Option<&str>,
        max_uploads: i32,
    ) -> Result<UploadPage> {
        let mut service = self.service.lock().unwrap();
        service.count("list_multipart_uploads_page");
        service.check_list(&self.bucket)?;
        let page_size = Self::page_size(&service, max_uploads);
        let bucket = service.bucket(&self.bucket)?;

        let mut uploads: Vec<(&String, &PendingUpload)> = bucket
            .uploads
            .iter()
            .filter(|(_, upload)| upload.key.starts_with(prefix))
            .collect();
        uploads.sort_by(|a, b| (&a.1.key, a.0).cmp(&(&b.1.key, b.0)));

        let after_marker = |key: &str, upload_id: &str| match (key_marker, upload_id_marker) {
            (None, _) => true,
            (Some(key_marker), None) => key > key_marker,
            (Some(key_marker), Some(upload_id_marker)) => {
                key > key_marker || (key == key_marker && upload_id > upload_id_marker)
            }
        };

        let mut page = UploadPage {
            prefix: prefix.to_string(),
            ..UploadPage::default()
        };
        for (upload_id, upload) in uploads {
            if !after_marker(&upload.key, upload_id) {
                continue;
            }
            if page.uploads.len() == page_size {
                page.is_truncated = true;
                break;
            }
            page.uploads.push(ObjectEntry::upload(
                upload.key.clone(),
                upload_id.clone(),
                upload.initiated,
            ));
        }

        if page.is_truncated {
            if let Some(last) = page.uploads.last() {
                page.next_key_marker = Some(last.key.clone());
                page.next_upload_id_marker = last.upload_id.clone();
            }
        }
        Ok(page)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectHead> {
        let mut service = self.service.lock().unwrap();
        service.count("head_object");
        service.check_key(key)?;
        let object = service
            .bucket(&self.bucket)?
            .objects
            .get(key)
            .ok_or_else(|| anyhow!(StorageError::new("NotFound", "Not Found", Some(404))))?;

        Ok(ObjectHead {
            size: object.body.len() as u64,
            last_modified: Some(object.last_modified),
            e_tag: Some(e_tag_of(&object.body)),
            metadata: object.metadata.clone(),
        })
    }

    async fn get_object_range(&self, key: &str, range: Option<ByteRange>) -> Result<Vec<u8>> {
        let mut service = self.service.lock().unwrap();
        service.count("get_object");
        service.check_key(key)?;
        let object = service
            .bucket(&self.bucket)?
            .objects
            .get(key)
            .ok_or_else(|| anyhow!(StorageError::not_found(key)))?;

        match range {
            Some(range) => slice_range(&object.body, range),
            None => Ok(object.body.clone()),
        }
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("put_object");
        service.check_key(key)?;
        service.bucket_mut(&self.bucket)?.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
                metadata: metadata.cloned().unwrap_or_default(),
                acl: None,
            },
        );
        Ok(())
    }

    async fn copy_object(&self, source_bucket: &str, source_key: &str, key: &str) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("copy_object");
        service.check_key(source_key)?;
        let source = service
            .bucket(source_bucket)?
            .objects
            .get(source_key)
            .cloned()
            .ok_or_else(|| anyhow!(StorageError::not_found(source_key)))?;

        service.bucket_mut(&self.bucket)?.objects.insert(
            key.to_string(),
            StoredObject {
                last_modified: Utc::now(),
                acl: None,
                ..source
            },
        );
        Ok(())
    }

    async fn set_object_acl(&self, key: &str, acl: ObjectAcl) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("set_object_acl");
        service.check_key(key)?;
        let object = service
            .bucket_mut(&self.bucket)?
            .objects
            .get_mut(key)
            .ok_or_else(|| anyhow!(StorageError::not_found(key)))?;
        object.acl = Some(acl);
        Ok(())
    }

    async fn replace_object_metadata(&self, key: &str, metadata: &ObjectMetadata) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("replace_object_metadata");
        service.check_key(key)?;
        let object = service
            .bucket_mut(&self.bucket)?
            .objects
            .get_mut(key)
            .ok_or_else(|| anyhow!(StorageError::not_found(key)))?;
        object.metadata = metadata.clone();
        object.last_modified = Utc::now();
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("delete_object");
        service.check_key(key)?;
        // Deleting a missing key succeeds, as it does on S3.
        service.bucket_mut(&self.bucket)?.objects.remove(key);
        Ok(())
    }

    async fn delete_bucket(&self) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("delete_bucket");
        let bucket = service.bucket(&self.bucket)?;
        if !bucket.objects.is_empty() || !bucket.uploads.is_empty() {
            return Err(anyhow!(StorageError::new(
                "BucketNotEmpty",
                "The bucket you tried to delete is not empty",
                Some(409)
            )));
        }
        service.buckets.remove(&self.bucket);
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        let mut service = self.service.lock().unwrap();
        service.count("create_multipart_upload");
        service.check_key(key)?;
        service.next_upload_id += 1;
        let upload_id = format!("upload-{}", service.next_upload_id);
        service.bucket_mut(&self.bucket)?.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                initiated: Some(Utc::now()),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        let mut service = self.service.lock().unwrap();
        service.count("upload_part");
        service.check_part(part_number)?;
        let upload = service
            .bucket_mut(&self.bucket)?
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let e_tag = e_tag_of(&body);
        upload.parts.insert(part_number, (body, e_tag.clone()));
        service.uploaded_parts.push(part_number);
        Ok(e_tag)
    }

    async fn upload_part_copy(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        source_bucket: &str,
        source_key: &str,
        range: ByteRange,
    ) -> Result<String> {
        let mut service = self.service.lock().unwrap();
        service.count("upload_part_copy");
        service.check_part(part_number)?;
        let source = service
            .bucket(source_bucket)?
            .objects
            .get(source_key)
            .ok_or_else(|| anyhow!(StorageError::not_found(source_key)))?;
        let body = slice_range(&source.body, range)?;

        let upload = service
            .bucket_mut(&self.bucket)?
            .uploads
            .get_mut(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let e_tag = e_tag_of(&body);
        upload.parts.insert(part_number, (body, e_tag.clone()));
        service.uploaded_parts.push(part_number);
        Ok(e_tag)
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("complete_multipart_upload");
        service.check_key(key)?;
        let bucket = service.bucket_mut(&self.bucket)?;
        let upload = bucket
            .uploads
            .get(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let mut body = Vec::new();
        let mut previous = 0;
        for part in parts {
            let stored = upload
                .parts
                .get(&part.part_number)
                .filter(|(_, e_tag)| *e_tag == part.e_tag);
            let Some((data, _)) = stored else {
                return Err(anyhow!(StorageError::new(
                    "InvalidPart",
                    format!("part {} was not uploaded", part.part_number),
                    Some(400)
                )));
            };
            if part.part_number <= previous {
                return Err(anyhow!(StorageError::new(
                    "InvalidPartOrder",
                    "The list of parts was not in ascending order",
                    Some(400)
                )));
            }
            previous = part.part_number;
            body.extend_from_slice(data);
        }

        bucket.uploads.remove(upload_id);
        bucket.objects.insert(
            key.to_string(),
            StoredObject {
                body,
                last_modified: Utc::now(),
                metadata: ObjectMetadata::default(),
                acl: None,
            },
        );
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let mut service = self.service.lock().unwrap();
        service.count("abort_multipart_upload");
        service.check_key(key)?;
        let bucket = service.bucket_mut(&self.bucket)?;
        match bucket.uploads.get(upload_id) {
            Some(upload) if upload.key == key => {
                bucket.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(no_such_upload(upload_id)),
        }
    }
}
