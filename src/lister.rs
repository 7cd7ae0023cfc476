//! Listing producers.
//!
//! Two producers walk the same paginated listing independently: the
//! [`ObjectScanner`] feeds the monitor with totals, the [`ObjectLister`]
//! feeds the workers through the bounded item channel. Both apply the same
//! [`ObjectSelector`] so that their views of the batch agree.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_channel::Sender;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use walkdir::WalkDir;

use crate::coordinator::ListingSignal;
use crate::filters::{ObjectSelector, Selection};
use crate::monitor::ProgressMonitor;
use crate::retry::{RetryPolicy, with_retry};
use crate::stage::{SendResult, Stage};
use crate::storage::Storage;
use crate::types::error::RetryTarget;
use crate::types::token::PipelineCancellationToken;
use crate::types::ObjectEntry;

const DIRECTORY_DELIMITER: &str = "/";

/// What a batch enumerates.
#[derive(Clone)]
pub enum ListingSource {
    /// Committed objects under a prefix. `only_current_dir` leaves out keys
    /// with a `/` after the prefix.
    Objects {
        storage: Storage,
        prefix: String,
        only_current_dir: bool,
    },
    /// In-progress multipart uploads under a prefix.
    Uploads {
        storage: Storage,
        prefix: String,
        only_current_dir: bool,
    },
    /// Regular files below a local directory, or directly in it with
    /// `only_current_dir`.
    Files { root: PathBuf, only_current_dir: bool },
    /// A fixed set of entries, used when a command names a single item.
    Entries(Vec<ObjectEntry>),
    /// Each source in turn.
    Chain(Vec<ListingSource>),
}

impl ListingSource {
    pub fn cursor(self, max_keys: i32, retry_policy: RetryPolicy) -> ListingCursor {
        ListingCursor {
            pending: VecDeque::from([self]),
            current: None,
            max_keys: max_keys.max(1),
            retry_policy,
        }
    }
}

enum CursorState {
    Objects {
        storage: Storage,
        prefix: String,
        delimiter: Option<&'static str>,
        marker: Option<String>,
    },
    Uploads {
        storage: Storage,
        prefix: String,
        only_current_dir: bool,
        key_marker: Option<String>,
        upload_id_marker: Option<String>,
    },
    Files {
        root: PathBuf,
        walker: walkdir::IntoIter,
    },
}

/// Page by page iteration over a [`ListingSource`]. Every remote page is
/// fetched through the retry wrapper.
pub struct ListingCursor {
    pending: VecDeque<ListingSource>,
    current: Option<CursorState>,
    max_keys: i32,
    retry_policy: RetryPolicy,
}

impl ListingCursor {
    /// The next page of entries, `None` once every source is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<ObjectEntry>>> {
        loop {
            if self.current.is_none() {
                let Some(source) = self.pending.pop_front() else {
                    return Ok(None);
                };
                self.current = match source {
                    ListingSource::Objects {
                        storage,
                        prefix,
                        only_current_dir,
                    } => Some(CursorState::Objects {
                        storage,
                        prefix,
                        delimiter: only_current_dir.then_some(DIRECTORY_DELIMITER),
                        marker: None,
                    }),
                    ListingSource::Uploads {
                        storage,
                        prefix,
                        only_current_dir,
                    } => Some(CursorState::Uploads {
                        storage,
                        prefix,
                        only_current_dir,
                        key_marker: None,
                        upload_id_marker: None,
                    }),
                    ListingSource::Files {
                        root,
                        only_current_dir,
                    } => {
                        let mut walker = WalkDir::new(&root).follow_links(true).sort_by_file_name();
                        if only_current_dir {
                            walker = walker.max_depth(1);
                        }
                        let walker = walker.into_iter();
                        Some(CursorState::Files { root, walker })
                    }
                    ListingSource::Entries(entries) => {
                        if entries.is_empty() {
                            continue;
                        }
                        return Ok(Some(entries));
                    }
                    ListingSource::Chain(sources) => {
                        for source in sources.into_iter().rev() {
                            self.pending.push_front(source);
                        }
                        None
                    }
                };
                continue;
            }

            let (entries, exhausted) = self.fetch().await?;
            if exhausted {
                self.current = None;
            }
            if !entries.is_empty() || !exhausted {
                return Ok(Some(entries));
            }
        }
    }

    async fn fetch(&mut self) -> Result<(Vec<ObjectEntry>, bool)> {
        let max_keys = self.max_keys;
        let retry_policy = self.retry_policy;

        match self.current.as_mut() {
            Some(CursorState::Objects {
                storage,
                prefix,
                delimiter,
                marker,
            }) => {
                let page = {
                    let storage = &*storage;
                    let prefix_ref = prefix.as_str();
                    let marker_ref = marker.as_deref();
                    let delimiter = *delimiter;
                    with_retry(&retry_policy, RetryTarget::bucket(storage.bucket()), move || {
                        storage.list_page(prefix_ref, marker_ref, delimiter, max_keys)
                    })
                    .await?
                };
                trace!(
                    bucket = %storage.bucket(),
                    prefix = %prefix,
                    objects = page.objects.len(),
                    common_prefixes = page.common_prefixes.len(),
                    is_truncated = page.is_truncated,
                    "object page listed."
                );

                if !page.prefix.is_empty() {
                    *prefix = page.prefix;
                }
                if !page.is_truncated {
                    return Ok((page.objects, true));
                }
                match page.next_marker {
                    Some(next_marker) => *marker = Some(next_marker),
                    None => {
                        return Err(anyhow!(
                            "listing of s3://{}/{} is truncated without a next marker.",
                            storage.bucket(),
                            prefix
                        ));
                    }
                }
                Ok((page.objects, false))
            }
            Some(CursorState::Uploads {
                storage,
                prefix,
                only_current_dir,
                key_marker,
                upload_id_marker,
            }) => {
                let page = {
                    let storage = &*storage;
                    let prefix_ref = prefix.as_str();
                    let key_marker_ref = key_marker.as_deref();
                    let upload_id_marker_ref = upload_id_marker.as_deref();
                    with_retry(&retry_policy, RetryTarget::bucket(storage.bucket()), move || {
                        storage.list_multipart_uploads_page(
                            prefix_ref,
                            key_marker_ref,
                            upload_id_marker_ref,
                            max_keys,
                        )
                    })
                    .await?
                };
                trace!(
                    bucket = %storage.bucket(),
                    prefix = %prefix,
                    uploads = page.uploads.len(),
                    is_truncated = page.is_truncated,
                    "multipart upload page listed."
                );

                if !page.prefix.is_empty() {
                    *prefix = page.prefix;
                }
                let mut uploads = page.uploads;
                if *only_current_dir {
                    uploads.retain(|entry| is_in_current_dir(prefix, &entry.key));
                }
                if !page.is_truncated {
                    return Ok((uploads, true));
                }
                if page.next_key_marker.is_none() {
                    return Err(anyhow!(
                        "multipart upload listing of s3://{}/{} is truncated without a next marker.",
                        storage.bucket(),
                        prefix
                    ));
                }
                *key_marker = page.next_key_marker;
                *upload_id_marker = page.next_upload_id_marker;
                Ok((uploads, false))
            }
            Some(CursorState::Files { root, walker }) => {
                let mut entries = Vec::new();
                while entries.len() < max_keys as usize {
                    let Some(dir_entry) = walker.next() else {
                        return Ok((entries, true));
                    };
                    let dir_entry = dir_entry
                        .with_context(|| format!("failed to walk {}", root.display()))?;
                    if !dir_entry.file_type().is_file() {
                        continue;
                    }
                    entries.push(file_entry(root, dir_entry.path())?);
                }
                Ok((entries, false))
            }
            None => Ok((Vec::new(), true)),
        }
    }
}

/// Whether `key` has no `/` after `prefix`.
fn is_in_current_dir(prefix: &str, key: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| !rest.contains(DIRECTORY_DELIMITER))
}

/// `/` separated path of `path` relative to `root`.
pub fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// An [`ObjectEntry`] for the regular file at `path` below `root`.
pub fn file_entry(root: &Path, path: &Path) -> Result<ObjectEntry> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("failed to read metadata of {}", path.display()))?;
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    Ok(ObjectEntry::file(
        relative_key(root, path),
        metadata.len(),
        modified,
    ))
}

/// Feeds the monitor with the totals of the batch.
pub struct ObjectScanner {
    source: ListingSource,
    selector: ObjectSelector,
    monitor: Arc<dyn ProgressMonitor>,
    max_keys: i32,
    retry_policy: RetryPolicy,
    cancellation_token: PipelineCancellationToken,
}

impl ObjectScanner {
    pub fn new(
        source: ListingSource,
        selector: ObjectSelector,
        monitor: Arc<dyn ProgressMonitor>,
        max_keys: i32,
        retry_policy: RetryPolicy,
        cancellation_token: PipelineCancellationToken,
    ) -> Self {
        Self {
            source,
            selector,
            monitor,
            max_keys,
            retry_policy,
            cancellation_token,
        }
    }

    /// Walks the whole listing. Errors end the scan phase of the monitor and
    /// nothing else.
    pub async fn scan(self) {
        debug!("scan has started.");
        let mut cursor = self.source.cursor(self.max_keys, self.retry_policy);

        loop {
            if self.cancellation_token.is_cancelled() {
                debug!("scan cancelled.");
                return;
            }

            match cursor.next_page().await {
                Ok(Some(entries)) => {
                    for entry in &entries {
                        match self.selector.select(entry) {
                            Selection::Selected | Selection::AlreadyDone => {
                                self.monitor.update_scan(entry)
                            }
                            Selection::Filtered => {}
                        }
                    }
                }
                Ok(None) => {
                    self.monitor.set_scan_end();
                    debug!("scan has been completed.");
                    return;
                }
                Err(e) => {
                    self.monitor.set_scan_error(&format!("{e:#}"));
                    return;
                }
            }
        }
    }
}

/// Feeds the workers. Entries already recorded in the snapshot are counted
/// as skipped here and never reach a worker.
pub struct ObjectLister {
    stage: Stage,
    source: ListingSource,
    selector: ObjectSelector,
    monitor: Arc<dyn ProgressMonitor>,
    retry_policy: RetryPolicy,
}

impl ObjectLister {
    pub fn new(
        stage: Stage,
        source: ListingSource,
        selector: ObjectSelector,
        monitor: Arc<dyn ProgressMonitor>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            stage,
            source,
            selector,
            monitor,
            retry_policy,
        }
    }

    pub async fn list(&self) -> Result<()> {
        debug!("list source has started.");
        let mut cursor = self
            .source
            .clone()
            .cursor(self.stage.config.max_keys, self.retry_policy);

        while let Some(entries) = cursor.next_page().await? {
            for entry in entries {
                if self.stage.cancellation_token.is_cancelled() {
                    debug!("listing cancelled.");
                    return Ok(());
                }

                match self.selector.select(&entry) {
                    Selection::Selected => {
                        if self.stage.send(entry).await? == SendResult::Closed {
                            debug!("item channel closed. listing stopped.");
                            return Ok(());
                        }
                    }
                    Selection::AlreadyDone => {
                        debug!(key = %entry.key, "already done in snapshot. skipped.");
                        self.monitor.record_skip(&entry, entry.size);
                    }
                    Selection::Filtered => {}
                }
            }
        }

        debug!("list source has been completed.");
        Ok(())
    }

    /// Lists, then reports on the single-slot listing signal. The item
    /// channel is closed only after the outcome was signalled, so workers
    /// can never finish before the coordinator can see it.
    pub async fn run(self, listing_signal: Sender<ListingSignal>) {
        let signal = match self.list().await {
            Ok(()) => ListingSignal::Done,
            Err(e) => ListingSignal::Failed(e),
        };
        let _ = listing_signal.send(signal).await;
        drop(self);
    }
}
