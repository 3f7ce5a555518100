//! Usenet stream service
//!
//! Facade over the mount manager, NZB parsing, segment stores, and the
//! NNTP manager. Owns per-mount stream bookkeeping: segment stores are
//! cached per mount, RAR-only mounts are refused, and extraction leftovers
//! are cleaned up a grace period after the last stream on a mount closes.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::error::StreamError;

use super::nntp::NntpManager;
use super::nzb::{NzbFileEntry, ParsedNzb};
use super::range::{ByteRange, RangeError, parse_range_header};
use super::segments::SegmentStore;
use super::stream::{AccessPatternHandle, stream_range};

/// Grace period after the last stream on a mount closes before extraction
/// temp files are removed
const STREAM_CLEANUP_DELAY: Duration = Duration::from_secs(120);

/// Cached segment stores per mount live this long
const MOUNT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Lifecycle state of a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountStatus {
    Downloading,
    Extracting,
    Ready,
    RequiresExtraction,
    Error,
}

/// Projection of a mount as the stream service consumes it
#[derive(Debug, Clone)]
pub struct MountInfo {
    pub id: String,
    pub nzb_hash: String,
    pub status: MountStatus,
    /// Pre-parsed, non-RAR media files with full segment data
    pub media_files: Vec<NzbFileEntry>,
}

impl MountInfo {
    /// Build a mount projection straight from a parsed NZB. RAR-only
    /// payloads come out as `requires_extraction`.
    pub fn from_nzb(id: &str, nzb: &ParsedNzb) -> Self {
        let status = if nzb.is_rar_only() {
            MountStatus::RequiresExtraction
        } else {
            MountStatus::Ready
        };
        Self {
            id: id.to_string(),
            nzb_hash: nzb.hash.clone(),
            status,
            media_files: nzb.media_files.clone(),
        }
    }
}

/// External mount registry
#[async_trait]
pub trait MountManager: Send + Sync {
    async fn get_mount(&self, id: &str) -> Option<MountInfo>;

    /// Refresh the mount's last-used marker
    async fn touch_mount(&self, id: &str);
}

/// Extraction collaborator hook: removes a mount's temp files
#[async_trait]
pub trait MountJanitor: Send + Sync {
    async fn cleanup(&self, mount_id: &str);
}

/// In-memory mount registry; deployments and tests populate it directly
#[derive(Default)]
pub struct MountRegistry {
    mounts: Mutex<HashMap<String, MountInfo>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, mount: MountInfo) {
        self.mounts.lock().insert(mount.id.clone(), mount);
    }

    pub fn remove(&self, id: &str) {
        self.mounts.lock().remove(id);
    }
}

#[async_trait]
impl MountManager for MountRegistry {
    async fn get_mount(&self, id: &str) -> Option<MountInfo> {
        self.mounts.lock().get(id).cloned()
    }

    async fn touch_mount(&self, _id: &str) {}
}

struct CachedStore {
    store: Arc<SegmentStore>,
    cached_at: Instant,
}

/// A prepared stream plus the response metadata the HTTP surface needs
pub struct UsenetStreamResponse {
    pub stream: GuardedStream,
    /// The satisfied range; `None` means the whole file (200, not 206)
    pub range: Option<ByteRange>,
    pub total_size: u64,
    pub file_name: String,
    pub pattern: AccessPatternHandle,
}

impl std::fmt::Debug for UsenetStreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsenetStreamResponse")
            .field("range", &self.range)
            .field("total_size", &self.total_size)
            .field("file_name", &self.file_name)
            .finish()
    }
}

/// Facade over mounts, segment stores, and the NNTP manager
pub struct UsenetStreamService {
    mounts: Arc<dyn MountManager>,
    nntp: Arc<NntpManager>,
    stores: Mutex<HashMap<(String, usize), CachedStore>>,
    active: Arc<Mutex<HashMap<String, usize>>>,
    janitor: Option<Arc<dyn MountJanitor>>,
    prefetch: usize,
}

impl UsenetStreamService {
    pub fn new(mounts: Arc<dyn MountManager>, nntp: Arc<NntpManager>, prefetch: usize) -> Self {
        Self {
            mounts,
            nntp,
            stores: Mutex::new(HashMap::new()),
            active: Arc::new(Mutex::new(HashMap::new())),
            janitor: None,
            prefetch,
        }
    }

    pub fn with_janitor(mut self, janitor: Arc<dyn MountJanitor>) -> Self {
        self.janitor = Some(janitor);
        self
    }

    /// Number of open streams on a mount
    pub fn active_streams(&self, mount_id: &str) -> usize {
        self.active.lock().get(mount_id).copied().unwrap_or(0)
    }

    /// Open a byte stream over one media file of a mount
    pub async fn open_stream(
        &self,
        mount_id: &str,
        file_index: usize,
        range_header: Option<&str>,
    ) -> Result<UsenetStreamResponse, StreamError> {
        let mount = self
            .mounts
            .get_mount(mount_id)
            .await
            .ok_or_else(|| StreamError::NotFound(format!("mount {mount_id}")))?;
        self.mounts.touch_mount(mount_id).await;

        if mount.status == MountStatus::RequiresExtraction {
            return Err(StreamError::RequiresExtraction(format!(
                "mount {mount_id} contains only RAR archives and cannot be streamed directly"
            )));
        }

        let file = mount
            .media_files
            .get(file_index)
            .cloned()
            .ok_or_else(|| {
                StreamError::NotFound(format!("file {file_index} in mount {mount_id}"))
            })?;

        let store = self.store_for(mount_id, file_index, &file);
        let total_size = store.total_size();

        let range = match range_header {
            Some(header) => Some(parse_range_header(header, total_size).map_err(|e| match e {
                RangeError::Malformed(_) | RangeError::Unsatisfiable { .. } => {
                    StreamError::RangeNotSatisfiable { total: total_size }
                }
            })?),
            None => None,
        };

        let effective = match range {
            Some(r) => r,
            None => ByteRange::full(total_size).ok_or(StreamError::RangeNotSatisfiable {
                total: total_size,
            })?,
        };

        let guard = self.begin_stream(mount_id);
        let pattern = AccessPatternHandle::default();
        let inner = stream_range(
            store,
            self.nntp.clone(),
            effective,
            self.prefetch,
            pattern.clone(),
        );

        info!(
            mount_id = %mount_id,
            file = %file.filename,
            start = effective.start,
            end = effective.end,
            total = total_size,
            "Usenet stream opened"
        );

        Ok(UsenetStreamResponse {
            stream: GuardedStream {
                inner,
                _guard: guard,
            },
            range,
            total_size,
            file_name: file.filename,
            pattern,
        })
    }

    fn store_for(
        &self,
        mount_id: &str,
        file_index: usize,
        file: &NzbFileEntry,
    ) -> Arc<SegmentStore> {
        let key = (mount_id.to_string(), file_index);
        let mut stores = self.stores.lock();
        let now = Instant::now();

        stores.retain(|_, cached| now.duration_since(cached.cached_at) < MOUNT_CACHE_TTL);

        if let Some(cached) = stores.get(&key) {
            return cached.store.clone();
        }

        let store = Arc::new(SegmentStore::new(file));
        stores.insert(
            key,
            CachedStore {
                store: store.clone(),
                cached_at: now,
            },
        );
        store
    }

    fn begin_stream(&self, mount_id: &str) -> StreamGuard {
        let mut active = self.active.lock();
        *active.entry(mount_id.to_string()).or_insert(0) += 1;
        StreamGuard {
            mount_id: mount_id.to_string(),
            active: self.active.clone(),
            janitor: self.janitor.clone(),
        }
    }
}

/// Decrements the per-mount stream count on drop; when the last stream on
/// a mount closes, schedules the delayed extraction cleanup.
struct StreamGuard {
    mount_id: String,
    active: Arc<Mutex<HashMap<String, usize>>>,
    janitor: Option<Arc<dyn MountJanitor>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        let now_zero = match active.get_mut(&self.mount_id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => false,
        };
        if !now_zero {
            return;
        }
        active.remove(&self.mount_id);
        drop(active);

        debug!(mount_id = %self.mount_id, "Last stream closed, scheduling cleanup");
        let mount_id = self.mount_id.clone();
        let counts = self.active.clone();
        let janitor = self.janitor.clone();
        tokio::spawn(async move {
            tokio::time::sleep(STREAM_CLEANUP_DELAY).await;
            if counts.lock().get(&mount_id).copied().unwrap_or(0) > 0 {
                return;
            }
            if let Some(janitor) = janitor {
                info!(mount_id = %mount_id, "Cleaning up mount temp files");
                janitor.cleanup(&mount_id).await;
            }
        });
    }
}

/// Byte stream that keeps its mount's stream count alive until dropped
pub struct GuardedStream {
    inner: ReceiverStream<Result<Bytes, StreamError>>,
    _guard: StreamGuard,
}

impl Stream for GuardedStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
