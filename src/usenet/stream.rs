//! Range-seekable usenet streaming
//!
//! Emits bytes for exactly one requested range of a virtual file whose
//! backing segments are fetched on demand from the NNTP manager, decoded,
//! and cached. The reader is a cooperative single task; prefetch of
//! upcoming segments happens in the background and is best-effort.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::StreamError;

use super::nntp::{NntpError, NntpManager};
use super::range::ByteRange;
use super::segments::SegmentStore;

/// How a consumer is reading the stream; shifts prefetch and cache policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPattern {
    Sequential,
    Random,
    Idle,
}

/// Shared, switchable access-pattern hint
#[derive(Clone)]
pub struct AccessPatternHandle {
    inner: Arc<Mutex<AccessPattern>>,
}

impl AccessPatternHandle {
    pub fn new(initial: AccessPattern) -> Self {
        Self {
            inner: Arc::new(Mutex::new(initial)),
        }
    }

    pub fn set(&self, pattern: AccessPattern) {
        *self.inner.lock() = pattern;
    }

    pub fn get(&self) -> AccessPattern {
        *self.inner.lock()
    }
}

impl Default for AccessPatternHandle {
    fn default() -> Self {
        Self::new(AccessPattern::Sequential)
    }
}

fn map_nntp_error(e: NntpError) -> StreamError {
    match e {
        NntpError::ArticleNotFound(details) => StreamError::NotFound(details),
        other => StreamError::Upstream(other.to_string()),
    }
}

/// Fetch a segment through the cache, decoding and reconciling its size
async fn ensure_segment(
    store: &SegmentStore,
    manager: &NntpManager,
    index: usize,
) -> Result<Arc<Vec<u8>>, StreamError> {
    if let Some(data) = store.get_cached(index) {
        return Ok(data);
    }

    let message_id = store
        .message_id(index)
        .ok_or_else(|| StreamError::Upstream(format!("segment {index} out of range")))?;

    let decoded = manager
        .get_decoded_article(&message_id)
        .await
        .map_err(map_nntp_error)?;

    let data = Arc::new(decoded.data.clone());
    store.cache_segment(index, data.clone());
    Ok(data)
}

/// Spawn background fetches for the next few segments, never past
/// `last_index` (the final segment the range touches). Errors are ignored;
/// the foreground read will retry and surface them.
fn spawn_prefetch(
    store: &Arc<SegmentStore>,
    manager: &Arc<NntpManager>,
    from_index: usize,
    window: usize,
    last_index: usize,
) {
    for index in from_index..from_index.saturating_add(window) {
        if index > last_index || index >= store.segment_count() {
            break;
        }
        if store.get_cached(index).is_some() {
            continue;
        }
        let store = store.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = ensure_segment(&store, &manager, index).await {
                debug!(segment = index, error = %e, "Prefetch failed");
            }
        });
    }
}

/// Stream exactly the bytes of `range` from the segmented file.
///
/// The task ends when the range is fully emitted, the client cancels, or a
/// segment fetch fails terminally.
pub fn stream_range(
    store: Arc<SegmentStore>,
    manager: Arc<NntpManager>,
    range: ByteRange,
    prefetch: usize,
    pattern: AccessPatternHandle,
) -> ReceiverStream<Result<Bytes, StreamError>> {
    let (tx, rx) = mpsc::channel::<Result<Bytes, StreamError>>(8);

    tokio::spawn(async move {
        let Some(start) = store.find_segment_for_offset(range.start) else {
            let _ = tx
                .send(Err(StreamError::Upstream(format!(
                    "offset {} beyond known file size",
                    range.start
                ))))
                .await;
            return;
        };

        let mut segment_index = start.segment_index;
        let mut offset_in_segment = start.offset_in_segment;
        let mut remaining = range.len();

        while remaining > 0 {
            if segment_index >= store.segment_count() {
                let _ = tx
                    .send(Err(StreamError::Upstream(
                        "range extends past the last segment".to_string(),
                    )))
                    .await;
                return;
            }

            let data = match ensure_segment(&store, &manager, segment_index).await {
                Ok(data) => data,
                Err(e) => {
                    warn!(segment = segment_index, error = %e, "Segment fetch failed");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            // Estimated offsets can overshoot a segment that decoded
            // smaller than advertised; carry the surplus forward
            if offset_in_segment >= data.len() as u64 {
                offset_in_segment -= data.len() as u64;
                segment_index += 1;
                continue;
            }

            let available = data.len() as u64 - offset_in_segment;
            let take = available.min(remaining) as usize;
            let from = offset_in_segment as usize;
            let chunk = Bytes::copy_from_slice(&data[from..from + take]);

            if tx.send(Ok(chunk)).await.is_err() {
                return;
            }
            remaining -= take as u64;
            segment_index += 1;
            offset_in_segment = 0;

            // Last segment the range touches under the current size map
            let last_index = store
                .find_segment_for_offset(range.end)
                .map(|loc| loc.segment_index)
                .unwrap_or_else(|| store.segment_count().saturating_sub(1));

            match pattern.get() {
                AccessPattern::Sequential => {
                    spawn_prefetch(&store, &manager, segment_index, prefetch, last_index);
                }
                AccessPattern::Random => {
                    store.invalidate_outside_window(segment_index, prefetch.max(1));
                    spawn_prefetch(&store, &manager, segment_index, 1, last_index);
                }
                AccessPattern::Idle => {}
            }
        }
    });

    ReceiverStream::new(rx)
}
