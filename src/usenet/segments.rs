//! Per-file segment store
//!
//! Tracks, for every yEnc segment of a streamed file, the poster-declared
//! estimated size and the authoritative actual size once decoded. Byte
//! offsets blend both: actual sizes where known, estimates otherwise, so
//! range requests can be positioned before a single byte has been fetched.
//! Decoded segment payloads sit in a small LRU keyed by segment index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::nzb::NzbFileEntry;

/// Cached decoded segments per file
const SEGMENT_CACHE_CAPACITY: usize = 30;
/// Cached segment TTL
const SEGMENT_CACHE_TTL: Duration = Duration::from_secs(120);

/// Size/offset bookkeeping for one segment. Transitions monotonically from
/// estimated-only to actual once decoded; never reverts.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentDecodeInfo {
    pub estimated_size: u64,
    pub actual_size: Option<u64>,
    pub estimated_offset: u64,
    pub actual_offset: Option<u64>,
}

/// Position of a byte offset within the segment sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentLocation {
    pub segment_index: usize,
    pub offset_in_segment: u64,
}

struct CachedSegment {
    data: Arc<Vec<u8>>,
    access_count: u64,
    cached_at: Instant,
    last_access: Instant,
}

struct StoreState {
    segments: Vec<SegmentDecodeInfo>,
    message_ids: Vec<String>,
}

/// Segment bookkeeping and payload cache for one streamed file
pub struct SegmentStore {
    state: Mutex<StoreState>,
    cache: Mutex<HashMap<usize, CachedSegment>>,
}

impl SegmentStore {
    pub fn new(file: &NzbFileEntry) -> Self {
        let mut segments = Vec::with_capacity(file.segments.len());
        let mut message_ids = Vec::with_capacity(file.segments.len());
        let mut offset = 0u64;

        for segment in &file.segments {
            segments.push(SegmentDecodeInfo {
                estimated_size: segment.bytes,
                actual_size: None,
                estimated_offset: offset,
                actual_offset: None,
            });
            message_ids.push(segment.message_id.clone());
            offset += segment.bytes;
        }

        Self {
            state: Mutex::new(StoreState {
                segments,
                message_ids,
            }),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn message_id(&self, index: usize) -> Option<String> {
        self.state.lock().message_ids.get(index).cloned()
    }

    pub fn segment_info(&self, index: usize) -> Option<SegmentDecodeInfo> {
        self.state.lock().segments.get(index).cloned()
    }

    /// Locate a byte offset using actual sizes where known, estimates
    /// otherwise. `None` when past the end of the file.
    pub fn find_segment_for_offset(&self, byte_offset: u64) -> Option<SegmentLocation> {
        let state = self.state.lock();
        let mut cursor = 0u64;
        for (index, segment) in state.segments.iter().enumerate() {
            let size = segment.actual_size.unwrap_or(segment.estimated_size);
            if byte_offset < cursor + size {
                return Some(SegmentLocation {
                    segment_index: index,
                    offset_in_segment: byte_offset - cursor,
                });
            }
            cursor += size;
        }
        None
    }

    /// Record a segment's decoded size. Idempotent: once set, the actual
    /// size is authoritative and later calls are ignored. Actual offsets
    /// materialize for every prefix of segments whose sizes are all known.
    pub fn update_decoded_size(&self, index: usize, actual_size: u64) {
        let mut state = self.state.lock();
        let Some(segment) = state.segments.get_mut(index) else {
            return;
        };
        if segment.actual_size.is_some() {
            return;
        }
        segment.actual_size = Some(actual_size);

        let mut offset = 0u64;
        for segment in state.segments.iter_mut() {
            match segment.actual_size {
                Some(size) => {
                    segment.actual_offset = Some(offset);
                    offset += size;
                }
                None => break,
            }
        }

        debug!(segment = index, actual_size = actual_size, "Segment size reconciled");
    }

    /// Total file size: exact once every segment is decoded, blended until
    /// then.
    pub fn total_size(&self) -> u64 {
        let state = self.state.lock();
        state
            .segments
            .iter()
            .map(|s| s.actual_size.unwrap_or(s.estimated_size))
            .sum()
    }

    /// Whether `total_size` is exact
    pub fn is_exact(&self) -> bool {
        self.state.lock().segments.iter().all(|s| s.actual_size.is_some())
    }

    /// Cache a decoded segment and feed its size back into the store
    pub fn cache_segment(&self, index: usize, data: Arc<Vec<u8>>) {
        self.update_decoded_size(index, data.len() as u64);

        let mut cache = self.cache.lock();
        let now = Instant::now();

        if !cache.contains_key(&index) && cache.len() >= SEGMENT_CACHE_CAPACITY {
            // Evict by access count, then by age
            let victim = cache
                .iter()
                .min_by(|(_, a), (_, b)| {
                    a.access_count
                        .cmp(&b.access_count)
                        .then(a.last_access.cmp(&b.last_access))
                })
                .map(|(k, _)| *k);
            if let Some(victim) = victim {
                cache.remove(&victim);
            }
        }

        cache.insert(
            index,
            CachedSegment {
                data,
                access_count: 0,
                cached_at: now,
                last_access: now,
            },
        );
    }

    pub fn get_cached(&self, index: usize) -> Option<Arc<Vec<u8>>> {
        let mut cache = self.cache.lock();
        let now = Instant::now();
        match cache.get_mut(&index) {
            Some(entry) if now.duration_since(entry.cached_at) < SEGMENT_CACHE_TTL => {
                entry.access_count += 1;
                entry.last_access = now;
                Some(entry.data.clone())
            }
            Some(_) => {
                cache.remove(&index);
                None
            }
            None => None,
        }
    }

    /// Discard cached segments outside `[center-window, center+window]`;
    /// random access keeps cache retention narrow.
    pub fn invalidate_outside_window(&self, center: usize, window: usize) {
        let lo = center.saturating_sub(window);
        let hi = center.saturating_add(window);
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|&index, _| index >= lo && index <= hi);
        let removed = before - cache.len();
        if removed > 0 {
            debug!(center = center, window = window, removed = removed, "Segment cache narrowed");
        }
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }
}
