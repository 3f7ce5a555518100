//! Release deduplication
//!
//! Releases advertised by several indexers collapse to one canonical entry.
//! The key prefers content addressing (info hash), then the opaque
//! streaming guid, then a normalized title. The winning entry accumulates
//! every source indexer name across its duplicates.

use std::collections::HashMap;
use std::collections::VecDeque;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::indexer::{DownloadProtocol, ReleaseResult};

use super::enrichment::EnhancedReleaseResult;

/// Capacity of the normalized-title memo
const NORMALIZE_CACHE_CAPACITY: usize = 5000;

static BRACKETED_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").unwrap());

static QUALITY_TOKENS: Lazy<Regex> = Lazy::new(|| {
    // "hdr10+" loses its "+" to the non-alnum collapse afterwards
    Regex::new(r"(?i)\b(720p|1080p|2160p|4k|uhd|hdr10|hdr|dolby|dts(-hd|-x)?|atmos|truehd)\b")
        .unwrap()
});

static CODEC_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(x264|x265|h264|h265|hevc|avc|xvid|divx|av1|vp9)\b").unwrap()
});

static SOURCE_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(bluray|blu-ray|bdrip|brrip|webrip|web-rip|webdl|web-dl|hdtv|dvdrip|hdrip|remux|dvdscr|screener|cam|ts|telesync|hdcam)\b",
    )
    .unwrap()
});

static TRAILING_GROUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"-[A-Za-z0-9]+$").unwrap());

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Title normalizer with an insertion-order LRU memo amortizing regex cost
pub struct TitleNormalizer {
    cache: Mutex<NormalizeCache>,
}

struct NormalizeCache {
    map: HashMap<String, String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TitleNormalizer {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(NormalizeCache {
                map: HashMap::new(),
                order: VecDeque::new(),
                capacity: NORMALIZE_CACHE_CAPACITY,
            }),
        }
    }

    /// Normalize a release title for duplicate keying
    pub fn normalize(&self, title: &str) -> String {
        {
            let cache = self.cache.lock();
            if let Some(hit) = cache.map.get(title) {
                return hit.clone();
            }
        }

        let normalized = normalize_uncached(title);

        let mut cache = self.cache.lock();
        if !cache.map.contains_key(title) {
            if cache.map.len() >= cache.capacity {
                if let Some(oldest) = cache.order.pop_front() {
                    cache.map.remove(&oldest);
                }
            }
            cache.map.insert(title.to_string(), normalized.clone());
            cache.order.push_back(title.to_string());
        }

        normalized
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.lock().map.len()
    }
}

impl Default for TitleNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_uncached(title: &str) -> String {
    let lowered = title.to_lowercase();
    let stripped = BRACKETED_TAGS.replace_all(&lowered, " ");
    let stripped = TRAILING_GROUP.replace(stripped.trim(), " ");
    let stripped = QUALITY_TOKENS.replace_all(&stripped, " ");
    let stripped = CODEC_TOKENS.replace_all(&stripped, " ");
    let stripped = SOURCE_TOKENS.replace_all(&stripped, " ");
    let collapsed = NON_ALNUM.replace_all(&stripped, " ");
    collapsed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Duplicate key for a release
fn dedup_key(release: &ReleaseResult, normalizer: &TitleNormalizer) -> String {
    if let Some(ref hash) = release.info_hash {
        return format!("hash:{}", hash.to_lowercase());
    }
    if release.protocol == DownloadProtocol::Streaming {
        return format!("streaming:{}", release.guid);
    }
    format!("title:{}", normalizer.normalize(&release.title))
}

/// Outcome of a dedup pass
#[derive(Debug)]
pub struct DedupOutcome<T> {
    pub releases: Vec<T>,
    pub removed: usize,
}

/// Pre-enrichment preference: seeders desc, size desc, publish date desc.
/// Returns true when `candidate` should replace `current`; ties keep the
/// earlier entry so dedup stays order-stable.
fn prefers(candidate: &ReleaseResult, current: &ReleaseResult) -> bool {
    let seeds = candidate
        .seeders
        .unwrap_or(0)
        .cmp(&current.seeders.unwrap_or(0));
    if seeds != std::cmp::Ordering::Equal {
        return seeds == std::cmp::Ordering::Greater;
    }
    let size = candidate.size.cmp(&current.size);
    if size != std::cmp::Ordering::Equal {
        return size == std::cmp::Ordering::Greater;
    }
    candidate.publish_date > current.publish_date
}

/// Post-enrichment (Radarr-style) preference: fewer rejections, lower
/// indexer priority, then the pre-enrichment rule.
fn prefers_enhanced(candidate: &EnhancedReleaseResult, current: &EnhancedReleaseResult) -> bool {
    let rejections = candidate.rejections.len().cmp(&current.rejections.len());
    if rejections != std::cmp::Ordering::Equal {
        return rejections == std::cmp::Ordering::Less;
    }
    let priority = candidate.indexer_priority.cmp(&current.indexer_priority);
    if priority != std::cmp::Ordering::Equal {
        return priority == std::cmp::Ordering::Less;
    }
    prefers(&candidate.release, &current.release)
}

fn merge_sources(winner: &mut Vec<String>, loser: &[String]) {
    for source in loser {
        if !winner.iter().any(|s| s == source) {
            winner.push(source.clone());
        }
    }
}

/// Deduplicate releases with the pre-enrichment preference rule
pub fn dedup_releases(
    releases: Vec<ReleaseResult>,
    normalizer: &TitleNormalizer,
) -> DedupOutcome<ReleaseResult> {
    let total = releases.len();
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, ReleaseResult> = HashMap::new();

    for release in releases {
        let key = dedup_key(&release, normalizer);
        match by_key.get_mut(&key) {
            None => {
                order.push(key.clone());
                by_key.insert(key, release);
            }
            Some(current) => {
                if prefers(&release, current) {
                    let mut winner = release;
                    let mut sources = std::mem::take(&mut current.source_indexers);
                    merge_sources(&mut sources, &winner.source_indexers);
                    winner.source_indexers = sources;
                    *current = winner;
                } else {
                    let sources = release.source_indexers;
                    merge_sources(&mut current.source_indexers, &sources);
                }
            }
        }
    }

    let releases: Vec<ReleaseResult> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    let removed = total - releases.len();

    DedupOutcome { releases, removed }
}

/// Deduplicate enriched releases with the post-enrichment preference rule
pub fn dedup_enhanced(
    releases: Vec<EnhancedReleaseResult>,
    normalizer: &TitleNormalizer,
) -> DedupOutcome<EnhancedReleaseResult> {
    let total = releases.len();
    let mut order: Vec<String> = Vec::new();
    let mut by_key: HashMap<String, EnhancedReleaseResult> = HashMap::new();

    for enhanced in releases {
        let key = dedup_key(&enhanced.release, normalizer);
        match by_key.get_mut(&key) {
            None => {
                order.push(key.clone());
                by_key.insert(key, enhanced);
            }
            Some(current) => {
                if prefers_enhanced(&enhanced, current) {
                    let mut winner = enhanced;
                    let mut sources = std::mem::take(&mut current.release.source_indexers);
                    merge_sources(&mut sources, &winner.release.source_indexers);
                    winner.release.source_indexers = sources;
                    *current = winner;
                } else {
                    let sources = enhanced.release.source_indexers;
                    merge_sources(&mut current.release.source_indexers, &sources);
                }
            }
        }
    }

    let releases: Vec<EnhancedReleaseResult> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .collect();
    let removed = total - releases.len();

    DedupOutcome { releases, removed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(title: &str, indexer: &str) -> ReleaseResult {
        ReleaseResult::new(title, title, indexer, indexer)
    }

    #[test]
    fn normalization_strips_scene_noise() {
        let n = TitleNormalizer::new();
        assert_eq!(
            n.normalize("My.Show.S01E01.1080p.WEB-DL.x264-GROUP"),
            n.normalize("My Show S01E01 [eztv] 1080p WEBDL x265-OTHER")
        );
        assert_eq!(n.normalize("Film.2160p.BluRay.REMUX.HDR10+.TrueHD.Atmos-XYZ"), "film");
    }

    #[test]
    fn memo_is_bounded_and_hit() {
        let n = TitleNormalizer::new();
        let a = n.normalize("Some.Title.720p");
        let b = n.normalize("Some.Title.720p");
        assert_eq!(a, b);
        assert_eq!(n.cached_len(), 1);
    }

    #[test]
    fn dedup_by_info_hash_case_insensitive_prefers_seeders() {
        let n = TitleNormalizer::new();
        let mut a = release("Release.A.1080p", "indexer-one");
        a.info_hash = Some("AB".to_string());
        a.seeders = Some(5);
        a.size = 100;
        let mut b = release("Release.B.1080p", "indexer-two");
        b.info_hash = Some("ab".to_string());
        b.seeders = Some(12);
        b.size = 90;

        let out = dedup_releases(vec![a, b], &n);
        assert_eq!(out.releases.len(), 1);
        assert_eq!(out.removed, 1);
        let winner = &out.releases[0];
        assert_eq!(winner.seeders, Some(12));
        assert_eq!(
            winner.source_indexers,
            vec!["indexer-one".to_string(), "indexer-two".to_string()]
        );
    }

    #[test]
    fn streaming_releases_key_on_guid() {
        let n = TitleNormalizer::new();
        let mut a = release("Channel One HD", "prov-a");
        a.protocol = DownloadProtocol::Streaming;
        a.guid = "chan-1".to_string();
        let mut b = release("Channel One HD", "prov-b");
        b.protocol = DownloadProtocol::Streaming;
        b.guid = "chan-2".to_string();

        let out = dedup_releases(vec![a, b], &n);
        assert_eq!(out.releases.len(), 2);
        assert_eq!(out.removed, 0);
    }

    #[test]
    fn ties_keep_first_entry() {
        let n = TitleNormalizer::new();
        let mut a = release("Same.Title.1080p.WEB", "first");
        a.seeders = Some(3);
        let mut b = release("Same Title 1080p WEBRip", "second");
        b.seeders = Some(3);

        let out = dedup_releases(vec![a, b], &n);
        assert_eq!(out.releases.len(), 1);
        assert_eq!(out.releases[0].indexer_id, "first");
        assert_eq!(out.releases[0].source_indexers, vec!["first", "second"]);
    }

    #[test]
    fn dedup_returns_subset_and_counts_removed() {
        let n = TitleNormalizer::new();
        let releases: Vec<ReleaseResult> = (0..5)
            .map(|i| release("Identical.Title.720p", &format!("idx-{i}")))
            .collect();
        let total = releases.len();
        let out = dedup_releases(releases, &n);
        assert!(out.releases.len() <= total);
        assert_eq!(total - out.releases.len(), out.removed);
    }
}
