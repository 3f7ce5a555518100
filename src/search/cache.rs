//! Search-result caching
//!
//! Results are memoized under a fingerprint of the normalized criteria so
//! semantically equivalent searches collide. Entries expire on TTL, the map
//! is LRU-bounded, and a sweeper task clears expired entries without ever
//! holding the map across I/O.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::indexer::{ReleaseResult, SearchCriteria, SearchType};

/// Bumping this invalidates every previously stored fingerprint
const CACHE_VERSION: u32 = 2;

/// Sweep interval for expired entries
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Stable fingerprint over a normalized view of the criteria.
///
/// Fields are serialized in a fixed order and absent fields are omitted
/// entirely, so criteria differing only in field order or in unset fields
/// produce the same fingerprint. SHA-256 truncated to 128 bits.
pub fn fingerprint(criteria: &SearchCriteria) -> String {
    let mut canon = format!("{{_v:{CACHE_VERSION},type:{}", criteria.search_type);

    if let Some(q) = criteria.query.as_deref() {
        let q = q.trim().to_lowercase();
        if !q.is_empty() {
            canon.push_str(&format!(",q:{q}"));
        }
    }

    let mut categories = criteria.categories.clone();
    categories.sort_unstable();
    if !categories.is_empty() {
        let joined = categories
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        canon.push_str(&format!(",c:{joined}"));
    }

    let mut indexers = criteria.indexer_ids.clone();
    indexers.sort_unstable();
    if !indexers.is_empty() {
        canon.push_str(&format!(",i:{}", indexers.join(",")));
    }

    match criteria.search_type {
        SearchType::Movie => {
            push_opt(&mut canon, "imdb", criteria.imdb_id.as_deref());
            push_opt_num(&mut canon, "tmdb", criteria.tmdb_id);
            push_opt_num(&mut canon, "year", criteria.year.map(|y| y as i64));
        }
        SearchType::Tv => {
            push_opt(&mut canon, "imdb", criteria.imdb_id.as_deref());
            push_opt_num(&mut canon, "tmdb", criteria.tmdb_id);
            push_opt_num(&mut canon, "tvdb", criteria.tvdb_id);
            push_opt_num(&mut canon, "s", criteria.season.map(|s| s as i64));
            push_opt_num(&mut canon, "e", criteria.episode.map(|e| e as i64));
        }
        SearchType::Music => {
            push_opt(&mut canon, "artist", criteria.artist.as_deref());
            push_opt(&mut canon, "album", criteria.album.as_deref());
        }
        SearchType::Book => {
            push_opt(&mut canon, "author", criteria.author.as_deref());
            push_opt(&mut canon, "title", criteria.book_title.as_deref());
        }
        SearchType::Basic => {}
    }
    canon.push('}');

    let digest = Sha256::digest(canon.as_bytes());
    // 128 bits is plenty for a cache key
    hex_lower(&digest[..16])
}

fn push_opt(canon: &mut String, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        canon.push_str(&format!(",{key}:{}", v.trim().to_lowercase()));
    }
}

fn push_opt_num(canon: &mut String, key: &str, value: Option<i64>) {
    if let Some(v) = value {
        canon.push_str(&format!(",{key}:{v}"));
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

struct CacheEntry {
    releases: Vec<ReleaseResult>,
    expires_at: Instant,
    last_access: Instant,
}

struct CacheInner {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    capacity: usize,
}

/// Memoizes search results by criteria fingerprint
pub struct ReleaseCache {
    inner: Arc<CacheInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl ReleaseCache {
    /// Create a cache with a background sweeper task. Must be called from
    /// within a tokio runtime.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let inner = Arc::new(CacheInner {
            entries: Mutex::new(HashMap::new()),
            ttl,
            capacity,
        });

        let sweep_target = Arc::downgrade(&inner);
        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = sweep_target.upgrade() else {
                    break;
                };
                let now = Instant::now();
                let mut entries = inner.entries.lock();
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                let removed = before - entries.len();
                drop(entries);
                if removed > 0 {
                    debug!(removed = removed, "Release cache sweep");
                }
            }
        });

        Self {
            inner,
            sweeper: Some(sweeper),
        }
    }

    /// A cache without the sweeper; expiry still happens lazily on read
    #[cfg(test)]
    pub fn without_sweeper(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                ttl,
                capacity,
            }),
            sweeper: None,
        }
    }

    /// Look up a fingerprint; refreshes LRU position, deletes expired
    /// entries lazily
    pub fn get(&self, fingerprint: &str) -> Option<Vec<ReleaseResult>> {
        let mut entries = self.inner.entries.lock();
        let now = Instant::now();

        match entries.get_mut(fingerprint) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = now;
                Some(entry.releases.clone())
            }
            Some(_) => {
                entries.remove(fingerprint);
                None
            }
            None => None,
        }
    }

    /// Store results under a fingerprint, evicting the least recently used
    /// entry when at capacity
    pub fn insert(&self, fingerprint: String, releases: Vec<ReleaseResult>) {
        let mut entries = self.inner.entries.lock();
        let now = Instant::now();

        if !entries.contains_key(&fingerprint) && entries.len() >= self.inner.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            fingerprint,
            CacheEntry {
                releases,
                expires_at: now + self.inner.ttl,
                last_access: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

impl Drop for ReleaseCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::SearchSource;

    fn release(title: &str) -> ReleaseResult {
        ReleaseResult::new(title, title, "idx", "idx")
    }

    #[test]
    fn equivalent_criteria_collide() {
        let a = SearchCriteria {
            search_type: SearchType::Tv,
            query: Some("  My Show ".to_string()),
            categories: vec![5040, 5000],
            season: Some(1),
            episode: Some(5),
            ..Default::default()
        };
        let b = SearchCriteria {
            search_type: SearchType::Tv,
            query: Some("my show".to_string()),
            categories: vec![5000, 5040],
            season: Some(1),
            episode: Some(5),
            // Fields that never enter the fingerprint
            search_source: SearchSource::Automatic,
            preferred_episode_format: Some(crate::indexer::SearchTextFormat::European),
            ..Default::default()
        };
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn different_criteria_diverge() {
        let base = SearchCriteria::tv("show").with_season_episode(1, Some(5));
        let other_ep = SearchCriteria::tv("show").with_season_episode(1, Some(6));
        let with_id = SearchCriteria::tv("show")
            .with_season_episode(1, Some(5))
            .with_tvdb(42);
        assert_ne!(fingerprint(&base), fingerprint(&other_ep));
        assert_ne!(fingerprint(&base), fingerprint(&with_id));
    }

    #[test]
    fn absent_fields_are_omitted_not_nulled() {
        let explicit_none = SearchCriteria {
            search_type: SearchType::Movie,
            query: Some("heat".to_string()),
            year: None,
            ..Default::default()
        };
        let same = SearchCriteria::movie("heat");
        assert_eq!(fingerprint(&explicit_none), fingerprint(&same));
    }

    #[test]
    fn fingerprint_is_128_bit_hex() {
        let fp = fingerprint(&SearchCriteria::basic("x"));
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn get_refreshes_and_expiry_deletes() {
        let cache = ReleaseCache::without_sweeper(Duration::from_millis(10), 10);
        cache.insert("fp".to_string(), vec![release("a")]);
        assert!(cache.get("fp").is_some());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("fp").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn lru_eviction_at_capacity() {
        let cache = ReleaseCache::without_sweeper(Duration::from_secs(60), 2);
        cache.insert("a".to_string(), vec![release("a")]);
        std::thread::sleep(Duration::from_millis(2));
        cache.insert("b".to_string(), vec![release("b")]);
        std::thread::sleep(Duration::from_millis(2));

        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        std::thread::sleep(Duration::from_millis(2));

        cache.insert("c".to_string(), vec![release("c")]);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }
}
