//! Resolved stream URL cache
//!
//! Keyed by `(account, channel)`. Portal-issued URLs are short-lived, so
//! the TTL follows the stream kind (HLS links live longer than direct
//! links) and is further capped by any provider-declared expiry. A sweeper
//! task clears expired entries; auth failures invalidate a whole account.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::types::{ResolvedStreamUrl, StreamKind};

const HLS_TTL: Duration = Duration::from_secs(3600);
const DIRECT_TTL: Duration = Duration::from_secs(1800);
const MAX_ENTRIES: usize = 200;
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct CachedUrl {
    resolved: ResolvedStreamUrl,
    expires_at: Instant,
    last_access: Instant,
}

type Key = (Uuid, String);

struct CacheInner {
    entries: Mutex<HashMap<Key, CachedUrl>>,
}

/// Cache of resolved stream URLs
pub struct UrlCache {
    inner: Arc<CacheInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl UrlCache {
    /// Create the cache and its sweeper task; call inside a tokio runtime
    pub fn new() -> Self {
        let inner = Arc::new(CacheInner {
            entries: Mutex::new(HashMap::new()),
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
                entries.retain(|_, e| e.expires_at > now);
                let removed = before - entries.len();
                drop(entries);
                if removed > 0 {
                    debug!(removed = removed, "Stream URL cache sweep");
                }
            }
        });

        Self {
            inner,
            sweeper: Some(sweeper),
        }
    }

    #[cfg(test)]
    pub fn without_sweeper() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
            }),
            sweeper: None,
        }
    }

    pub fn get(&self, account_id: Uuid, channel_ref: &str) -> Option<ResolvedStreamUrl> {
        let key = (account_id, channel_ref.to_string());
        let mut entries = self.inner.entries.lock();
        let now = Instant::now();
        match entries.get_mut(&key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = now;
                Some(entry.resolved.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, account_id: Uuid, channel_ref: &str, resolved: ResolvedStreamUrl) {
        let now = Instant::now();
        let ttl = match resolved.kind {
            StreamKind::Hls => HLS_TTL,
            StreamKind::Direct => DIRECT_TTL,
            StreamKind::Unknown => DIRECT_TTL,
        };
        let mut expires_at = now + ttl;
        if let Some(provider_expiry) = resolved.expires_at {
            expires_at = expires_at.min(provider_expiry);
        }

        let key = (account_id, channel_ref.to_string());
        let mut entries = self.inner.entries.lock();

        if !entries.contains_key(&key) && entries.len() >= MAX_ENTRIES {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CachedUrl {
                resolved,
                expires_at,
                last_access: now,
            },
        );
    }

    /// Drop one channel's cached URL (used before token-consuming refreshes)
    pub fn invalidate(&self, account_id: Uuid, channel_ref: &str) {
        self.inner
            .entries
            .lock()
            .remove(&(account_id, channel_ref.to_string()));
    }

    /// Drop everything cached for an account (after auth failures)
    pub fn invalidate_account(&self, account_id: Uuid) {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|(acct, _), _| *acct != account_id);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(account_id = %account_id, removed = removed, "Account URLs invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for UrlCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for UrlCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}
