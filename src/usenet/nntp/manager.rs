//! Multi-provider NNTP orchestration
//!
//! Providers are walked in priority order, skipping any in backoff; the
//! first success wins. Decoded articles are cached in a small TTL'd LRU,
//! and concurrent fetches of one message ID collapse into a single wire
//! fetch. A provider's earlier miss is never persisted: every lookup
//! re-walks the provider list fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::NntpProviderConfig;
use crate::usenet::yenc::{YencDecoded, decode_yenc};

use super::NntpError;
use super::pool::NntpPool;

/// Decoded article cache capacity
const ARTICLE_CACHE_CAPACITY: usize = 200;
/// Decoded article cache TTL
const ARTICLE_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedArticle {
    article: Arc<YencDecoded>,
    cached_at: Instant,
    last_access: Instant,
}

/// Orchestrates article fetches across an ordered set of NNTP providers
pub struct NntpManager {
    /// Pools ordered by priority ascending
    pools: Vec<Arc<NntpPool>>,
    article_cache: Mutex<HashMap<String, CachedArticle>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<Arc<YencDecoded>>>>>,
    strict_crc: bool,
}

impl NntpManager {
    pub fn new(providers: Vec<NntpProviderConfig>, strict_crc: bool) -> Self {
        let mut providers = providers;
        providers.sort_by_key(|p| p.priority);
        let pools: Vec<Arc<NntpPool>> = providers.into_iter().map(NntpPool::new).collect();

        info!(providers = pools.len(), "NNTP manager initialized");

        Self {
            pools,
            article_cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            strict_crc,
        }
    }

    pub fn pools(&self) -> &[Arc<NntpPool>] {
        &self.pools
    }

    /// Fetch and decode an article. Repeats answer from the cache;
    /// concurrent callers for one message ID share a single wire fetch.
    pub async fn get_decoded_article(
        &self,
        message_id: &str,
    ) -> Result<Arc<YencDecoded>, NntpError> {
        if let Some(article) = self.cache_get(message_id) {
            return Ok(article);
        }

        let cell = {
            let mut in_flight = self.in_flight.lock();
            in_flight
                .entry(message_id.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                let raw = self.fetch_article_from_providers(message_id).await?;
                let decoded = decode_yenc(&raw, self.strict_crc)
                    .map_err(|e| NntpError::Protocol(format!("yEnc decode failed: {e}")))?;
                Ok::<_, NntpError>(Arc::new(decoded))
            })
            .await
            .cloned();

        self.in_flight.lock().remove(message_id);

        if let Ok(ref article) = result {
            self.cache_put(message_id, article.clone());
        }

        result
    }

    /// Walk providers in priority order, skipping those in backoff, and
    /// return the first successful body.
    pub async fn fetch_article_from_providers(
        &self,
        message_id: &str,
    ) -> Result<Vec<u8>, NntpError> {
        let mut errors: Vec<String> = Vec::new();
        let mut skipped = 0usize;

        for pool in &self.pools {
            if pool.in_backoff() {
                debug!(host = pool.host(), "Skipping provider in backoff");
                skipped += 1;
                continue;
            }

            match pool.get_body(message_id).await {
                Ok(body) => {
                    debug!(
                        host = pool.host(),
                        message_id = message_id,
                        bytes = body.len(),
                        "Article fetched"
                    );
                    return Ok(body);
                }
                Err(e) => {
                    warn!(
                        host = pool.host(),
                        message_id = message_id,
                        error = %e,
                        "Provider failed for article"
                    );
                    errors.push(format!("{}: {e}", pool.host()));
                }
            }
        }

        let mut details = format!(
            "{message_id}: tried {} providers ({} skipped in backoff)",
            errors.len(),
            skipped
        );
        if !errors.is_empty() {
            details.push_str(": ");
            details.push_str(&errors.join("; "));
        }
        Err(NntpError::ArticleNotFound(details))
    }

    /// Close every pool; queued requests reject with `Pool is closing`
    pub async fn close(&self) {
        for pool in &self.pools {
            pool.close().await;
        }
    }

    fn cache_get(&self, message_id: &str) -> Option<Arc<YencDecoded>> {
        let mut cache = self.article_cache.lock();
        let now = Instant::now();
        match cache.get_mut(message_id) {
            Some(entry) if now.duration_since(entry.cached_at) < ARTICLE_CACHE_TTL => {
                entry.last_access = now;
                Some(entry.article.clone())
            }
            Some(_) => {
                cache.remove(message_id);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, message_id: &str, article: Arc<YencDecoded>) {
        let mut cache = self.article_cache.lock();
        let now = Instant::now();

        if !cache.contains_key(message_id) && cache.len() >= ARTICLE_CACHE_CAPACITY {
            let oldest = cache
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                cache.remove(&oldest);
            }
        }

        cache.insert(
            message_id.to_string(),
            CachedArticle {
                article,
                cached_at: now,
                last_access: now,
            },
        );
    }
}

impl std::fmt::Debug for NntpManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpManager")
            .field("providers", &self.pools.len())
            .field("cached_articles", &self.article_cache.lock().len())
            .finish()
    }
}
