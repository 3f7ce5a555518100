//! Stream URL resolution with failover
//!
//! A lineup item names a primary source and ordered backups; resolution
//! walks them until one yields a playable URL. Auth-shaped errors
//! invalidate the account's client and cached URLs and earn a single retry
//! with fresh credentials; every resolved URL passes SSRF validation before
//! it is cached or returned.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::StreamError;
use crate::net::ssrf;

use super::pool::ClientPool;
use super::provider::{LineupStore, LiveTvProvider, ProviderRegistry, ResolveOutcome};
use super::types::{
    LiveTvAccount, ResolvedStreamUrl, StreamFormat, StreamKind,
};
use super::url_cache::UrlCache;

static AUTH_ERROR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(401|403|token|auth|unauthorized|forbidden)").unwrap());

/// Whether an error message looks like a credential problem
pub fn is_auth_error(message: &str) -> bool {
    AUTH_ERROR.is_match(message)
}

/// Resolves lineup items into upstream stream URLs
pub struct StreamUrlResolver {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn LineupStore>,
    pool: Arc<ClientPool>,
    cache: Arc<UrlCache>,
}

impl StreamUrlResolver {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn LineupStore>,
        pool: Arc<ClientPool>,
        cache: Arc<UrlCache>,
    ) -> Self {
        Self {
            providers,
            store,
            pool,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<UrlCache> {
        &self.cache
    }

    /// Resolve a lineup item to a playable URL, trying backups in order.
    /// `fresh` skips and invalidates the cache first, so single-use tokens
    /// embedded in the URL are actually new.
    pub async fn resolve(
        &self,
        lineup_id: Uuid,
        format: StreamFormat,
        fresh: bool,
    ) -> Result<ResolvedStreamUrl, StreamError> {
        let item = self
            .store
            .get_lineup_item(lineup_id)
            .await
            .ok_or_else(|| StreamError::NotFound(format!("lineup item {lineup_id}")))?;

        let sources = item.sources();
        let attempted = sources.len();
        let mut failures: Vec<String> = Vec::new();

        for (account_id, channel_ref) in sources {
            match self
                .resolve_source(account_id, &channel_ref, format, fresh)
                .await
            {
                Ok(resolved) => {
                    debug!(
                        lineup_id = %lineup_id,
                        account_id = %account_id,
                        kind = ?resolved.kind,
                        "Stream URL resolved"
                    );
                    return Ok(resolved);
                }
                Err(e) if e.is_failover_eligible() => {
                    warn!(
                        lineup_id = %lineup_id,
                        account_id = %account_id,
                        channel_ref = %channel_ref,
                        error = %e,
                        "Source failed, trying next"
                    );
                    failures.push(format!("{account_id}/{channel_ref}: {e}"));
                }
                Err(e) => {
                    warn!(
                        lineup_id = %lineup_id,
                        account_id = %account_id,
                        channel_ref = %channel_ref,
                        error = %e,
                        "Source failed terminally, not trying alternates"
                    );
                    return Err(e);
                }
            }
        }

        Err(StreamError::AllSourcesFailed {
            attempted,
            details: failures.join("; "),
        })
    }

    async fn resolve_source(
        &self,
        account_id: Uuid,
        channel_ref: &str,
        format: StreamFormat,
        fresh: bool,
    ) -> Result<ResolvedStreamUrl, StreamError> {
        let account = self
            .store
            .get_account(account_id)
            .await
            .ok_or_else(|| StreamError::NotFound(format!("account {account_id}")))?;

        let provider = self
            .providers
            .get(account.provider)
            .ok_or_else(|| {
                StreamError::Fatal(format!("no provider registered for {}", account.provider))
            })?;

        if fresh {
            self.cache.invalidate(account_id, channel_ref);
        } else if let Some(hit) = self.cache.get(account_id, channel_ref) {
            debug!(account_id = %account_id, channel_ref = %channel_ref, "Stream URL cache hit");
            return Ok(hit);
        }

        let mut outcome = self
            .resolve_with_session(provider.as_ref(), &account, channel_ref, format)
            .await?;

        // Auth-shaped failures get one retry with fresh credentials
        if !outcome.success {
            let message = outcome.error.clone().unwrap_or_default();
            if is_auth_error(&message) {
                info!(
                    account_id = %account_id,
                    error = %message,
                    "Auth-shaped resolution failure, retrying with fresh credentials"
                );
                self.pool.invalidate(account_id);
                self.cache.invalidate_account(account_id);
                outcome = self
                    .resolve_with_session(provider.as_ref(), &account, channel_ref, format)
                    .await?;
            }
        }

        if !outcome.success {
            return Err(StreamError::Upstream(
                outcome.error.unwrap_or_else(|| "resolution failed".to_string()),
            ));
        }

        let raw_url = outcome
            .url
            .ok_or_else(|| StreamError::Upstream("provider returned no URL".to_string()))?;

        // Shape-level SSRF check here; the DNS-resolving check runs again
        // on every fetch of this URL and of each redirect target
        let parsed = Url::parse(&raw_url)
            .map_err(|e| StreamError::Upstream(format!("provider returned invalid URL: {e}")))?;
        ssrf::validate_url_shape(&parsed)?;

        let kind = match outcome.kind {
            StreamKind::Unknown => ResolvedStreamUrl::infer_kind(&raw_url),
            known => known,
        };

        let resolved = ResolvedStreamUrl {
            url: raw_url,
            kind,
            expires_at: None,
            provider_headers: outcome.headers,
        };

        self.cache.insert(account_id, channel_ref, resolved.clone());
        Ok(resolved)
    }

    async fn resolve_with_session(
        &self,
        provider: &dyn LiveTvProvider,
        account: &LiveTvAccount,
        channel_ref: &str,
        format: StreamFormat,
    ) -> Result<ResolveOutcome, StreamError> {
        let lease = self.pool.session(provider, account).await?;
        Ok(provider
            .resolve_stream_url(account, Some(&lease.session), channel_ref, format)
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::livetv::pool::PortalSession;
    use crate::livetv::provider::{AuthOutcome, ChannelSyncOutcome, ConnectionTest};
    use crate::livetv::types::{LineupBackup, LineupItem, ProviderKind};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedProvider {
        /// channel_ref -> sequence of outcomes
        scripts: Mutex<HashMap<String, Vec<ResolveOutcome>>>,
        resolutions: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new() -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                resolutions: AtomicUsize::new(0),
            }
        }

        fn script(&self, channel: &str, outcomes: Vec<ResolveOutcome>) {
            self.scripts.lock().insert(channel.to_string(), outcomes);
        }
    }

    #[async_trait]
    impl LiveTvProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Stalker
        }

        async fn authenticate(&self, _account: &LiveTvAccount) -> AuthOutcome {
            AuthOutcome {
                success: true,
                token: Some("tok".to_string()),
                token_expiry: None,
                error: None,
            }
        }

        async fn test_connection(&self, _account: &LiveTvAccount) -> ConnectionTest {
            ConnectionTest {
                success: true,
                profile: None,
                error: None,
            }
        }

        async fn sync_channels(&self, _account: &LiveTvAccount) -> ChannelSyncOutcome {
            ChannelSyncOutcome::default()
        }

        async fn resolve_stream_url(
            &self,
            _account: &LiveTvAccount,
            session: Option<&PortalSession>,
            channel_ref: &str,
            _format: StreamFormat,
        ) -> ResolveOutcome {
            assert!(session.is_some(), "resolver must hand providers a session");
            self.resolutions.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(channel_ref) {
                Some(outcomes) if !outcomes.is_empty() => outcomes.remove(0),
                _ => ResolveOutcome::failure("unscripted channel"),
            }
        }
    }

    struct MapStore {
        items: HashMap<Uuid, LineupItem>,
        accounts: HashMap<Uuid, LiveTvAccount>,
    }

    #[async_trait]
    impl LineupStore for MapStore {
        async fn get_lineup_item(&self, id: Uuid) -> Option<LineupItem> {
            self.items.get(&id).cloned()
        }

        async fn get_account(&self, id: Uuid) -> Option<LiveTvAccount> {
            self.accounts.get(&id).cloned()
        }
    }

    fn success_outcome(url: &str) -> ResolveOutcome {
        ResolveOutcome {
            success: true,
            url: Some(url.to_string()),
            kind: StreamKind::Unknown,
            headers: vec![],
            error: None,
        }
    }

    fn setup(
        provider: Arc<ScriptedProvider>,
        backups: Vec<LineupBackup>,
    ) -> (StreamUrlResolver, Uuid, Uuid) {
        let account_id = Uuid::new_v4();
        let lineup_id = Uuid::new_v4();

        let account = LiveTvAccount {
            id: account_id,
            provider: ProviderKind::Stalker,
            portal_url: "http://portal.example".to_string(),
            username: None,
            password: None,
            mac_address: Some("00:1A:79:00:00:01".to_string()),
            enabled: true,
        };

        let mut accounts = HashMap::new();
        accounts.insert(account_id, account);
        for backup in &backups {
            accounts.insert(
                backup.account_id,
                LiveTvAccount {
                    id: backup.account_id,
                    provider: ProviderKind::Stalker,
                    portal_url: "http://portal2.example".to_string(),
                    username: None,
                    password: None,
                    mac_address: None,
                    enabled: true,
                },
            );
        }

        let item = LineupItem {
            id: lineup_id,
            account_id,
            provider: ProviderKind::Stalker,
            channel_ref: "primary".to_string(),
            backups,
        };

        let registry = Arc::new(ProviderRegistry::new());
        registry.register(provider);

        let store = Arc::new(MapStore {
            items: [(lineup_id, item)].into_iter().collect(),
            accounts,
        });

        let resolver = StreamUrlResolver::new(
            registry,
            store,
            Arc::new(ClientPool::new()),
            Arc::new(UrlCache::without_sweeper()),
        );
        (resolver, lineup_id, account_id)
    }

    #[tokio::test]
    async fn resolves_and_caches() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.script(
            "primary",
            vec![success_outcome("http://cdn.example.com/live/1.m3u8")],
        );
        let (resolver, lineup_id, _) = setup(provider.clone(), vec![]);

        let first = resolver
            .resolve(lineup_id, StreamFormat::Hls, false)
            .await
            .unwrap();
        assert_eq!(first.kind, StreamKind::Hls);

        // Second resolve hits the cache: no new provider call
        let _second = resolver
            .resolve(lineup_id, StreamFormat::Hls, false)
            .await
            .unwrap();
        assert_eq!(provider.resolutions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_resolution_skips_cache() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.script(
            "primary",
            vec![
                success_outcome("http://cdn.example.com/live/1.m3u8"),
                success_outcome("http://cdn.example.com/live/2.m3u8"),
            ],
        );
        let (resolver, lineup_id, _) = setup(provider.clone(), vec![]);

        let first = resolver
            .resolve(lineup_id, StreamFormat::Hls, true)
            .await
            .unwrap();
        let second = resolver
            .resolve(lineup_id, StreamFormat::Hls, true)
            .await
            .unwrap();
        assert_ne!(first.url, second.url);
        assert_eq!(provider.resolutions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fails_over_to_backup() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.script("primary", vec![ResolveOutcome::failure("portal timeout")]);
        provider.script(
            "backup-1",
            vec![success_outcome("http://cdn2.example.com/live/9.ts")],
        );
        let backup = LineupBackup {
            priority: 1,
            account_id: Uuid::new_v4(),
            channel_ref: "backup-1".to_string(),
        };
        let (resolver, lineup_id, _) = setup(provider.clone(), vec![backup]);

        let resolved = resolver
            .resolve(lineup_id, StreamFormat::Ts, false)
            .await
            .unwrap();
        assert_eq!(resolved.kind, StreamKind::Direct);
    }

    #[tokio::test]
    async fn auth_error_earns_single_retry() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.script(
            "primary",
            vec![
                ResolveOutcome::failure("403 forbidden: token expired"),
                success_outcome("http://cdn.example.com/live/1.ts"),
            ],
        );
        let (resolver, lineup_id, _) = setup(provider.clone(), vec![]);

        let resolved = resolver
            .resolve(lineup_id, StreamFormat::Ts, false)
            .await
            .unwrap();
        assert_eq!(resolved.url, "http://cdn.example.com/live/1.ts");
        assert_eq!(provider.resolutions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn all_sources_failed_aggregates() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.script("primary", vec![ResolveOutcome::failure("portal down")]);
        let (resolver, lineup_id, _) = setup(provider.clone(), vec![]);

        let err = resolver
            .resolve(lineup_id, StreamFormat::Ts, false)
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("All 1 sources failed:"));
        assert!(message.contains("portal down"));
    }

    #[tokio::test]
    async fn ssrf_blocked_urls_are_terminal_even_with_backups() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.script("primary", vec![success_outcome("http://127.0.0.1/steal")]);
        provider.script(
            "backup-1",
            vec![success_outcome("http://cdn.example.com/live/1.ts")],
        );
        let backup = LineupBackup {
            priority: 1,
            account_id: Uuid::new_v4(),
            channel_ref: "backup-1".to_string(),
        };
        let (resolver, lineup_id, _) = setup(provider.clone(), vec![backup]);

        let err = resolver
            .resolve(lineup_id, StreamFormat::Ts, false)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::StreamError::SsrfBlocked(_)));
        // The backup is never consulted after a validation rejection
        assert_eq!(provider.resolutions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn auth_error_detection() {
        assert!(is_auth_error("HTTP 401"));
        assert!(is_auth_error("Unauthorized"));
        assert!(is_auth_error("token expired"));
        assert!(is_auth_error("Forbidden by portal"));
        assert!(!is_auth_error("connection reset by peer"));
    }
}
