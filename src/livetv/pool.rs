//! Per-account portal client pool
//!
//! Each account holds one authenticated session (token plus auth instant)
//! and an in-use count of concurrent resolutions. A pending-auth map
//! guarantees at most one handshake per account is in flight; concurrent
//! callers wait on the same lock and reuse the fresh token. Tokens are
//! force-refreshed after `TOKEN_REFRESH` regardless of provider expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StreamError;

use super::provider::LiveTvProvider;
use super::types::LiveTvAccount;

const MAX_AUTH_RETRIES: u32 = 3;
const AUTH_RETRY_DELAY: Duration = Duration::from_millis(1000);
const TOKEN_REFRESH: Duration = Duration::from_secs(3600);

/// An authenticated portal session handed to providers
#[derive(Debug, Clone)]
pub struct PortalSession {
    pub token: Option<String>,
    pub authed_at: Instant,
}

struct ClientEntry {
    session: PortalSession,
    in_use: usize,
    last_auth_at: Instant,
}

/// Pool of per-account portal clients
pub struct ClientPool {
    clients: Mutex<HashMap<Uuid, ClientEntry>>,
    /// Per-account handshake locks; at most one auth in flight per account
    pending_auth: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            pending_auth: Mutex::new(HashMap::new()),
        }
    }

    /// Get a session for the account, authenticating if absent or stale.
    /// The returned lease decrements the in-use count on drop.
    pub async fn session(
        self: &Arc<Self>,
        provider: &dyn LiveTvProvider,
        account: &LiveTvAccount,
    ) -> Result<SessionLease, StreamError> {
        if !account.enabled {
            return Err(StreamError::Fatal(format!(
                "account {} is disabled",
                account.id
            )));
        }

        if let Some(lease) = self.try_lease(account.id) {
            return Ok(lease);
        }

        let auth_lock = {
            let mut pending = self.pending_auth.lock();
            pending
                .entry(account.id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = auth_lock.lock().await;

        // Another caller may have finished the handshake while we waited
        if let Some(lease) = self.try_lease(account.id) {
            return Ok(lease);
        }

        let session = self.authenticate_with_retries(provider, account).await?;

        self.clients.lock().insert(
            account.id,
            ClientEntry {
                session: session.clone(),
                in_use: 1,
                last_auth_at: Instant::now(),
            },
        );

        Ok(SessionLease {
            pool: self.clone(),
            account_id: account.id,
            session,
        })
    }

    /// Drop the account's session so the next request re-authenticates
    pub fn invalidate(&self, account_id: Uuid) {
        if self.clients.lock().remove(&account_id).is_some() {
            info!(account_id = %account_id, "Portal client invalidated");
        }
    }

    /// Number of concurrent users of an account's session
    pub fn in_use(&self, account_id: Uuid) -> usize {
        self.clients
            .lock()
            .get(&account_id)
            .map(|e| e.in_use)
            .unwrap_or(0)
    }

    fn try_lease(self: &Arc<Self>, account_id: Uuid) -> Option<SessionLease> {
        let mut clients = self.clients.lock();
        let entry = clients.get_mut(&account_id)?;
        if entry.last_auth_at.elapsed() >= TOKEN_REFRESH {
            clients.remove(&account_id);
            debug!(account_id = %account_id, "Portal token past refresh age");
            return None;
        }
        entry.in_use += 1;
        Some(SessionLease {
            pool: self.clone(),
            account_id,
            session: entry.session.clone(),
        })
    }

    async fn authenticate_with_retries(
        &self,
        provider: &dyn LiveTvProvider,
        account: &LiveTvAccount,
    ) -> Result<PortalSession, StreamError> {
        let mut last_error = String::new();

        for attempt in 0..MAX_AUTH_RETRIES {
            if attempt > 0 {
                let delay = AUTH_RETRY_DELAY * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            let outcome = provider.authenticate(account).await;
            if outcome.success {
                info!(account_id = %account.id, attempt = attempt + 1, "Portal handshake complete");
                return Ok(PortalSession {
                    token: outcome.token,
                    authed_at: Instant::now(),
                });
            }

            last_error = outcome.error.unwrap_or_else(|| "unknown auth error".to_string());
            warn!(
                account_id = %account.id,
                attempt = attempt + 1,
                error = %last_error,
                "Portal handshake failed"
            );
        }

        Err(StreamError::Upstream(format!(
            "authentication failed after {MAX_AUTH_RETRIES} attempts: {last_error}"
        )))
    }

    fn release(&self, account_id: Uuid) {
        let mut clients = self.clients.lock();
        if let Some(entry) = clients.get_mut(&account_id) {
            entry.in_use = entry.in_use.saturating_sub(1);
        }
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Borrowed session; decrements the account's in-use count when dropped
pub struct SessionLease {
    pool: Arc<ClientPool>,
    account_id: Uuid,
    pub session: PortalSession,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("account_id", &self.account_id)
            .field("session", &self.session)
            .finish()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.pool.release(self.account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::livetv::provider::{AuthOutcome, ChannelSyncOutcome, ConnectionTest, ResolveOutcome};
    use crate::livetv::types::{ProviderKind, StreamFormat};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        auths: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl LiveTvProvider for CountingProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Stalker
        }

        async fn authenticate(&self, _account: &LiveTvAccount) -> AuthOutcome {
            self.auths.fetch_add(1, Ordering::SeqCst);
            // A short pause widens the single-flight window
            tokio::time::sleep(Duration::from_millis(20)).await;
            AuthOutcome {
                success: self.succeed,
                token: self.succeed.then(|| "tok".to_string()),
                token_expiry: None,
                error: (!self.succeed).then(|| "denied".to_string()),
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
            _session: Option<&PortalSession>,
            _channel_ref: &str,
            _format: StreamFormat,
        ) -> ResolveOutcome {
            ResolveOutcome::failure("not under test")
        }
    }

    fn account() -> LiveTvAccount {
        LiveTvAccount {
            id: Uuid::new_v4(),
            provider: ProviderKind::Stalker,
            portal_url: "http://portal.example".to_string(),
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            mac_address: None,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn concurrent_sessions_share_one_handshake() {
        let pool = Arc::new(ClientPool::new());
        let provider = Arc::new(CountingProvider {
            auths: AtomicUsize::new(0),
            succeed: true,
        });
        let acct = account();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let provider = provider.clone();
            let acct = acct.clone();
            handles.push(tokio::spawn(async move {
                pool.session(provider.as_ref(), &acct).await.unwrap()
            }));
        }
        for handle in handles {
            let lease = handle.await.unwrap();
            assert_eq!(lease.session.token.as_deref(), Some("tok"));
        }

        assert_eq!(provider.auths.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_use_tracks_leases() {
        let pool = Arc::new(ClientPool::new());
        let provider = CountingProvider {
            auths: AtomicUsize::new(0),
            succeed: true,
        };
        let acct = account();

        let lease_a = pool.session(&provider, &acct).await.unwrap();
        let lease_b = pool.session(&provider, &acct).await.unwrap();
        assert_eq!(pool.in_use(acct.id), 2);
        drop(lease_a);
        assert_eq!(pool.in_use(acct.id), 1);
        drop(lease_b);
        assert_eq!(pool.in_use(acct.id), 0);
    }

    #[tokio::test]
    async fn disabled_account_is_fatal() {
        let pool = Arc::new(ClientPool::new());
        let provider = CountingProvider {
            auths: AtomicUsize::new(0),
            succeed: true,
        };
        let mut acct = account();
        acct.enabled = false;

        let err = pool.session(&provider, &acct).await.unwrap_err();
        assert!(matches!(err, StreamError::Fatal(_)));
        assert_eq!(provider.auths.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auth_retries_then_errors() {
        let pool = Arc::new(ClientPool::new());
        let provider = CountingProvider {
            auths: AtomicUsize::new(0),
            succeed: false,
        };
        let acct = account();

        let err = pool.session(&provider, &acct).await.unwrap_err();
        assert!(matches!(err, StreamError::Upstream(_)));
        assert_eq!(provider.auths.load(Ordering::SeqCst), MAX_AUTH_RETRIES as usize);
    }
}
