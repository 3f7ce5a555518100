//! Live-TV provider interface
//!
//! One implementation per portal protocol (stalker, xstream, m3u, iptvorg)
//! lives outside the core; the resolver drives them through this trait.
//! Optional operations are advertised through capability flags.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pool::PortalSession;
use super::types::{LineupItem, LiveTvAccount, ProviderKind, StreamFormat, StreamKind};

/// Result of a portal handshake
#[derive(Debug, Clone, Default)]
pub struct AuthOutcome {
    pub success: bool,
    pub token: Option<String>,
    pub token_expiry: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Result of a connectivity probe
#[derive(Debug, Clone)]
pub struct ConnectionTest {
    pub success: bool,
    pub profile: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Result of a channel lineup sync
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSyncOutcome {
    pub categories_added: usize,
    pub categories_updated: usize,
    pub channels_added: usize,
    pub channels_updated: usize,
    pub channels_removed: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of a stream URL resolution
#[derive(Debug, Clone)]
pub struct ResolveOutcome {
    pub success: bool,
    pub url: Option<String>,
    pub kind: StreamKind,
    pub headers: Vec<(String, String)>,
    pub error: Option<String>,
}

impl ResolveOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: None,
            kind: StreamKind::Unknown,
            headers: vec![],
            error: Some(error.into()),
        }
    }
}

/// One EPG entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpgProgram {
    pub channel_ref: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Which optional operations a provider implements
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    pub supports_epg: bool,
    pub supports_archive: bool,
}

/// A live-TV portal protocol implementation
#[async_trait]
pub trait LiveTvProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::default()
    }

    /// Perform the portal handshake for an account
    async fn authenticate(&self, account: &LiveTvAccount) -> AuthOutcome;

    /// Probe connectivity and fetch the account profile
    async fn test_connection(&self, account: &LiveTvAccount) -> ConnectionTest;

    /// Refresh the channel lineup for an account
    async fn sync_channels(&self, account: &LiveTvAccount) -> ChannelSyncOutcome;

    /// Resolve a channel reference into a playable URL. `session` carries
    /// the pooled auth token where the protocol needs one.
    async fn resolve_stream_url(
        &self,
        account: &LiveTvAccount,
        session: Option<&PortalSession>,
        channel_ref: &str,
        format: StreamFormat,
    ) -> ResolveOutcome;

    /// Fetch EPG data; only called when `capabilities().supports_epg`
    async fn fetch_epg(
        &self,
        _account: &LiveTvAccount,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<EpgProgram>> {
        anyhow::bail!("EPG not supported by this provider")
    }

    /// Resolve a catch-up/archive URL; only called when
    /// `capabilities().supports_archive`
    async fn get_archive_stream_url(
        &self,
        _account: &LiveTvAccount,
        _session: Option<&PortalSession>,
        _channel_ref: &str,
        _start: DateTime<Utc>,
    ) -> ResolveOutcome {
        ResolveOutcome::failure("archive not supported by this provider")
    }
}

/// Registry of provider implementations keyed by kind
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<ProviderKind, Arc<dyn LiveTvProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn LiveTvProvider>) {
        self.providers.write().insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn LiveTvProvider>> {
        self.providers.read().get(&kind).cloned()
    }
}

/// Read-only access to persisted lineup items and accounts
#[async_trait]
pub trait LineupStore: Send + Sync {
    async fn get_lineup_item(&self, id: Uuid) -> Option<LineupItem>;

    async fn get_account(&self, id: Uuid) -> Option<LiveTvAccount>;
}

/// In-memory lineup store; deployments and tests populate it directly
#[derive(Default)]
pub struct MemoryLineupStore {
    items: RwLock<HashMap<Uuid, LineupItem>>,
    accounts: RwLock<HashMap<Uuid, LiveTvAccount>>,
}

impl MemoryLineupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_item(&self, item: LineupItem) {
        self.items.write().insert(item.id, item);
    }

    pub fn insert_account(&self, account: LiveTvAccount) {
        self.accounts.write().insert(account.id, account);
    }
}

#[async_trait]
impl LineupStore for MemoryLineupStore {
    async fn get_lineup_item(&self, id: Uuid) -> Option<LineupItem> {
        self.items.read().get(&id).cloned()
    }

    async fn get_account(&self, id: Uuid) -> Option<LiveTvAccount> {
        self.accounts.read().get(&id).cloned()
    }
}
