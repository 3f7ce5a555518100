//! Live-TV entity projections
//!
//! Accounts and lineup items are persisted externally; the core reads these
//! shapes through the [LineupStore](super::provider::LineupStore) trait and
//! never writes them back.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Stalker,
    Xstream,
    M3u,
    Iptvorg,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Stalker => write!(f, "stalker"),
            ProviderKind::Xstream => write!(f, "xstream"),
            ProviderKind::M3u => write!(f, "m3u"),
            ProviderKind::Iptvorg => write!(f, "iptvorg"),
        }
    }
}

/// A live-TV portal account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveTvAccount {
    pub id: Uuid,
    pub provider: ProviderKind,
    pub portal_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Stalker portals authenticate by MAC address
    pub mac_address: Option<String>,
    pub enabled: bool,
}

/// Ordered fallback source for a lineup item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineupBackup {
    /// Always > 0; primary source is implicitly priority 0
    pub priority: u32,
    pub account_id: Uuid,
    pub channel_ref: String,
}

/// A stored channel reference joining an account and a channel, with
/// ordered backups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineupItem {
    pub id: Uuid,
    pub account_id: Uuid,
    pub provider: ProviderKind,
    /// Opaque provider channel identifier or command
    pub channel_ref: String,
    pub backups: Vec<LineupBackup>,
}

impl LineupItem {
    /// All sources in failover order: primary first, then backups by
    /// ascending priority
    pub fn sources(&self) -> Vec<(Uuid, String)> {
        let mut sources = vec![(self.account_id, self.channel_ref.clone())];
        let mut backups = self.backups.clone();
        backups.sort_by_key(|b| b.priority);
        sources.extend(backups.into_iter().map(|b| (b.account_id, b.channel_ref)));
        sources
    }
}

/// Kind of a resolved upstream stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Hls,
    Direct,
    Unknown,
}

/// Output format requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    Ts,
    Hls,
}

/// A resolved, short-lived upstream stream URL
#[derive(Debug, Clone)]
pub struct ResolvedStreamUrl {
    pub url: String,
    pub kind: StreamKind,
    /// Provider-declared expiry, when known
    pub expires_at: Option<Instant>,
    /// Headers the upstream requires (user-agent, referer, tokens)
    pub provider_headers: Vec<(String, String)>,
}

impl ResolvedStreamUrl {
    /// Infer the stream kind from the URL when the provider didn't say
    pub fn infer_kind(url: &str) -> StreamKind {
        if url.contains(".m3u8") {
            StreamKind::Hls
        } else if url.contains(".ts") || url.contains("/live/") {
            StreamKind::Direct
        } else {
            StreamKind::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_are_ordered_primary_first() {
        let primary = Uuid::new_v4();
        let backup_a = Uuid::new_v4();
        let backup_b = Uuid::new_v4();
        let item = LineupItem {
            id: Uuid::new_v4(),
            account_id: primary,
            provider: ProviderKind::Stalker,
            channel_ref: "chan-1".to_string(),
            backups: vec![
                LineupBackup {
                    priority: 2,
                    account_id: backup_b,
                    channel_ref: "chan-1b".to_string(),
                },
                LineupBackup {
                    priority: 1,
                    account_id: backup_a,
                    channel_ref: "chan-1a".to_string(),
                },
            ],
        };

        let sources = item.sources();
        assert_eq!(sources[0].0, primary);
        assert_eq!(sources[1].0, backup_a);
        assert_eq!(sources[2].0, backup_b);
    }

    #[test]
    fn kind_inference() {
        assert_eq!(
            ResolvedStreamUrl::infer_kind("http://p.example/play/x.m3u8?t=1"),
            StreamKind::Hls
        );
        assert_eq!(
            ResolvedStreamUrl::infer_kind("http://p.example/live/1.ts"),
            StreamKind::Direct
        );
        assert_eq!(
            ResolvedStreamUrl::infer_kind("http://p.example/whatever"),
            StreamKind::Unknown
        );
    }
}
