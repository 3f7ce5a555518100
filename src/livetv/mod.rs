//! Live-TV streaming core
//!
//! Resolves opaque channel references into live byte streams: URL
//! resolution with short-lived tokens, a per-portal client pool, HLS-to-TS
//! conversion, and reconnecting direct streams.

pub mod direct;
pub mod hls;
pub mod pool;
pub mod provider;
pub mod resolver;
pub mod types;
pub mod url_cache;

pub use direct::DirectStreamer;
pub use hls::HlsToTsConverter;
pub use pool::{ClientPool, PortalSession, SessionLease};
pub use provider::{
    AuthOutcome, ChannelSyncOutcome, ConnectionTest, EpgProgram, LineupStore, LiveTvProvider,
    ProviderCapabilities, ProviderRegistry, ResolveOutcome,
};
pub use resolver::StreamUrlResolver;
pub use types::{
    LineupBackup, LineupItem, LiveTvAccount, ProviderKind, ResolvedStreamUrl, StreamFormat,
    StreamKind,
};
pub use url_cache::UrlCache;
