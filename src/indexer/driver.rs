//! Indexer driver trait
//!
//! Drivers translate search criteria into wire traffic against one release
//! source. Errors are returned as tagged values the orchestrator inspects;
//! a driver never panics the fan-out.

use async_trait::async_trait;
use thiserror::Error;

use super::capabilities::IndexerCapabilities;
use super::types::{ReleaseResult, SearchCriteria};

/// Errors a driver can report back to the orchestrator
#[derive(Debug, Error)]
pub enum DriverError {
    /// Upstream HTTP failure (status or transport)
    #[error("HTTP error: {0}")]
    Http(String),

    /// The request was intercepted by a Cloudflare challenge page
    #[error("blocked by Cloudflare challenge")]
    Cloudflare,

    /// The request exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// The indexer asked us to slow down
    #[error("rate limited, retry after {wait_ms}ms")]
    RateLimited { wait_ms: u64 },

    /// The indexer cannot handle this search shape
    #[error("search not supported: {0}")]
    Capability(String),

    /// The response body was not parseable
    #[error("failed to parse indexer response: {0}")]
    Parse(String),
}

/// A release-directory source the orchestrator can search
#[async_trait]
pub trait IndexerDriver: Send + Sync {
    /// Unique identifier for this indexer instance
    fn id(&self) -> &str;

    /// Display name
    fn name(&self) -> &str;

    /// Base URL; the per-host rate limiter keys off its host
    fn base_url(&self) -> &str;

    /// Capability declaration, immutable for the session
    fn capabilities(&self) -> &IndexerCapabilities;

    /// Whether user-triggered searches may use this indexer
    fn enable_interactive_search(&self) -> bool {
        true
    }

    /// Whether scheduled searches may use this indexer
    fn enable_automatic_search(&self) -> bool {
        true
    }

    /// Perform a search
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ReleaseResult>, DriverError>;

    /// Download a release payload (NZB / torrent file) with the driver's
    /// own authentication
    async fn download(&self, url: &str) -> Result<Vec<u8>, DriverError>;
}
