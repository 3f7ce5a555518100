//! NNTP client stack
//!
//! A single-command-at-a-time [connection](NntpConnection) state machine,
//! a per-provider [pool](NntpPool) with health tracking and backoff, and a
//! multi-provider [manager](NntpManager) with article-level failover,
//! single-flight deduplication, and a decoded-article cache.

pub mod connection;
pub mod manager;
pub mod pool;

use thiserror::Error;

pub use connection::{ConnectionState, NntpConnection};
pub use manager::NntpManager;
pub use pool::{NntpPool, ProviderHealth};

/// NNTP errors classified by how the pool reacts to them
#[derive(Debug, Clone, Error)]
pub enum NntpError {
    /// Network/IO failure
    #[error("NNTP I/O error: {0}")]
    Io(String),

    /// A per-operation deadline elapsed
    #[error("NNTP timeout during {0}")]
    Timeout(&'static str),

    /// 400 service temporarily unavailable
    #[error("NNTP service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 420/430: the article is not on this server
    #[error("article not found (code {0})")]
    NotFound(u16),

    /// 480/482 or auth-related failure
    #[error("NNTP authentication rejected: {0}")]
    Auth(String),

    /// Response violated the protocol
    #[error("NNTP protocol error: {0}")]
    Protocol(String),

    /// The pool is shutting down
    #[error("Pool is closing")]
    PoolClosing,

    /// Every provider failed for an article; details enumerate per-host
    /// outcomes
    #[error("article not found on any provider: {0}")]
    ArticleNotFound(String),
}

impl NntpError {
    /// Failures that advance the provider's backoff accumulator
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NntpError::Io(_) | NntpError::Timeout(_) | NntpError::ServiceUnavailable(_)
        )
    }

    /// Article-level miss: try the next provider, no health penalty
    pub fn is_not_found(&self) -> bool {
        matches!(self, NntpError::NotFound(_))
    }

    /// Credential/protocol failures that won't heal by retrying
    pub fn is_fatal(&self) -> bool {
        matches!(self, NntpError::Auth(_))
    }
}
