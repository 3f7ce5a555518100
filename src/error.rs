//! Streaming error taxonomy
//!
//! Errors are classified by how callers should behave: transient upstream
//! failures retry or fail over, validation failures never retry, and
//! terminal failures surface to the client after all fail-overs are
//! exhausted.

use thiserror::Error;

/// Errors surfaced by the live-TV and usenet streaming services.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Every candidate source failed; the message enumerates per-source outcomes.
    #[error("All {attempted} sources failed: {details}")]
    AllSourcesFailed { attempted: usize, details: String },

    /// The resolved URL or a redirect target points at a blocked address.
    #[error("URL blocked by SSRF protection: {0}")]
    SsrfBlocked(String),

    /// The upstream response claimed to be a playlist but was not parseable.
    #[error("invalid playlist: {0}")]
    InvalidPlaylist(String),

    /// The NZB contains only RAR archives; streaming would need extraction.
    #[error("content requires extraction: {0}")]
    RequiresExtraction(String),

    /// The requested byte range cannot be satisfied.
    #[error("range not satisfiable for resource of {total} bytes")]
    RangeNotSatisfiable { total: u64 },

    /// Mount, file, lineup item, or account does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The reconnect loop hit its safety cap.
    #[error("stream ended after {0} reconnect attempts")]
    TooManyReconnects(u32),

    /// Misconfiguration: missing credentials, disabled account.
    #[error("{0}")]
    Fatal(String),

    /// Upstream I/O failure that exhausted its retries.
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl StreamError {
    /// Whether a caller holding alternates (or a reconnect loop) should
    /// keep trying. Validation rejections and the reconnect cap are
    /// terminal: they surface to the caller and are never retried.
    pub fn is_failover_eligible(&self) -> bool {
        !matches!(
            self,
            StreamError::SsrfBlocked(_)
                | StreamError::InvalidPlaylist(_)
                | StreamError::RequiresExtraction(_)
                | StreamError::RangeNotSatisfiable { .. }
                | StreamError::TooManyReconnects(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregated_message_names_source_count() {
        let err = StreamError::AllSourcesFailed {
            attempted: 3,
            details: "portal-a: timeout; portal-b: 502; portal-c: auth".into(),
        };
        assert!(err.to_string().starts_with("All 3 sources failed:"));
    }

    #[test]
    fn validation_failures_are_not_failover_eligible() {
        assert!(!StreamError::SsrfBlocked("http://127.0.0.1/".into()).is_failover_eligible());
        assert!(!StreamError::InvalidPlaylist("no variants".into()).is_failover_eligible());
        assert!(!StreamError::TooManyReconnects(500).is_failover_eligible());

        assert!(StreamError::Upstream("reset".into()).is_failover_eligible());
        assert!(StreamError::NotFound("lineup".into()).is_failover_eligible());
        assert!(
            StreamError::AllSourcesFailed {
                attempted: 2,
                details: "timeout; 502".into()
            }
            .is_failover_eligible()
        );
    }
}
