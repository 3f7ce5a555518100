//! Indexer status tracking
//!
//! Records per-indexer outcomes and applies exponential backoff on
//! consecutive failures. Reads are snapshot copies; mutation happens only
//! through the recording API and never holds the lock across I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Backoff policy applied after consecutive failures
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first failure
    pub initial: Duration,
    /// Ceiling for the computed delay
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(3600),
        }
    }
}

/// Mutable per-indexer health state
#[derive(Debug, Clone)]
pub struct IndexerStatus {
    pub is_enabled: bool,
    /// Lower is preferred
    pub priority: i32,
    pub consecutive_failures: u32,
    pub backoff_until: Option<Instant>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for IndexerStatus {
    fn default() -> Self {
        Self {
            is_enabled: true,
            priority: 25,
            consecutive_failures: 0,
            backoff_until: None,
            last_success_at: None,
            last_error: None,
        }
    }
}

/// Tracks health for every known indexer
pub struct IndexerStatusTracker {
    statuses: RwLock<HashMap<String, IndexerStatus>>,
    backoff: BackoffConfig,
}

impl IndexerStatusTracker {
    pub fn new(backoff: BackoffConfig) -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
            backoff,
        }
    }

    /// Record a successful search: failures and backoff reset
    pub fn record_success(&self, indexer_id: &str) {
        let mut statuses = self.statuses.write();
        let status = statuses.entry(indexer_id.to_string()).or_default();
        status.consecutive_failures = 0;
        status.backoff_until = None;
        status.last_success_at = Some(Utc::now());
        status.last_error = None;
    }

    /// Record a failed search: failures advance and backoff doubles up to
    /// the configured ceiling
    pub fn record_failure(&self, indexer_id: &str, error: &str) {
        let mut statuses = self.statuses.write();
        let status = statuses.entry(indexer_id.to_string()).or_default();
        status.consecutive_failures += 1;
        status.last_error = Some(error.to_string());

        let exponent = status.consecutive_failures.saturating_sub(1).min(16);
        let delay = self
            .backoff
            .initial
            .saturating_mul(1u32 << exponent)
            .min(self.backoff.max);
        status.backoff_until = Some(Instant::now() + delay);

        warn!(
            indexer_id = %indexer_id,
            consecutive_failures = status.consecutive_failures,
            backoff_secs = delay.as_secs(),
            error = %error,
            "Indexer failure recorded"
        );
    }

    /// False iff the indexer is inside its backoff window
    pub fn can_use(&self, indexer_id: &str) -> bool {
        let statuses = self.statuses.read();
        match statuses.get(indexer_id).and_then(|s| s.backoff_until) {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Last known state for one indexer (defaults for unknown ids)
    pub fn get_status_sync(&self, indexer_id: &str) -> IndexerStatus {
        self.statuses
            .read()
            .get(indexer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Point-in-time copy of all statuses
    pub fn snapshot(&self) -> HashMap<String, IndexerStatus> {
        self.statuses.read().clone()
    }

    pub fn set_enabled(&self, indexer_id: &str, enabled: bool) {
        let mut statuses = self.statuses.write();
        let status = statuses.entry(indexer_id.to_string()).or_default();
        status.is_enabled = enabled;
        debug!(indexer_id = %indexer_id, enabled = enabled, "Indexer enabled flag changed");
    }

    pub fn set_priority(&self, indexer_id: &str, priority: i32) {
        let mut statuses = self.statuses.write();
        statuses.entry(indexer_id.to_string()).or_default().priority = priority;
    }
}

impl Default for IndexerStatusTracker {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl std::fmt::Debug for IndexerStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexerStatusTracker")
            .field("tracked", &self.statuses.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> IndexerStatusTracker {
        IndexerStatusTracker::new(BackoffConfig {
            initial: Duration::from_secs(60),
            max: Duration::from_secs(600),
        })
    }

    #[test]
    fn success_resets_failures_and_backoff() {
        let t = tracker();
        t.record_failure("a", "boom");
        t.record_failure("a", "boom");
        assert_eq!(t.get_status_sync("a").consecutive_failures, 2);
        assert!(!t.can_use("a"));

        t.record_success("a");
        let status = t.get_status_sync("a");
        assert_eq!(status.consecutive_failures, 0);
        assert!(status.backoff_until.is_none());
        assert!(t.can_use("a"));
    }

    #[test]
    fn backoff_is_capped() {
        let t = tracker();
        for _ in 0..10 {
            t.record_failure("a", "boom");
        }
        let status = t.get_status_sync("a");
        let remaining = status.backoff_until.unwrap() - Instant::now();
        assert!(remaining <= Duration::from_secs(600));
    }

    #[test]
    fn unknown_indexer_is_usable() {
        assert!(tracker().can_use("never-seen"));
    }
}
