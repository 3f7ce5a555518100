//! Search dispatch rate limiting
//!
//! Two independent layers composed at the dispatch site: a per-indexer
//! limiter and a per-host limiter whose key is derived from the indexer
//! base URL, so multiple indexer entries sharing one upstream host cannot
//! hammer it together. Both expose a non-consuming `check` (the orchestrator
//! skips an indexer when the required wait exceeds its timeout budget) and
//! a `record_request` called only when a request is actually dispatched.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use url::Url;

/// Outcome of a rate-limit check
#[derive(Debug, Clone)]
pub struct LimitDecision {
    pub can_proceed: bool,
    /// How long until a slot frees up (zero when `can_proceed`)
    pub wait: Duration,
    pub reason: Option<String>,
}

impl LimitDecision {
    fn proceed() -> Self {
        Self {
            can_proceed: true,
            wait: Duration::ZERO,
            reason: None,
        }
    }
}

/// Fixed-window request limiter for a single key
pub struct RequestLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RequestLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Whether a request may proceed now; does not consume a slot
    pub fn check(&self, label: &str) -> LimitDecision {
        let mut timestamps = self.timestamps.lock();
        let now = Instant::now();
        while let Some(front) = timestamps.front() {
            if now.duration_since(*front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < self.max_requests {
            return LimitDecision::proceed();
        }

        // The oldest in-window request determines when a slot frees up
        let oldest = *timestamps.front().expect("non-empty at capacity");
        let wait = self.window.saturating_sub(now.duration_since(oldest));
        LimitDecision {
            can_proceed: false,
            wait,
            reason: Some(format!(
                "{label}: {} requests in {}s window",
                self.max_requests,
                self.window.as_secs()
            )),
        }
    }

    /// Record a dispatched request
    pub fn record_request(&self) {
        self.timestamps.lock().push_back(Instant::now());
    }
}

/// A registry of [RequestLimiter]s sharing one policy, keyed by string
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<String, Arc<RequestLimiter>>>,
    max_requests: usize,
    window: Duration,
}

impl LimiterRegistry {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            max_requests,
            window,
        }
    }

    fn get(&self, key: &str) -> Arc<RequestLimiter> {
        if let Some(limiter) = self.limiters.read().get(key) {
            return limiter.clone();
        }
        let mut limiters = self.limiters.write();
        limiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RequestLimiter::new(self.max_requests, self.window)))
            .clone()
    }
}

/// Both rate-limit layers, composed for the orchestrator
pub struct SearchRateLimiters {
    per_indexer: LimiterRegistry,
    per_host: LimiterRegistry,
}

impl SearchRateLimiters {
    pub fn new(per_indexer: LimiterRegistry, per_host: LimiterRegistry) -> Self {
        Self {
            per_indexer,
            per_host,
        }
    }

    /// Check both layers; the larger wait wins
    pub fn check(&self, indexer_id: &str, base_url: &str) -> LimitDecision {
        let indexer = self.per_indexer.get(indexer_id).check("indexer");
        let host = self.per_host.get(&host_key(base_url)).check("host");

        match (indexer.can_proceed, host.can_proceed) {
            (true, true) => LimitDecision::proceed(),
            _ => {
                if indexer.wait >= host.wait {
                    indexer
                } else {
                    host
                }
            }
        }
    }

    /// Record a dispatched request against both layers
    pub fn record(&self, indexer_id: &str, base_url: &str) {
        self.per_indexer.get(indexer_id).record_request();
        self.per_host.get(&host_key(base_url)).record_request();
    }
}

impl Default for SearchRateLimiters {
    fn default() -> Self {
        Self {
            per_indexer: LimiterRegistry::new(30, Duration::from_secs(60)),
            per_host: LimiterRegistry::new(60, Duration::from_secs(60)),
        }
    }
}

/// Host key for a base URL; falls back to the raw string when unparseable
pub fn host_key(base_url: &str) -> String {
    Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_else(|| base_url.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_allows_until_capacity() {
        let limiter = RequestLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("x").can_proceed);
        limiter.record_request();
        assert!(limiter.check("x").can_proceed);
        limiter.record_request();

        let decision = limiter.check("x");
        assert!(!decision.can_proceed);
        assert!(decision.wait > Duration::ZERO);
        assert!(decision.reason.unwrap().contains("2 requests"));
    }

    #[test]
    fn check_does_not_consume() {
        let limiter = RequestLimiter::new(1, Duration::from_secs(60));
        for _ in 0..10 {
            assert!(limiter.check("x").can_proceed);
        }
        limiter.record_request();
        assert!(!limiter.check("x").can_proceed);
    }

    #[test]
    fn host_key_coalesces_indexers_on_one_host() {
        assert_eq!(host_key("https://Indexer.Example.com/api/v1"), "indexer.example.com");
        assert_eq!(
            host_key("https://indexer.example.com:8080/other"),
            "indexer.example.com"
        );
    }

    #[test]
    fn composed_check_reports_larger_wait() {
        let limiters = SearchRateLimiters::new(
            LimiterRegistry::new(100, Duration::from_secs(60)),
            LimiterRegistry::new(1, Duration::from_secs(60)),
        );
        limiters.record("a", "https://example.com");
        // Different indexer id, same host: host layer must block
        let decision = limiters.check("b", "https://example.com");
        assert!(!decision.can_proceed);
        assert!(decision.reason.unwrap().starts_with("host"));
    }
}
