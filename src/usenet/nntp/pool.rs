//! Per-provider NNTP connection pool
//!
//! Acquisition order: reuse an idle ready connection, create a new one
//! under the cap, otherwise queue with a deadline. Health tracking feeds
//! the manager's provider selection: only retryable errors advance the
//! failure counter (article misses and auth failures don't), and at the
//! threshold the provider backs off exponentially.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NntpProviderConfig;

use super::NntpError;
use super::connection::NntpConnection;

/// Failures before the provider enters backoff
const FAILURE_THRESHOLD: u32 = 3;
/// Backoff ceiling
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// EMA smoothing factor for latency
const LATENCY_ALPHA: f64 = 0.1;
/// Default deadline for queued acquisitions
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Idle connections past this age are closed
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);
/// Idle connections past this age get a DATE keepalive
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);
/// Maintenance ticker period
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(300);

/// Health snapshot for one provider
#[derive(Debug, Clone, Default)]
pub struct ProviderHealth {
    pub consecutive_failures: u32,
    pub last_success: Option<Instant>,
    pub last_failure: Option<Instant>,
    pub ema_latency_ms: f64,
    pub backoff_until: Option<Instant>,
}

struct PoolState {
    idle: Vec<NntpConnection>,
    /// Connections alive (idle + handed out)
    total: usize,
    waiters: VecDeque<oneshot::Sender<Option<NntpConnection>>>,
    closed: bool,
}

/// Connection pool for one NNTP provider
pub struct NntpPool {
    provider: NntpProviderConfig,
    request_timeout: Duration,
    state: Mutex<PoolState>,
    health: Mutex<ProviderHealth>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl NntpPool {
    pub fn new(provider: NntpProviderConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            provider,
            request_timeout: REQUEST_TIMEOUT,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                total: 0,
                waiters: VecDeque::new(),
                closed: false,
            }),
            health: Mutex::new(ProviderHealth::default()),
            maintenance: Mutex::new(None),
        });

        let weak = Arc::downgrade(&pool);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else { break };
                pool.run_maintenance().await;
            }
        });
        *pool.maintenance.lock() = Some(task);

        pool
    }

    pub fn host(&self) -> &str {
        &self.provider.host
    }

    pub fn priority(&self) -> i32 {
        self.provider.priority
    }

    /// Fetch an article body, recording the outcome in provider health
    pub async fn get_body(&self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let mut conn = self.acquire().await?;
        let start = Instant::now();
        let result = conn.body(message_id).await;

        match &result {
            Ok(_) => {
                self.record_success(start.elapsed());
                self.release(conn);
            }
            Err(e) if e.is_not_found() => {
                // Article-level miss: the connection is fine and the
                // provider is healthy
                self.release(conn);
            }
            Err(e) => {
                self.record_command_failure(e);
                self.discard(conn);
            }
        }

        result
    }

    /// Probe for an article's existence
    pub async fn stat(&self, message_id: &str) -> Result<bool, NntpError> {
        let mut conn = self.acquire().await?;
        let start = Instant::now();
        let result = conn.stat(message_id).await;

        match &result {
            Ok(_) => {
                self.record_success(start.elapsed());
                self.release(conn);
            }
            Err(e) => {
                self.record_command_failure(e);
                self.discard(conn);
            }
        }

        result
    }

    /// Whether the provider is refusing requests until a future instant
    pub fn in_backoff(&self) -> bool {
        match self.health.lock().backoff_until {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    pub fn health(&self) -> ProviderHealth {
        self.health.lock().clone()
    }

    /// Close the pool: queued requests reject with `Pool is closing` and
    /// every socket disconnects.
    pub async fn close(&self) {
        let (idle, waiters) = {
            let mut state = self.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.idle),
                std::mem::take(&mut state.waiters),
            )
        };

        // Dropping the senders rejects every queued waiter
        drop(waiters);

        for conn in idle {
            conn.quit().await;
        }

        if let Some(task) = self.maintenance.lock().take() {
            task.abort();
        }

        info!(host = %self.provider.host, "NNTP pool closed");
    }

    async fn acquire(&self) -> Result<NntpConnection, NntpError> {
        loop {
            enum Action {
                Use(NntpConnection),
                Create,
                Wait(oneshot::Receiver<Option<NntpConnection>>),
            }

            let action = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(NntpError::PoolClosing);
                }
                let mut picked = None;
                while let Some(conn) = state.idle.pop() {
                    if conn.is_ready() {
                        picked = Some(conn);
                        break;
                    }
                    // Dead idle connection: purge and free its slot
                    state.total -= 1;
                }
                if let Some(conn) = picked {
                    Action::Use(conn)
                } else if state.total < self.provider.max_connections {
                    state.total += 1;
                    Action::Create
                } else {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    Action::Wait(rx)
                }
            };

            match action {
                Action::Use(conn) => return Ok(conn),
                Action::Create => {
                    match NntpConnection::connect(self.provider.clone()).await {
                        Ok(conn) => return Ok(conn),
                        Err(e) => {
                            self.state.lock().total -= 1;
                            self.record_command_failure(&e);
                            return Err(e);
                        }
                    }
                }
                Action::Wait(rx) => {
                    match tokio::time::timeout(self.request_timeout, rx).await {
                        Err(_) => return Err(NntpError::Timeout("pool acquire")),
                        Ok(Err(_)) => return Err(NntpError::PoolClosing),
                        Ok(Ok(Some(conn))) => return Ok(conn),
                        // A slot freed without a connection; retry
                        Ok(Ok(None)) => continue,
                    }
                }
            }
        }
    }

    fn release(&self, mut conn: NntpConnection) {
        let mut state = self.state.lock();
        if state.closed {
            state.total -= 1;
            tokio::spawn(conn.quit());
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(Some(conn)) {
                Ok(()) => return,
                // Waiter timed out; try the next one
                Err(Some(returned)) => conn = returned,
                Err(None) => unreachable!("sent Some"),
            }
        }

        if conn.is_ready() {
            state.idle.push(conn);
        } else {
            state.total -= 1;
        }
    }

    fn discard(&self, conn: NntpConnection) {
        let mut state = self.state.lock();
        state.total -= 1;
        // Wake one waiter so it can create a replacement
        if let Some(waiter) = state.waiters.pop_front() {
            let _ = waiter.send(None);
        }
        drop(state);
        drop(conn);
    }

    fn record_success(&self, latency: Duration) {
        let mut health = self.health.lock();
        health.consecutive_failures = 0;
        health.backoff_until = None;
        health.last_success = Some(Instant::now());
        let latency_ms = latency.as_secs_f64() * 1000.0;
        health.ema_latency_ms = if health.ema_latency_ms == 0.0 {
            latency_ms
        } else {
            health.ema_latency_ms * (1.0 - LATENCY_ALPHA) + latency_ms * LATENCY_ALPHA
        };
    }

    /// Route a failed command into provider health. Retryable failures
    /// advance the backoff accumulator; fatal credential rejections stay
    /// out of it but flush the idle connections, which all share the
    /// rejected credentials.
    fn record_command_failure(&self, error: &NntpError) {
        if error.is_retryable() {
            self.record_retryable_failure();
        } else if error.is_fatal() {
            self.purge_idle();
        }
    }

    /// Disconnect every idle connection and free their slots
    fn purge_idle(&self) {
        let drained = {
            let mut state = self.state.lock();
            let drained = std::mem::take(&mut state.idle);
            state.total -= drained.len();
            drained
        };
        if drained.is_empty() {
            return;
        }
        warn!(
            host = %self.provider.host,
            dropped = drained.len(),
            "Authentication rejected, dropping idle connections"
        );
        for conn in drained {
            tokio::spawn(conn.quit());
        }
    }

    fn record_retryable_failure(&self) {
        let mut health = self.health.lock();
        health.consecutive_failures += 1;
        health.last_failure = Some(Instant::now());

        if health.consecutive_failures >= FAILURE_THRESHOLD {
            let exponent = (health.consecutive_failures - FAILURE_THRESHOLD).min(16);
            let delay = Duration::from_secs(1)
                .saturating_mul(1u32 << exponent)
                .min(MAX_BACKOFF);
            health.backoff_until = Some(Instant::now() + delay);
            warn!(
                host = %self.provider.host,
                consecutive_failures = health.consecutive_failures,
                backoff_secs = delay.as_secs(),
                "NNTP provider entering backoff"
            );
        }
    }

    /// Close idle connections past their lifetime, purge dead ones, and
    /// keepalive the rest.
    async fn run_maintenance(&self) {
        let idle = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.idle)
        };

        let mut kept = Vec::new();
        let mut dropped = 0usize;
        for mut conn in idle {
            if !conn.is_ready() || conn.idle_for() >= IDLE_TIMEOUT {
                dropped += 1;
                conn.quit().await;
                continue;
            }
            if conn.idle_for() >= KEEPALIVE_IDLE && !conn.keepalive().await {
                dropped += 1;
                continue;
            }
            kept.push(conn);
        }

        let mut state = self.state.lock();
        state.total -= dropped;
        state.idle.extend(kept);
        if dropped > 0 {
            debug!(host = %self.provider.host, dropped = dropped, "NNTP pool maintenance");
        }
    }
}

impl std::fmt::Debug for NntpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NntpPool")
            .field("host", &self.provider.host)
            .field("total", &state.total)
            .field("idle", &state.idle.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Arc<NntpPool> {
        NntpPool::new(NntpProviderConfig {
            host: "news.example.com".to_string(),
            port: 119,
            use_tls: false,
            username: None,
            password: None,
            max_connections: 2,
            priority: 1,
        })
    }

    #[tokio::test]
    async fn success_resets_backoff() {
        let p = pool();
        for _ in 0..4 {
            p.record_retryable_failure();
        }
        assert!(p.in_backoff());
        assert_eq!(p.health().consecutive_failures, 4);

        p.record_success(Duration::from_millis(80));
        let health = p.health();
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.backoff_until.is_none());
        assert!(!p.in_backoff());
        assert!(health.ema_latency_ms > 0.0);
    }

    #[tokio::test]
    async fn fatal_errors_skip_the_backoff_accumulator() {
        let p = pool();
        p.record_command_failure(&NntpError::Auth("bad credentials".into()));
        p.record_command_failure(&NntpError::Auth("bad credentials".into()));
        assert_eq!(p.health().consecutive_failures, 0);
        assert!(!p.in_backoff());

        p.record_command_failure(&NntpError::Io("reset".into()));
        assert_eq!(p.health().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn backoff_starts_at_threshold() {
        let p = pool();
        p.record_retryable_failure();
        p.record_retryable_failure();
        assert!(!p.in_backoff());
        p.record_retryable_failure();
        assert!(p.in_backoff());
    }

    #[tokio::test]
    async fn latency_ema_smooths() {
        let p = pool();
        p.record_success(Duration::from_millis(100));
        assert_eq!(p.health().ema_latency_ms, 100.0);
        p.record_success(Duration::from_millis(200));
        let ema = p.health().ema_latency_ms;
        assert!((ema - 110.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquire() {
        let p = pool();
        p.close().await;
        let err = p.get_body("<x@y>").await.unwrap_err();
        assert!(matches!(err, NntpError::PoolClosing));
        assert_eq!(err.to_string(), "Pool is closing");
    }
}
