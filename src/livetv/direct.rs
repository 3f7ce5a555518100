//! Resilient direct TS streaming
//!
//! Some portals close direct TS sockets every ~24 seconds. The streamer
//! wraps the upstream fetch in a reconnect loop: bytes pass through
//! verbatim (no replay after reconnect), normal EOF reconnects immediately
//! with a fresh URL, errors back off exponentially, and a data timeout
//! guards against silent stalls. A safety cap ends pathological loops.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::StreamError;
use crate::net::ssrf;

use super::hls::provider_headers;
use super::resolver::StreamUrlResolver;
use super::types::StreamFormat;

/// Terminal cap on reconnect attempts for one client stream
const MAX_RECONNECTS: u32 = 500;

/// No bytes for this long after the first byte → stall, reconnect
const DATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Allowance before the first byte arrives
const FIRST_BYTE_TIMEOUT: Duration = Duration::from_secs(15);

fn reconnect_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        current_interval: Duration::from_secs(1),
        multiplier: 2.0,
        max_interval: Duration::from_secs(30),
        max_elapsed_time: None,
        randomization_factor: 0.0,
        ..Default::default()
    }
}

enum PipeEnd {
    /// Upstream finished cleanly
    Eof,
    /// No bytes within the data timeout
    Stalled,
    /// Transport or upstream error
    Error(StreamError),
    /// Consumer hung up
    ClientGone,
}

/// Streams a lineup item's direct TS upstream with reconnection
pub struct DirectStreamer {
    resolver: Arc<StreamUrlResolver>,
    client: Client,
    data_timeout: Duration,
}

impl DirectStreamer {
    pub fn new(resolver: Arc<StreamUrlResolver>) -> Self {
        Self::with_data_timeout(resolver, DATA_TIMEOUT)
    }

    pub fn with_data_timeout(resolver: Arc<StreamUrlResolver>, data_timeout: Duration) -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction is infallible with static config");
        Self {
            resolver,
            client,
            data_timeout,
        }
    }

    /// Spawn the reconnect loop; the stream ends on client cancel or after
    /// the reconnect cap trips.
    pub fn stream(&self, lineup_id: Uuid) -> ReceiverStream<Result<Bytes, StreamError>> {
        let (tx, rx) = mpsc::channel::<Result<Bytes, StreamError>>(16);
        let resolver = self.resolver.clone();
        let client = self.client.clone();
        let data_timeout = self.data_timeout;

        tokio::spawn(async move {
            run_reconnect_loop(resolver, client, lineup_id, data_timeout, tx).await;
        });

        ReceiverStream::new(rx)
    }
}

async fn run_reconnect_loop(
    resolver: Arc<StreamUrlResolver>,
    client: Client,
    lineup_id: Uuid,
    data_timeout: Duration,
    tx: mpsc::Sender<Result<Bytes, StreamError>>,
) {
    let mut reconnects: u32 = 0;
    let mut backoff = reconnect_backoff();

    info!(lineup_id = %lineup_id, "Direct stream started");

    loop {
        if tx.is_closed() {
            break;
        }
        if reconnects >= MAX_RECONNECTS {
            warn!(lineup_id = %lineup_id, "Reconnect cap reached, ending stream");
            let _ = tx.send(Err(StreamError::TooManyReconnects(reconnects))).await;
            break;
        }

        // Reconnects always fetch a fresh URL; the first connect may reuse
        // a cached one.
        let fresh = reconnects > 0;
        let end = connect_and_pipe(
            &resolver,
            &client,
            lineup_id,
            fresh,
            data_timeout,
            &mut backoff,
            &tx,
        )
        .await;

        match end {
            PipeEnd::ClientGone => break,
            PipeEnd::Eof => {
                // Upstream closed normally; reconnect immediately
                debug!(lineup_id = %lineup_id, reconnects = reconnects, "Upstream EOF, reconnecting");
                reconnects += 1;
                backoff.reset();
            }
            PipeEnd::Stalled => {
                debug!(lineup_id = %lineup_id, "No bytes within data timeout, reconnecting");
                reconnects += 1;
            }
            PipeEnd::Error(e) if e.is_failover_eligible() => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_secs(30));
                warn!(
                    lineup_id = %lineup_id,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Direct stream error, backing off"
                );
                reconnects += 1;
                tokio::time::sleep(delay).await;
            }
            PipeEnd::Error(e) => {
                warn!(lineup_id = %lineup_id, error = %e, "Terminal stream error");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }

    info!(lineup_id = %lineup_id, reconnects = reconnects, "Direct stream ended");
}

async fn connect_and_pipe(
    resolver: &StreamUrlResolver,
    client: &Client,
    lineup_id: Uuid,
    fresh: bool,
    data_timeout: Duration,
    backoff: &mut ExponentialBackoff,
    tx: &mpsc::Sender<Result<Bytes, StreamError>>,
) -> PipeEnd {
    let resolved = match resolver.resolve(lineup_id, StreamFormat::Ts, fresh).await {
        Ok(r) => r,
        Err(e) => return PipeEnd::Error(e),
    };

    let url = match Url::parse(&resolved.url) {
        Ok(u) => u,
        Err(e) => return PipeEnd::Error(StreamError::Upstream(format!("resolved URL invalid: {e}"))),
    };
    let headers = provider_headers(&resolved.provider_headers);

    let response = match ssrf::fetch_validated(client, url, &headers).await {
        Ok(r) => r,
        Err(e) => return PipeEnd::Error(e),
    };
    if !response.status().is_success() {
        return PipeEnd::Error(StreamError::Upstream(format!(
            "upstream returned HTTP {}",
            response.status()
        )));
    }

    let mut body = response.bytes_stream();
    let mut first_byte_seen = false;

    loop {
        let wait = if first_byte_seen {
            data_timeout
        } else {
            FIRST_BYTE_TIMEOUT.max(data_timeout)
        };

        match tokio::time::timeout(wait, body.next()).await {
            Err(_) => return PipeEnd::Stalled,
            Ok(None) => return PipeEnd::Eof,
            Ok(Some(Err(e))) => {
                return PipeEnd::Error(StreamError::Upstream(format!("upstream read failed: {e}")));
            }
            Ok(Some(Ok(chunk))) => {
                if !first_byte_seen {
                    first_byte_seen = true;
                    backoff.reset();
                }
                if chunk.is_empty() {
                    continue;
                }
                if tx.send(Ok(chunk)).await.is_err() {
                    return PipeEnd::ClientGone;
                }
            }
        }
    }
}
