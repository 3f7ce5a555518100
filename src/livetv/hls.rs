//! HLS playlist handling and HLS-to-TS conversion
//!
//! Many media servers only consume a continuous MPEG-TS byte stream, while
//! Stalker-style portals hand out HLS playlists whose media URL consumes a
//! single-use token per fetch. The converter resolves a fresh playlist URL
//! each cycle, fetches segments in playlist order, and emits their bodies
//! as one unbroken byte stream with no duplicates.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::StreamError;
use crate::net::ssrf;

use super::resolver::StreamUrlResolver;
use super::types::StreamFormat;

/// Segment URLs remembered to suppress duplicates across refreshes
const EMITTED_WINDOW: usize = 1024;

/// Cap on a playlist body; anything larger is not a playlist
const MAX_PLAYLIST_BYTES: usize = 4 * 1024 * 1024;

/// A parsed media playlist with absolutized segment URLs
#[derive(Debug, Clone)]
pub struct HlsMediaPlaylist {
    pub segments: Vec<Url>,
    pub is_live: bool,
    pub target_duration: f64,
}

/// Whether the body is a master playlist (variant list)
pub fn is_master_playlist(content: &str) -> bool {
    content.contains("#EXT-X-STREAM-INF:")
}

/// Parse a media playlist, absolutizing segment URIs against `base` (the
/// final URL after redirects).
pub fn parse_media_playlist(content: &str, base: &Url) -> Result<HlsMediaPlaylist, StreamError> {
    if !content.starts_with("#EXTM3U") {
        return Err(StreamError::InvalidPlaylist(
            "missing #EXTM3U header".to_string(),
        ));
    }

    let mut segments = Vec::new();
    let mut is_live = true;
    let mut target_duration = 10.0f64;

    for line in content.lines() {
        let line = line.trim();
        if line == "#EXT-X-ENDLIST" {
            is_live = false;
        } else if let Some(rest) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            target_duration = rest.parse().unwrap_or(10.0);
        } else if !line.starts_with('#') && !line.is_empty() {
            let absolute = base
                .join(line)
                .map_err(|e| StreamError::InvalidPlaylist(format!("bad segment URI: {e}")))?;
            segments.push(absolute);
        }
    }

    Ok(HlsMediaPlaylist {
        segments,
        is_live,
        target_duration,
    })
}

/// Parse a master playlist into `(bandwidth, variant URL)` pairs sorted by
/// bandwidth descending.
pub fn parse_master_variants(content: &str, base: &Url) -> Vec<(u64, Url)> {
    let mut variants = Vec::new();
    let mut lines = content.lines().peekable();

    while let Some(line) = lines.next() {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            let bandwidth = attrs
                .split(',')
                .find_map(|kv| kv.trim().strip_prefix("BANDWIDTH="))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0u64);
            if let Some(uri_line) = lines.next() {
                let uri_line = uri_line.trim();
                if !uri_line.starts_with('#') && !uri_line.is_empty() {
                    if let Ok(url) = base.join(uri_line) {
                        variants.push((bandwidth, url));
                    }
                }
            }
        }
    }

    variants.sort_by(|a, b| b.0.cmp(&a.0));
    variants
}

/// Rewrite every URI line so it points at the local segment proxy. Used by
/// the `format=hls` surface; the client fetches segments through us instead
/// of hitting the portal's tokened URLs directly.
pub fn rewrite_playlist(content: &str, base: &Url, segment_proxy: &str) -> String {
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with('#') || trimmed.is_empty() {
                line.to_string()
            } else {
                match base.join(trimmed) {
                    Ok(absolute) => {
                        format!("{segment_proxy}?u={}", urlencoding::encode(absolute.as_str()))
                    }
                    Err(_) => line.to_string(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build a header map from provider-declared header pairs
pub fn provider_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Refresh backoff: 1s doubling to 30s, no jitter, never gives up
fn refresh_backoff() -> ExponentialBackoff {
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

enum CycleOutcome {
    /// Segments (or degenerate body bytes) were emitted
    Progress,
    /// Playlist fetched fine but contained nothing new
    Idle { poll_delay: Duration },
    /// The consumer hung up
    ClientGone,
}

/// Converts a lineup item's HLS upstream into a continuous TS byte stream
pub struct HlsToTsConverter {
    resolver: Arc<StreamUrlResolver>,
    client: Client,
}

impl HlsToTsConverter {
    pub fn new(resolver: Arc<StreamUrlResolver>) -> Self {
        // Redirects are followed manually so every hop is SSRF-checked
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction is infallible with static config");
        Self { resolver, client }
    }

    /// Spawn the conversion loop; the returned stream lives until the
    /// client cancels.
    pub fn stream(&self, lineup_id: Uuid) -> ReceiverStream<Result<Bytes, StreamError>> {
        let (tx, rx) = mpsc::channel::<Result<Bytes, StreamError>>(16);
        let resolver = self.resolver.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            run_convert_loop(resolver, client, lineup_id, tx).await;
        });

        ReceiverStream::new(rx)
    }
}

async fn run_convert_loop(
    resolver: Arc<StreamUrlResolver>,
    client: Client,
    lineup_id: Uuid,
    tx: mpsc::Sender<Result<Bytes, StreamError>>,
) {
    let mut emitted = EmittedSet::new(EMITTED_WINDOW);
    let mut backoff = refresh_backoff();

    info!(lineup_id = %lineup_id, "HLS→TS conversion started");

    loop {
        if tx.is_closed() {
            break;
        }

        match convert_cycle(&resolver, &client, lineup_id, &mut emitted, &tx).await {
            Ok(CycleOutcome::ClientGone) => break,
            Ok(CycleOutcome::Progress) => {
                backoff.reset();
            }
            Ok(CycleOutcome::Idle { poll_delay }) => {
                backoff.reset();
                tokio::time::sleep(poll_delay).await;
            }
            Err(e) if e.is_failover_eligible() => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_secs(30));
                warn!(
                    lineup_id = %lineup_id,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "HLS refresh cycle failed"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(lineup_id = %lineup_id, error = %e, "Terminal conversion error");
                let _ = tx.send(Err(e)).await;
                break;
            }
        }
    }

    info!(lineup_id = %lineup_id, "HLS→TS conversion ended");
}

async fn convert_cycle(
    resolver: &StreamUrlResolver,
    client: &Client,
    lineup_id: Uuid,
    emitted: &mut EmittedSet,
    tx: &mpsc::Sender<Result<Bytes, StreamError>>,
) -> Result<CycleOutcome, StreamError> {
    // Invalidate-then-resolve so the playlist token is actually fresh
    let resolved = resolver
        .resolve(lineup_id, StreamFormat::Hls, true)
        .await?;
    let headers = provider_headers(&resolved.provider_headers);
    let url = Url::parse(&resolved.url)
        .map_err(|e| StreamError::Upstream(format!("resolved URL invalid: {e}")))?;

    let response = ssrf::fetch_validated(client, url, &headers).await?;
    if !response.status().is_success() {
        return Err(StreamError::Upstream(format!(
            "playlist fetch returned HTTP {}",
            response.status()
        )));
    }
    let mut final_url = response.url().clone();

    // Peek at the body: a non-playlist response streams through unchanged
    let mut body_stream = response.bytes_stream();
    let first_chunk = match body_stream.next().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => return Err(StreamError::Upstream(format!("body read failed: {e}"))),
        None => Bytes::new(),
    };

    if !first_chunk.starts_with(b"#EXTM3U") {
        debug!(lineup_id = %lineup_id, "Upstream is not a playlist, piping body through");
        if tx.send(Ok(first_chunk)).await.is_err() {
            return Ok(CycleOutcome::ClientGone);
        }
        while let Some(chunk) = body_stream.next().await {
            let chunk = chunk.map_err(|e| StreamError::Upstream(format!("body read failed: {e}")))?;
            if tx.send(Ok(chunk)).await.is_err() {
                return Ok(CycleOutcome::ClientGone);
            }
        }
        return Ok(CycleOutcome::Progress);
    }

    let mut body = first_chunk.to_vec();
    while let Some(chunk) = body_stream.next().await {
        let chunk = chunk.map_err(|e| StreamError::Upstream(format!("body read failed: {e}")))?;
        body.extend_from_slice(&chunk);
        if body.len() > MAX_PLAYLIST_BYTES {
            return Err(StreamError::InvalidPlaylist("playlist too large".to_string()));
        }
    }
    let mut content = String::from_utf8_lossy(&body).into_owned();

    // Master playlists nest the media playlist one fetch deeper
    if is_master_playlist(&content) {
        let variants = parse_master_variants(&content, &final_url);
        let (_, variant_url) = variants.into_iter().next().ok_or_else(|| {
            StreamError::InvalidPlaylist("master playlist with no variants".to_string())
        })?;
        let response = ssrf::fetch_validated(client, variant_url, &headers).await?;
        if !response.status().is_success() {
            return Err(StreamError::Upstream(format!(
                "variant fetch returned HTTP {}",
                response.status()
            )));
        }
        final_url = response.url().clone();
        content = response
            .text()
            .await
            .map_err(|e| StreamError::Upstream(format!("variant read failed: {e}")))?;
    }

    let playlist = parse_media_playlist(&content, &final_url)?;
    let poll_delay = Duration::from_secs_f64((playlist.target_duration / 2.0).clamp(1.0, 15.0));

    let mut progressed = false;
    for segment_url in &playlist.segments {
        if emitted.contains(segment_url.as_str()) {
            continue;
        }

        let response = ssrf::fetch_validated(client, segment_url.clone(), &headers).await?;
        if !response.status().is_success() {
            return Err(StreamError::Upstream(format!(
                "segment fetch returned HTTP {}",
                response.status()
            )));
        }
        let data = response
            .bytes()
            .await
            .map_err(|e| StreamError::Upstream(format!("segment read failed: {e}")))?;

        if tx.send(Ok(data)).await.is_err() {
            return Ok(CycleOutcome::ClientGone);
        }
        emitted.insert(segment_url.as_str().to_string());
        progressed = true;
    }

    if progressed {
        Ok(CycleOutcome::Progress)
    } else {
        Ok(CycleOutcome::Idle { poll_delay })
    }
}

/// Bounded set of already-emitted segment URLs
struct EmittedSet {
    set: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl EmittedSet {
    fn new(capacity: usize) -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn contains(&self, url: &str) -> bool {
        self.set.contains(url)
    }

    fn insert(&mut self, url: String) {
        if self.set.insert(url.clone()) {
            self.order.push_back(url);
            if self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.set.remove(&oldest);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA_PLAYLIST: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg_001.ts\n#EXTINF:6.0,\nseg_002.ts\n#EXTINF:6.0,\nhttp://cdn.example.com/abs/seg_003.ts\n";

    const MASTER_PLAYLIST: &str = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=1280x720\nlow/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1920x1080\nhigh/index.m3u8\n";

    fn base() -> Url {
        Url::parse("http://portal.example.com/hls/stream/index.m3u8?token=abc").unwrap()
    }

    #[test]
    fn parses_and_absolutizes_segments() {
        let playlist = parse_media_playlist(MEDIA_PLAYLIST, &base()).unwrap();
        assert_eq!(playlist.segments.len(), 3);
        assert_eq!(
            playlist.segments[0].as_str(),
            "http://portal.example.com/hls/stream/seg_001.ts"
        );
        assert_eq!(
            playlist.segments[2].as_str(),
            "http://cdn.example.com/abs/seg_003.ts"
        );
        assert!(playlist.is_live);
        assert_eq!(playlist.target_duration, 6.0);
    }

    #[test]
    fn endlist_marks_vod() {
        let content = format!("{MEDIA_PLAYLIST}#EXT-X-ENDLIST\n");
        let playlist = parse_media_playlist(&content, &base()).unwrap();
        assert!(!playlist.is_live);
    }

    #[test]
    fn non_playlist_is_rejected() {
        assert!(parse_media_playlist("<html>portal error</html>", &base()).is_err());
    }

    #[test]
    fn master_variants_sorted_by_bandwidth() {
        let variants = parse_master_variants(MASTER_PLAYLIST, &base());
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0].0, 2_400_000);
        assert!(variants[0].1.as_str().ends_with("high/index.m3u8"));
    }

    #[test]
    fn rewrite_points_segments_at_proxy() {
        let rewritten = rewrite_playlist(MEDIA_PLAYLIST, &base(), "/livetv/stream/abc/segment");
        assert!(rewritten.contains("#EXT-X-TARGETDURATION:6"));
        assert!(rewritten.contains(
            "/livetv/stream/abc/segment?u=http%3A%2F%2Fportal.example.com%2Fhls%2Fstream%2Fseg_001.ts"
        ));
        assert!(!rewritten.contains("\nseg_001.ts"));
    }

    #[test]
    fn emitted_set_is_bounded_and_deduplicates() {
        let mut set = EmittedSet::new(3);
        for i in 0..5 {
            set.insert(format!("u{i}"));
        }
        assert!(!set.contains("u0"));
        assert!(!set.contains("u1"));
        assert!(set.contains("u2"));
        assert!(set.contains("u4"));

        set.insert("u4".to_string());
        assert_eq!(set.order.len(), 3);
    }
}
