//! Integration tests for the usenet streaming pipeline
//!
//! A minimal in-process NNTP server (plain TCP) serves yEnc articles so
//! the whole stack runs for real: connection, pool, manager failover,
//! single-flight dedup, segment store reconciliation, and range streaming.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use fetcharr::config::NntpProviderConfig;
use fetcharr::usenet::{
    ByteRange, MountInfo, MountRegistry, MountStatus, NntpManager, NzbFileEntry, NzbSegment,
    UsenetStreamService, encode_yenc,
};

/// Articles served by the mock, keyed by bare message ID
type ArticleMap = Arc<HashMap<String, Vec<u8>>>;

struct MockNntpServer {
    addr: SocketAddr,
    /// Every BODY message ID received, in order
    requested: Arc<Mutex<Vec<String>>>,
}

impl MockNntpServer {
    async fn spawn(articles: ArticleMap, response_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requested: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let log = requested.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let articles = articles.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    serve_connection(socket, articles, log, response_delay).await;
                });
            }
        });

        Self { addr, requested }
    }

    fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }

    fn provider(&self, priority: i32) -> NntpProviderConfig {
        NntpProviderConfig {
            host: "127.0.0.1".to_string(),
            port: self.addr.port(),
            use_tls: false,
            username: None,
            password: None,
            max_connections: 2,
            priority,
        }
    }
}

async fn serve_connection(
    socket: tokio::net::TcpStream,
    articles: ArticleMap,
    log: Arc<Mutex<Vec<String>>>,
    response_delay: Duration,
) {
    let mut reader = BufReader::new(socket);
    if reader
        .get_mut()
        .write_all(b"200 mock news server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let command = line.trim_end();

        if let Some(mid) = command.strip_prefix("BODY ") {
            let mid = mid.trim_start_matches('<').trim_end_matches('>').to_string();
            log.lock().push(mid.clone());
            tokio::time::sleep(response_delay).await;

            match articles.get(&mid) {
                Some(article) => {
                    let header = format!("222 0 <{mid}>\r\n");
                    if reader.get_mut().write_all(header.as_bytes()).await.is_err() {
                        break;
                    }
                    if write_dot_stuffed(reader.get_mut(), article).await.is_err() {
                        break;
                    }
                }
                None => {
                    if reader
                        .get_mut()
                        .write_all(b"430 no such article\r\n")
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        } else if command.starts_with("DATE") {
            let _ = reader.get_mut().write_all(b"111 20250101120000\r\n").await;
        } else if command.starts_with("QUIT") {
            let _ = reader.get_mut().write_all(b"205 goodbye\r\n").await;
            break;
        } else {
            let _ = reader.get_mut().write_all(b"500 unknown command\r\n").await;
        }
    }
}

async fn write_dot_stuffed(
    socket: &mut tokio::net::TcpStream,
    article: &[u8],
) -> std::io::Result<()> {
    for line in article.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        if line.starts_with(b".") {
            socket.write_all(b".").await?;
        }
        socket.write_all(line).await?;
        socket.write_all(b"\r\n").await?;
    }
    socket.write_all(b".\r\n").await
}

/// Build a media file of `count` segments, each `segment_size` bytes of a
/// distinct fill value, plus the encoded articles the mock serves.
fn build_file(
    name: &str,
    count: usize,
    segment_size: usize,
) -> (NzbFileEntry, HashMap<String, Vec<u8>>) {
    let mut segments = Vec::new();
    let mut articles = HashMap::new();

    for i in 0..count {
        let mid = format!("seg-{i}@mock");
        let payload = vec![(i % 251) as u8; segment_size];
        articles.insert(mid.clone(), encode_yenc(&payload, name, 128));
        segments.push(NzbSegment {
            message_id: mid,
            number: (i + 1) as u32,
            bytes: segment_size as u64,
        });
    }

    let file = NzbFileEntry {
        subject: format!("\"{name}\" yEnc (1/{count})"),
        filename: name.to_string(),
        poster: String::new(),
        date: 0,
        groups: vec!["alt.binaries.test".to_string()],
        segments,
        size: (count * segment_size) as u64,
    };

    (file, articles)
}

fn mount_for(file: NzbFileEntry) -> MountInfo {
    MountInfo {
        id: "m1".to_string(),
        nzb_hash: "deadbeef".to_string(),
        status: MountStatus::Ready,
        media_files: vec![file],
    }
}

async fn collect_stream(
    mut stream: fetcharr::usenet::GuardedStream,
) -> Result<Vec<u8>, fetcharr::error::StreamError> {
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.extend_from_slice(&item?);
    }
    Ok(out)
}

#[tokio::test]
async fn range_request_streams_exactly_the_requested_bytes() {
    let segment_size = 500_000usize;
    let (file, articles) = build_file("movie.mkv", 20, segment_size);
    let server = MockNntpServer::spawn(Arc::new(articles), Duration::ZERO).await;

    let registry = Arc::new(MountRegistry::new());
    registry.insert(mount_for(file));
    let manager = Arc::new(NntpManager::new(vec![server.provider(1)], false));
    let service = UsenetStreamService::new(registry, manager, 4);

    let response = service
        .open_stream("m1", 0, Some("bytes=1000000-1999999"))
        .await
        .unwrap();

    assert_eq!(response.total_size, 10_000_000);
    assert_eq!(
        response.range,
        Some(ByteRange {
            start: 1_000_000,
            end: 1_999_999
        })
    );

    let bytes = collect_stream(response.stream).await.unwrap();
    assert_eq!(bytes.len(), 1_000_000);
    assert!(bytes[..segment_size].iter().all(|&b| b == 2));
    assert!(bytes[segment_size..].iter().all(|&b| b == 3));

    // Give best-effort prefetch tasks a moment to land
    tokio::time::sleep(Duration::from_millis(200)).await;

    let mut requested = server.requested();
    requested.sort();
    requested.dedup();
    assert_eq!(
        requested,
        vec!["seg-2@mock".to_string(), "seg-3@mock".to_string()],
        "only segments intersecting the range are fetched"
    );
}

#[tokio::test]
async fn full_file_stream_reassembles_content() {
    let (file, articles) = build_file("clip.mp4", 4, 1_000);
    let server = MockNntpServer::spawn(Arc::new(articles), Duration::ZERO).await;

    let registry = Arc::new(MountRegistry::new());
    registry.insert(mount_for(file));
    let manager = Arc::new(NntpManager::new(vec![server.provider(1)], false));
    let service = UsenetStreamService::new(registry, manager, 2);

    let response = service.open_stream("m1", 0, None).await.unwrap();
    assert!(response.range.is_none());

    let bytes = collect_stream(response.stream).await.unwrap();
    assert_eq!(bytes.len(), 4_000);
    for i in 0..4 {
        assert!(bytes[i * 1000..(i + 1) * 1000].iter().all(|&b| b == i as u8));
    }
}

#[tokio::test]
async fn provider_failover_skips_missing_articles() {
    let payload = b"failover payload".repeat(100);
    let article = encode_yenc(&payload, "x.bin", 128);

    // P1 has nothing; P2 has the article
    let empty = MockNntpServer::spawn(Arc::new(HashMap::new()), Duration::ZERO).await;
    let full = MockNntpServer::spawn(
        Arc::new(HashMap::from([("part@post".to_string(), article)])),
        Duration::ZERO,
    )
    .await;

    let manager = NntpManager::new(vec![empty.provider(1), full.provider(2)], false);

    let decoded = manager.get_decoded_article("part@post").await.unwrap();
    assert_eq!(decoded.data, payload);

    assert_eq!(empty.requested(), vec!["part@post".to_string()]);
    assert_eq!(full.requested(), vec!["part@post".to_string()]);

    // An article-level miss never advances the provider's failure count
    assert_eq!(manager.pools()[0].health().consecutive_failures, 0);
    assert!(!manager.pools()[0].in_backoff());
}

#[tokio::test]
async fn all_providers_missing_reports_per_host_outcomes() {
    let p1 = MockNntpServer::spawn(Arc::new(HashMap::new()), Duration::ZERO).await;
    let p2 = MockNntpServer::spawn(Arc::new(HashMap::new()), Duration::ZERO).await;

    let manager = NntpManager::new(vec![p1.provider(1), p2.provider(2)], false);
    let err = manager.get_decoded_article("gone@post").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("tried 2 providers"));
    assert!(message.contains("127.0.0.1"));
}

#[tokio::test]
async fn concurrent_fetches_of_one_article_hit_the_wire_once() {
    let payload = vec![42u8; 5_000];
    let article = encode_yenc(&payload, "once.bin", 128);
    let server = MockNntpServer::spawn(
        Arc::new(HashMap::from([("solo@post".to_string(), article)])),
        Duration::from_millis(50),
    )
    .await;

    let manager = Arc::new(NntpManager::new(vec![server.provider(1)], false));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager.get_decoded_article("solo@post").await.unwrap()
        }));
    }
    for handle in handles {
        let decoded = handle.await.unwrap();
        assert_eq!(decoded.data, payload);
    }

    assert_eq!(
        server.requested().len(),
        1,
        "exactly one wire fetch across all callers"
    );
}

#[tokio::test]
async fn pool_close_rejects_queued_requests() {
    let server = MockNntpServer::spawn(Arc::new(HashMap::new()), Duration::ZERO).await;
    let manager = NntpManager::new(vec![server.provider(1)], false);

    manager.close().await;

    let err = manager.get_decoded_article("any@post").await.unwrap_err();
    assert!(err.to_string().contains("Pool is closing"));
}
