//! Integration tests for the HTTP surface
//!
//! Drives the real router with in-memory services: search returns a valid
//! empty result with no indexers configured, streaming endpoints map
//! errors to the documented status codes, and range semantics produce
//! 206/416 with the right headers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use tower::ServiceExt;

use fetcharr::app::{AppState, build_app};
use fetcharr::config::Config;
use fetcharr::indexer::IndexerStatusTracker;
use fetcharr::livetv::provider::MemoryLineupStore;
use fetcharr::livetv::{
    ClientPool, DirectStreamer, HlsToTsConverter, ProviderRegistry, StreamUrlResolver, UrlCache,
};
use fetcharr::ratelimit::SearchRateLimiters;
use fetcharr::search::{ReleaseCache, SearchOrchestrator};
use fetcharr::usenet::{
    MountInfo, MountRegistry, MountStatus, NntpManager, NzbFileEntry, NzbSegment,
    UsenetStreamService,
};

fn test_config() -> Config {
    Config {
        host: None,
        port: 0,
        search_concurrency: 5,
        search_timeout: Duration::from_secs(5),
        release_cache_ttl: Duration::from_secs(300),
        release_cache_capacity: 100,
        indexers: vec![],
        nntp_providers: vec![],
        yenc_strict_crc: false,
        stream_data_timeout: Duration::from_secs(10),
        usenet_prefetch_segments: 4,
    }
}

fn media_file(name: &str, segment_sizes: &[u64]) -> NzbFileEntry {
    NzbFileEntry {
        subject: name.to_string(),
        filename: name.to_string(),
        poster: String::new(),
        date: 0,
        groups: vec![],
        segments: segment_sizes
            .iter()
            .enumerate()
            .map(|(i, &bytes)| NzbSegment {
                message_id: format!("{name}-{}@post", i + 1),
                number: (i + 1) as u32,
                bytes,
            })
            .collect(),
        size: segment_sizes.iter().sum(),
    }
}

fn app_with_mounts(mounts: Vec<MountInfo>) -> axum::Router {
    let config = Arc::new(test_config());

    let tracker = Arc::new(IndexerStatusTracker::default());
    let orchestrator = Arc::new(SearchOrchestrator::new(
        tracker,
        Arc::new(SearchRateLimiters::default()),
        Arc::new(ReleaseCache::new(
            config.release_cache_ttl,
            config.release_cache_capacity,
        )),
    ));

    let resolver = Arc::new(StreamUrlResolver::new(
        Arc::new(ProviderRegistry::new()),
        Arc::new(MemoryLineupStore::new()),
        Arc::new(ClientPool::new()),
        Arc::new(UrlCache::new()),
    ));

    let registry = Arc::new(MountRegistry::new());
    for mount in mounts {
        registry.insert(mount);
    }
    let nntp = Arc::new(NntpManager::new(vec![], false));
    let usenet = Arc::new(UsenetStreamService::new(registry, nntp, 4));

    let state = AppState {
        config,
        orchestrator,
        drivers: Arc::new(vec![]),
        resolver: resolver.clone(),
        hls: Arc::new(HlsToTsConverter::new(resolver.clone())),
        direct: Arc::new(DirectStreamer::new(resolver)),
        usenet,
        http: AppState::build_http_client(),
    };

    build_app(state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = app_with_mounts(vec![]);
    let response = app
        .oneshot(Request::get("/api/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn search_with_no_indexers_is_a_valid_empty_200() {
    let app = app_with_mounts(vec![]);
    let response = app
        .oneshot(
            Request::get("/api/search?type=tv&q=My+Show&season=1&episode=5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["total_results"], 0);
    assert_eq!(json["releases"].as_array().unwrap().len(), 0);
    assert!(json["rejected_indexers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn indexer_listing_is_empty_without_config() {
    let app = app_with_mounts(vec![]);
    let response = app
        .oneshot(Request::get("/api/indexers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["indexers"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_mount_is_404() {
    let app = app_with_mounts(vec![]);
    let response = app
        .oneshot(
            Request::get("/usenet/stream/nope/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_file_index_is_404() {
    let app = app_with_mounts(vec![MountInfo {
        id: "m1".to_string(),
        nzb_hash: "h".to_string(),
        status: MountStatus::Ready,
        media_files: vec![media_file("a.mkv", &[1000])],
    }]);
    let response = app
        .oneshot(
            Request::get("/usenet/stream/m1/9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rar_only_mount_is_403_with_reason() {
    let app = app_with_mounts(vec![MountInfo {
        id: "rarred".to_string(),
        nzb_hash: "h".to_string(),
        status: MountStatus::RequiresExtraction,
        media_files: vec![],
    }]);
    let response = app
        .oneshot(
            Request::get("/usenet/stream/rarred/0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let json = body_json(response).await;
    assert_eq!(json["reason"], "requires_extraction");
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("RAR")
    );
}

#[tokio::test]
async fn invalid_range_is_416_with_content_range() {
    let app = app_with_mounts(vec![MountInfo {
        id: "m1".to_string(),
        nzb_hash: "h".to_string(),
        status: MountStatus::Ready,
        media_files: vec![media_file("a.mkv", &[1000, 1000])],
    }]);
    let response = app
        .oneshot(
            Request::get("/usenet/stream/m1/0")
                .header(header::RANGE, "bytes=-0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_RANGE)
            .unwrap()
            .to_str()
            .unwrap(),
        "bytes */2000"
    );
}

#[tokio::test]
async fn partial_request_gets_206_with_range_headers() {
    let app = app_with_mounts(vec![MountInfo {
        id: "m1".to_string(),
        nzb_hash: "h".to_string(),
        status: MountStatus::Ready,
        media_files: vec![media_file("a.mkv", &[1000, 1000])],
    }]);
    let response = app
        .oneshot(
            Request::get("/usenet/stream/m1/0")
                .header(header::RANGE, "bytes=100-299")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(
        headers.get(header::CONTENT_RANGE).unwrap().to_str().unwrap(),
        "bytes 100-299/2000"
    );
    assert_eq!(
        headers.get(header::CONTENT_LENGTH).unwrap().to_str().unwrap(),
        "200"
    );
    assert_eq!(
        headers.get(header::ACCEPT_RANGES).unwrap().to_str().unwrap(),
        "bytes"
    );
    assert_eq!(
        headers.get(header::CONTENT_TYPE).unwrap().to_str().unwrap(),
        "video/x-matroska"
    );
}

#[tokio::test]
async fn unknown_lineup_is_404() {
    let app = app_with_mounts(vec![]);
    let lineup = uuid::Uuid::new_v4();
    let response = app
        .oneshot(
            Request::get(format!("/livetv/stream/{lineup}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn livetv_options_preflight_succeeds() {
    let app = app_with_mounts(vec![]);
    let lineup = uuid::Uuid::new_v4();
    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri(format!("/livetv/stream/{lineup}"))
                .header(header::ORIGIN, "http://player.example")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_success() || response.status() == StatusCode::NO_CONTENT);
    assert!(
        response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
}
