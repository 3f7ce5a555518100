//! Fetcharr server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fetcharr::app::{AppState, build_app};
use fetcharr::config::Config;
use fetcharr::indexer::{IndexerDriver, IndexerStatusTracker, NewznabDriver};
use fetcharr::livetv::provider::MemoryLineupStore;
use fetcharr::livetv::{
    ClientPool, DirectStreamer, HlsToTsConverter, ProviderRegistry, StreamUrlResolver, UrlCache,
};
use fetcharr::ratelimit::SearchRateLimiters;
use fetcharr::search::{ReleaseCache, SearchOrchestrator};
use fetcharr::usenet::{MountRegistry, NntpManager, UsenetStreamService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fetcharr=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fetcharr");

    // Search core
    let tracker = Arc::new(IndexerStatusTracker::default());
    let limiters = Arc::new(SearchRateLimiters::default());
    let release_cache = Arc::new(ReleaseCache::new(
        config.release_cache_ttl,
        config.release_cache_capacity,
    ));
    let orchestrator = Arc::new(SearchOrchestrator::new(
        tracker.clone(),
        limiters,
        release_cache,
    ));

    let mut drivers: Vec<Arc<dyn IndexerDriver>> = Vec::new();
    for endpoint in &config.indexers {
        match NewznabDriver::new(endpoint) {
            Ok(driver) => {
                tracker.set_priority(driver.id(), endpoint.priority);
                drivers.push(Arc::new(driver));
            }
            Err(e) => {
                tracing::warn!(indexer = %endpoint.name, error = %e, "Failed to load indexer");
            }
        }
    }
    tracing::info!(indexers = drivers.len(), "Indexers loaded");

    // Live-TV core
    let providers = Arc::new(ProviderRegistry::new());
    let lineup_store = Arc::new(MemoryLineupStore::new());
    let client_pool = Arc::new(ClientPool::new());
    let url_cache = Arc::new(UrlCache::new());
    let resolver = Arc::new(StreamUrlResolver::new(
        providers,
        lineup_store,
        client_pool,
        url_cache,
    ));
    let hls = Arc::new(HlsToTsConverter::new(resolver.clone()));
    let direct = Arc::new(DirectStreamer::with_data_timeout(
        resolver.clone(),
        config.stream_data_timeout,
    ));

    // Usenet core
    let nntp = Arc::new(NntpManager::new(
        config.nntp_providers.clone(),
        config.yenc_strict_crc,
    ));
    let mounts = Arc::new(MountRegistry::new());
    let usenet = Arc::new(UsenetStreamService::new(
        mounts,
        nntp.clone(),
        config.usenet_prefetch_segments,
    ));

    let state = AppState {
        config: config.clone(),
        orchestrator,
        drivers: Arc::new(drivers),
        resolver,
        hls,
        direct,
        usenet,
        http: AppState::build_http_client(),
    };

    let app = build_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    nntp.close().await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
