//! Application state and HTTP router construction

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::indexer::IndexerDriver;
use crate::livetv::{DirectStreamer, HlsToTsConverter, StreamUrlResolver};
use crate::search::SearchOrchestrator;
use crate::usenet::UsenetStreamService;

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<SearchOrchestrator>,
    pub drivers: Arc<Vec<Arc<dyn IndexerDriver>>>,
    pub resolver: Arc<StreamUrlResolver>,
    pub hls: Arc<HlsToTsConverter>,
    pub direct: Arc<DirectStreamer>,
    pub usenet: Arc<UsenetStreamService>,
    /// Redirect-free client for playlist rewriting and segment proxying
    pub http: reqwest::Client,
}

impl AppState {
    /// Redirect-free client; redirects are followed manually with SSRF
    /// checks on every hop.
    pub fn build_http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("reqwest client construction is infallible with static config")
    }
}

/// Build the full Axum router: /api, streaming surfaces, layers
pub fn build_app(state: AppState) -> Router<()> {
    let api = api::search::router()
        .merge(api::indexers::router())
        .merge(api::health::router());

    Router::new()
        .nest("/api", api)
        .merge(api::livetv::router())
        .merge(api::usenet::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
