//! Live-TV streaming endpoints
//!
//! `GET /livetv/stream/{lineupId}` defaults to HLS→TS conversion;
//! `?format=ts` pipes the upstream direct TS stream and `?format=hls`
//! returns a rewritten playlist whose segment URLs point back at the
//! segment proxy below it. Resolution failures surface before the body
//! starts so clients get a real status code.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::app::AppState;
use crate::error::StreamError;
use crate::livetv::hls::{is_master_playlist, parse_master_variants, provider_headers, rewrite_playlist};
use crate::livetv::types::StreamFormat;
use crate::net::ssrf;

use super::stream_error_response;

const TS_CONTENT_TYPE: &str = "video/mp2t";
const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const HLS_CACHE_CONTROL: &str = "public, max-age=2, stale-while-revalidate=5";

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SegmentParams {
    pub u: String,
}

async fn stream_get(
    State(state): State<AppState>,
    Path(lineup_id): Path<Uuid>,
    Query(params): Query<StreamParams>,
) -> Response {
    match params.format.as_deref() {
        Some("hls") => serve_rewritten_playlist(&state, lineup_id).await,
        Some("ts") => {
            // Surface resolution failures before committing to a body
            if let Err(e) = state.resolver.resolve(lineup_id, StreamFormat::Ts, false).await {
                return stream_error_response(e);
            }
            let stream = state.direct.stream(lineup_id);
            ts_response(Body::from_stream(stream))
        }
        _ => {
            if let Err(e) = state.resolver.resolve(lineup_id, StreamFormat::Hls, false).await {
                return stream_error_response(e);
            }
            let stream = state.hls.stream(lineup_id);
            ts_response(Body::from_stream(stream))
        }
    }
}

async fn stream_head(
    State(state): State<AppState>,
    Path(lineup_id): Path<Uuid>,
    Query(params): Query<StreamParams>,
) -> Response {
    let (format, content_type, cache_control) = match params.format.as_deref() {
        Some("hls") => (StreamFormat::Hls, HLS_CONTENT_TYPE, HLS_CACHE_CONTROL),
        _ => (StreamFormat::Ts, TS_CONTENT_TYPE, "no-store"),
    };

    if let Err(e) = state.resolver.resolve(lineup_id, format, false).await {
        return stream_error_response(e);
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
    )
        .into_response()
}

/// CORS preflight; the app-level CORS layer fills in the allow headers
async fn stream_options() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Fetch the upstream playlist and rewrite segment URIs through the proxy
async fn serve_rewritten_playlist(state: &AppState, lineup_id: Uuid) -> Response {
    let resolved = match state
        .resolver
        .resolve(lineup_id, StreamFormat::Hls, true)
        .await
    {
        Ok(r) => r,
        Err(e) => return stream_error_response(e),
    };

    let headers = provider_headers(&resolved.provider_headers);
    let url = match Url::parse(&resolved.url) {
        Ok(u) => u,
        Err(e) => {
            return stream_error_response(StreamError::Upstream(format!(
                "resolved URL invalid: {e}"
            )));
        }
    };

    let response = match ssrf::fetch_validated(&state.http, url, &headers).await {
        Ok(r) => r,
        Err(e) => return stream_error_response(e),
    };
    let mut final_url = response.url().clone();
    let mut content = match response.text().await {
        Ok(c) => c,
        Err(e) => {
            return stream_error_response(StreamError::Upstream(format!(
                "playlist read failed: {e}"
            )));
        }
    };

    if !content.starts_with("#EXTM3U") {
        return stream_error_response(StreamError::InvalidPlaylist(
            "upstream did not return an HLS playlist".to_string(),
        ));
    }

    if is_master_playlist(&content) {
        let variants = parse_master_variants(&content, &final_url);
        let Some((_, variant_url)) = variants.into_iter().next() else {
            return stream_error_response(StreamError::InvalidPlaylist(
                "master playlist with no variants".to_string(),
            ));
        };
        let response = match ssrf::fetch_validated(&state.http, variant_url, &headers).await {
            Ok(r) => r,
            Err(e) => return stream_error_response(e),
        };
        final_url = response.url().clone();
        content = match response.text().await {
            Ok(c) => c,
            Err(e) => {
                return stream_error_response(StreamError::Upstream(format!(
                    "variant read failed: {e}"
                )));
            }
        };
    }

    let proxy = format!("/livetv/stream/{lineup_id}/segment");
    let rewritten = rewrite_playlist(&content, &final_url, &proxy);

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HLS_CONTENT_TYPE),
            (header::CACHE_CONTROL, HLS_CACHE_CONTROL),
        ],
        rewritten,
    )
        .into_response()
}

/// Proxy one rewritten segment URL, SSRF-validated like everything else
async fn segment_proxy(
    State(state): State<AppState>,
    Path(lineup_id): Path<Uuid>,
    Query(params): Query<SegmentParams>,
) -> Response {
    debug!(lineup_id = %lineup_id, "Proxying HLS segment");

    let url = match Url::parse(&params.u) {
        Ok(u) => u,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "invalid segment URL").into_response();
        }
    };

    let response =
        match ssrf::fetch_validated(&state.http, url, &header::HeaderMap::new()).await {
            Ok(r) => r,
            Err(e) => return stream_error_response(e),
        };

    if !response.status().is_success() {
        return stream_error_response(StreamError::Upstream(format!(
            "segment fetch returned HTTP {}",
            response.status()
        )));
    }

    let body = Body::from_stream(response.bytes_stream());
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, TS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

fn ts_response(body: Body) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, TS_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-store"),
        ],
        body,
    )
        .into_response()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/livetv/stream/{lineup_id}",
            get(stream_get).head(stream_head).options(stream_options),
        )
        .route("/livetv/stream/{lineup_id}/segment", get(segment_proxy))
}
