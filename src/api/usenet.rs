//! Usenet streaming endpoint
//!
//! `GET /usenet/stream/{mountId}/{fileIndex}` with HTTP Range support:
//! 206 + `Content-Range` for partial requests, 200 for full-file requests,
//! 403 for RAR-only mounts, 404 for unknown mounts or file indexes, and
//! 416 with `Content-Range: bytes */<size>` for unsatisfiable ranges.

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tracing::debug;

use crate::app::AppState;

use super::stream_error_response;

async fn usenet_stream(
    State(state): State<AppState>,
    Path((mount_id, file_index)): Path<(String, usize)>,
    headers: HeaderMap,
) -> Response {
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());

    debug!(
        mount_id = %mount_id,
        file_index = file_index,
        range = ?range_header,
        "Usenet stream request"
    );

    let response = match state
        .usenet
        .open_stream(&mount_id, file_index, range_header)
        .await
    {
        Ok(r) => r,
        Err(e) => return stream_error_response(e),
    };

    let content_type = mime_guess::from_path(&response.file_name)
        .first_or_octet_stream()
        .to_string();
    let total = response.total_size;
    let body = Body::from_stream(response.stream);

    match response.range {
        Some(range) => (
            StatusCode::PARTIAL_CONTENT,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CONTENT_RANGE, range.content_range(total)),
                (header::CONTENT_LENGTH, range.len().to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            body,
        )
            .into_response(),
        None => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, content_type),
                (header::CONTENT_LENGTH, total.to_string()),
                (header::ACCEPT_RANGES, "bytes".to_string()),
                (header::CACHE_CONTROL, "no-store".to_string()),
            ],
            body,
        )
            .into_response(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/usenet/stream/{mount_id}/{file_index}", get(usenet_stream))
}
