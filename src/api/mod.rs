//! HTTP route definitions
//!
//! Search and health live under `/api`; the streaming surfaces
//! (`/livetv/stream/...`, `/usenet/stream/...`) sit at the root so media
//! clients can hit them directly.

pub mod health;
pub mod indexers;
pub mod livetv;
pub mod search;
pub mod usenet;

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::StreamError;

/// Map a streaming error onto the HTTP surface
pub fn stream_error_response(error: StreamError) -> Response {
    match &error {
        StreamError::NotFound(what) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("{what} not found") })),
        )
            .into_response(),

        StreamError::RequiresExtraction(reason) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": reason, "reason": "requires_extraction" })),
        )
            .into_response(),

        StreamError::RangeNotSatisfiable { total } => (
            StatusCode::RANGE_NOT_SATISFIABLE,
            [(header::CONTENT_RANGE, format!("bytes */{total}"))],
        )
            .into_response(),

        StreamError::SsrfBlocked(_) => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),

        StreamError::AllSourcesFailed { .. } => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),

        _ => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response(),
    }
}
