//! Indexer listing and health endpoints

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::indexer::IndexerCapabilities;

#[derive(Serialize)]
pub struct IndexerSummary {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub enabled: bool,
    pub priority: i32,
    pub consecutive_failures: u32,
    pub in_backoff: bool,
    pub last_error: Option<String>,
}

#[derive(Serialize)]
pub struct IndexerListResponse {
    pub indexers: Vec<IndexerSummary>,
}

#[derive(Deserialize)]
pub struct IndexerUpdate {
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
}

async fn list_indexers(State(state): State<AppState>) -> Json<IndexerListResponse> {
    let tracker = state.orchestrator.status_tracker();
    let indexers = state
        .drivers
        .iter()
        .map(|driver| {
            let status = tracker.get_status_sync(driver.id());
            IndexerSummary {
                id: driver.id().to_string(),
                name: driver.name().to_string(),
                base_url: driver.base_url().to_string(),
                enabled: status.is_enabled,
                priority: status.priority,
                consecutive_failures: status.consecutive_failures,
                in_backoff: !tracker.can_use(driver.id()),
                last_error: status.last_error,
            }
        })
        .collect();

    Json(IndexerListResponse { indexers })
}

async fn get_indexer_caps(
    State(state): State<AppState>,
    Path(indexer_id): Path<String>,
) -> Result<Json<IndexerCapabilities>, StatusCode> {
    state
        .drivers
        .iter()
        .find(|d| d.id() == indexer_id)
        .map(|d| Json(d.capabilities().clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn update_indexer(
    State(state): State<AppState>,
    Path(indexer_id): Path<String>,
    Json(update): Json<IndexerUpdate>,
) -> impl IntoResponse {
    if !state.drivers.iter().any(|d| d.id() == indexer_id) {
        return StatusCode::NOT_FOUND;
    }

    let tracker = state.orchestrator.status_tracker();
    if let Some(enabled) = update.enabled {
        tracker.set_enabled(&indexer_id, enabled);
    }
    if let Some(priority) = update.priority {
        tracker.set_priority(&indexer_id, priority);
    }
    StatusCode::NO_CONTENT
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/indexers", get(list_indexers))
        .route("/indexers/{indexer_id}/caps", get(get_indexer_caps))
        .route("/indexers/{indexer_id}", put(update_indexer))
}
