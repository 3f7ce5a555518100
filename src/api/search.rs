//! Search endpoints
//!
//! `GET /api/search` takes criteria as query parameters; `POST /api/search`
//! takes the criteria as JSON. Both return the orchestrator's merged
//! result. A search with no eligible indexers is still a 200 with an empty
//! release list and the rejection breakdown.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::app::AppState;
use crate::indexer::{SearchCriteria, SearchSource, SearchType};
use crate::search::{EnhancedSearchResult, SearchOptions, SearchResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQueryParams {
    #[serde(rename = "type")]
    pub search_type: Option<String>,
    pub q: Option<String>,
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub tvmaze_id: Option<i64>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub year: Option<i32>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub limit: Option<usize>,
    /// Comma-separated category IDs
    pub cat: Option<String>,
    /// Comma-separated indexer-id allow-list
    pub indexer_ids: Option<String>,
    pub source: Option<String>,
}

impl SearchQueryParams {
    fn into_criteria(self) -> SearchCriteria {
        let search_type = match self.search_type.as_deref() {
            Some("tv") | Some("tvsearch") => SearchType::Tv,
            Some("movie") => SearchType::Movie,
            Some("music") => SearchType::Music,
            Some("book") => SearchType::Book,
            _ => SearchType::Basic,
        };
        let search_source = match self.source.as_deref() {
            Some("automatic") => SearchSource::Automatic,
            _ => SearchSource::Interactive,
        };

        SearchCriteria {
            search_type,
            query: self.q,
            limit: self.limit,
            categories: split_numbers(self.cat.as_deref()),
            indexer_ids: split_strings(self.indexer_ids.as_deref()),
            search_source,
            imdb_id: self.imdb_id,
            tmdb_id: self.tmdb_id,
            tvdb_id: self.tvdb_id,
            tvmaze_id: self.tvmaze_id,
            season: self.season,
            episode: self.episode,
            year: self.year,
            artist: self.artist,
            album: self.album,
            author: self.author,
            book_title: self.title,
            preferred_episode_format: None,
        }
    }
}

fn split_numbers(raw: Option<&str>) -> Vec<i32> {
    raw.map(|s| s.split(',').filter_map(|v| v.trim().parse().ok()).collect())
        .unwrap_or_default()
}

fn split_strings(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

async fn search_get(
    State(state): State<AppState>,
    Query(params): Query<SearchQueryParams>,
) -> Json<SearchResult> {
    let criteria = params.into_criteria();
    run_search(state, criteria).await
}

async fn search_post(
    State(state): State<AppState>,
    Json(criteria): Json<SearchCriteria>,
) -> Json<SearchResult> {
    run_search(state, criteria).await
}

async fn search_enhanced_post(
    State(state): State<AppState>,
    Json(criteria): Json<SearchCriteria>,
) -> Json<EnhancedSearchResult> {
    let options = options_for(&state, &criteria);
    let result = state
        .orchestrator
        .search_enhanced(&state.drivers, &criteria, &options)
        .await;
    Json(result)
}

async fn run_search(state: AppState, criteria: SearchCriteria) -> Json<SearchResult> {
    let options = options_for(&state, &criteria);
    let result = state
        .orchestrator
        .search(&state.drivers, &criteria, &options)
        .await;
    Json(result)
}

fn options_for(state: &AppState, criteria: &SearchCriteria) -> SearchOptions {
    SearchOptions {
        concurrency: state.config.search_concurrency,
        timeout: state.config.search_timeout,
        search_source: criteria.search_source,
        ..Default::default()
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/search", get(search_get))
        .route("/search", post(search_post))
        .route("/search/enhanced", post(search_enhanced_post))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_params_build_tv_criteria() {
        let params = SearchQueryParams {
            search_type: Some("tv".to_string()),
            q: Some("My Show".to_string()),
            imdb_id: Some("tt1234567".to_string()),
            tmdb_id: None,
            tvdb_id: Some(123456),
            tvmaze_id: None,
            season: Some(1),
            episode: Some(5),
            year: None,
            artist: None,
            album: None,
            author: None,
            title: None,
            limit: Some(50),
            cat: Some("5000,5040".to_string()),
            indexer_ids: Some("a,b".to_string()),
            source: Some("automatic".to_string()),
        };

        let criteria = params.into_criteria();
        assert_eq!(criteria.search_type, SearchType::Tv);
        assert_eq!(criteria.search_source, SearchSource::Automatic);
        assert_eq!(criteria.categories, vec![5000, 5040]);
        assert_eq!(criteria.indexer_ids, vec!["a", "b"]);
        assert_eq!(criteria.season, Some(1));
        assert_eq!(criteria.limit, Some(50));
    }
}
