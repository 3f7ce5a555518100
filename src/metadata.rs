//! Metadata collaborator interface
//!
//! TMDB-shaped lookups consumed by the search orchestrator for ID
//! enrichment. Implementations live outside the core; every failure here is
//! non-fatal and callers degrade to the un-enriched criteria.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// External identifiers known for a movie or show
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalIds {
    pub imdb_id: Option<String>,
    pub tmdb_id: Option<i64>,
    pub tvdb_id: Option<i64>,
    pub tvmaze_id: Option<i64>,
}

/// Minimal movie projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieSummary {
    pub tmdb_id: i64,
    pub title: String,
    pub year: Option<i32>,
    pub imdb_id: Option<String>,
}

/// Minimal TV show projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvShowSummary {
    pub tmdb_id: i64,
    pub name: String,
    pub first_air_year: Option<i32>,
    pub external_ids: ExternalIds,
}

/// Minimal season projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeasonSummary {
    pub season_number: u32,
    pub episode_count: u32,
}

/// Result of a find-by-external-id lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindResult {
    pub movies: Vec<MovieSummary>,
    pub tv_shows: Vec<TvShowSummary>,
}

/// TMDB-shaped metadata client
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn get_movie_external_ids(&self, tmdb_id: i64) -> Result<ExternalIds>;

    async fn get_tv_external_ids(&self, tmdb_id: i64) -> Result<ExternalIds>;

    async fn get_season(&self, tmdb_id: i64, season_number: u32) -> Result<SeasonSummary>;

    /// Look up by an external id such as `tt1234567`
    async fn find_by_external_id(&self, external_id: &str) -> Result<FindResult>;

    async fn search_movies(&self, query: &str, year: Option<i32>) -> Result<Vec<MovieSummary>>;

    async fn search_tv(&self, query: &str) -> Result<Vec<TvShowSummary>>;

    async fn get_movie(&self, tmdb_id: i64) -> Result<MovieSummary>;

    async fn get_tv_show(&self, tmdb_id: i64) -> Result<TvShowSummary>;
}
