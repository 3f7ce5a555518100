//! Core types shared between indexer drivers and the search orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type of search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// General text search
    #[default]
    Basic,
    /// TV show search (supports season/episode)
    Tv,
    /// Movie search
    Movie,
    /// Music search
    Music,
    /// Book search
    Book,
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchType::Basic => write!(f, "search"),
            SearchType::Tv => write!(f, "tvsearch"),
            SearchType::Movie => write!(f, "movie"),
            SearchType::Music => write!(f, "music"),
            SearchType::Book => write!(f, "book"),
        }
    }
}

/// Where a search originated; indexers can opt out of either path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    /// User-triggered search from the UI
    #[default]
    Interactive,
    /// Scheduled/background search
    Automatic,
}

/// Transfer protocol of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadProtocol {
    Torrent,
    Usenet,
    Streaming,
}

/// Query-text shapes a text-search indexer understands.
///
/// Indexers without season/episode parameters match on title tokens; the
/// formats here enumerate the token shapes worth trying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchTextFormat {
    /// `Show S01E05` / movie `Title 2025`
    Standard,
    /// `Show 1x05`
    European,
    /// `Show 105`
    Compact,
    /// Movie title without the year token
    NoYear,
}

/// Which tier produced an indexer's results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Id,
    Text,
}

/// A search request as the orchestrator and drivers see it.
///
/// For TV criteria the `(season, episode)` pair is `(s, e)`, `(s, None)`,
/// or `(None, None)`; an episode without a season is never constructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// The type of search
    pub search_type: SearchType,

    /// Free-text search term
    pub query: Option<String>,

    /// Maximum number of results
    pub limit: Option<usize>,

    /// Categories to search in (Newznab category IDs)
    pub categories: Vec<i32>,

    /// Explicit indexer-id allow-list; empty means all
    pub indexer_ids: Vec<String>,

    /// Interactive or automatic origin
    pub search_source: SearchSource,

    // External IDs
    /// IMDB ID (e.g., "tt1234567")
    pub imdb_id: Option<String>,
    /// TMDB ID
    pub tmdb_id: Option<i64>,
    /// TVDB ID
    pub tvdb_id: Option<i64>,
    /// TVMaze ID
    pub tvmaze_id: Option<i64>,

    // TV-specific fields
    /// Season number
    pub season: Option<u32>,
    /// Episode number
    pub episode: Option<u32>,

    // Movie-specific fields
    /// Release year
    pub year: Option<i32>,

    // Music-specific fields
    pub artist: Option<String>,
    pub album: Option<String>,

    // Book-specific fields
    pub author: Option<String>,
    pub book_title: Option<String>,

    /// Text-format hint set by the tiering pass for text attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_episode_format: Option<SearchTextFormat>,
}

impl SearchCriteria {
    pub fn basic(term: &str) -> Self {
        Self {
            search_type: SearchType::Basic,
            query: Some(term.to_string()),
            ..Default::default()
        }
    }

    pub fn tv(term: &str) -> Self {
        Self {
            search_type: SearchType::Tv,
            query: Some(term.to_string()),
            ..Default::default()
        }
    }

    pub fn movie(term: &str) -> Self {
        Self {
            search_type: SearchType::Movie,
            query: Some(term.to_string()),
            ..Default::default()
        }
    }

    pub fn with_season_episode(mut self, season: u32, episode: Option<u32>) -> Self {
        self.season = Some(season);
        self.episode = episode;
        self
    }

    pub fn with_imdb(mut self, imdb_id: &str) -> Self {
        self.imdb_id = Some(imdb_id.to_string());
        self
    }

    pub fn with_tvdb(mut self, tvdb_id: i64) -> Self {
        self.tvdb_id = Some(tvdb_id);
        self
    }

    pub fn with_tmdb(mut self, tmdb_id: i64) -> Self {
        self.tmdb_id = Some(tmdb_id);
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_source(mut self, source: SearchSource) -> Self {
        self.search_source = source;
        self
    }

    /// Whether the criteria carries any ID an indexer could search by
    pub fn has_searchable_id(&self) -> bool {
        self.imdb_id.is_some()
            || self.tmdb_id.is_some()
            || self.tvdb_id.is_some()
            || self.tvmaze_id.is_some()
    }

    /// Whether the criteria carries usable query text
    pub fn has_query_text(&self) -> bool {
        self.query.as_deref().is_some_and(|q| !q.trim().is_empty())
    }

    /// IMDB ID without the "tt" prefix
    pub fn imdb_id_short(&self) -> Option<String> {
        self.imdb_id
            .as_ref()
            .map(|id| id.trim_start_matches("tt").to_string())
    }

    /// Season/episode token in the given text format, e.g. `S01E05` / `1x05` / `105`
    pub fn episode_token(&self, format: SearchTextFormat) -> Option<String> {
        let season = self.season?;
        match (format, self.episode) {
            (SearchTextFormat::Standard, Some(ep)) => Some(format!("S{:02}E{:02}", season, ep)),
            (SearchTextFormat::Standard, None) => Some(format!("S{:02}", season)),
            (SearchTextFormat::European, Some(ep)) => Some(format!("{}x{:02}", season, ep)),
            (SearchTextFormat::European, None) => Some(format!("{}x", season)),
            (SearchTextFormat::Compact, Some(ep)) => Some(format!("{}{:02}", season, ep)),
            (SearchTextFormat::Compact, None) => None,
            (SearchTextFormat::NoYear, _) => None,
        }
    }
}

/// A single release advertised by an indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseResult {
    /// Indexer-unique identifier; for streaming releases this is the
    /// opaque content key
    pub guid: String,

    /// The indexer that found this release
    pub indexer_id: String,
    pub indexer_name: String,

    /// Release title
    pub title: String,

    /// File size in bytes (0 when unknown)
    pub size: i64,

    /// Publication date
    pub publish_date: Option<DateTime<Utc>>,

    // Peer info (torrent protocol)
    pub seeders: Option<i32>,
    pub leechers: Option<i32>,

    /// Number of times grabbed
    pub grabs: Option<i32>,

    /// Newznab category IDs
    pub categories: Vec<i32>,

    /// Download link (NZB / torrent file)
    pub download_url: Option<String>,

    /// Details page URL
    pub details_url: Option<String>,

    /// Torrent info hash
    pub info_hash: Option<String>,

    /// Magnet URI
    pub magnet_url: Option<String>,

    /// Transfer protocol
    pub protocol: DownloadProtocol,

    /// Every indexer that advertised this release; populated by dedup fan-in
    pub source_indexers: Vec<String>,
}

impl ReleaseResult {
    /// Create a new release with minimal info
    pub fn new(title: &str, guid: &str, indexer_id: &str, indexer_name: &str) -> Self {
        Self {
            guid: guid.to_string(),
            indexer_id: indexer_id.to_string(),
            indexer_name: indexer_name.to_string(),
            title: title.to_string(),
            size: 0,
            publish_date: None,
            seeders: None,
            leechers: None,
            grabs: None,
            categories: vec![],
            download_url: None,
            details_url: None,
            info_hash: None,
            magnet_url: None,
            protocol: DownloadProtocol::Usenet,
            source_indexers: vec![indexer_name.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_tokens_per_format() {
        let c = SearchCriteria::tv("My Show").with_season_episode(1, Some(5));
        assert_eq!(c.episode_token(SearchTextFormat::Standard).unwrap(), "S01E05");
        assert_eq!(c.episode_token(SearchTextFormat::European).unwrap(), "1x05");
        assert_eq!(c.episode_token(SearchTextFormat::Compact).unwrap(), "105");

        let pack = SearchCriteria::tv("My Show").with_season_episode(2, None);
        assert_eq!(pack.episode_token(SearchTextFormat::Standard).unwrap(), "S02");
        assert_eq!(pack.episode_token(SearchTextFormat::Compact), None);
    }

    #[test]
    fn imdb_short_strips_prefix() {
        let c = SearchCriteria::movie("Heat").with_imdb("tt0113277");
        assert_eq!(c.imdb_id_short().unwrap(), "0113277");
    }

    #[test]
    fn searchable_id_detection() {
        assert!(!SearchCriteria::tv("x").has_searchable_id());
        assert!(SearchCriteria::tv("x").with_tvdb(123).has_searchable_id());
    }
}
