//! Indexer capability declarations
//!
//! Modeled after the Newznab `t=caps` response: which search types an
//! indexer offers, which parameters each type accepts, and which query-text
//! formats its text search understands. Immutable for the life of a session.

use serde::{Deserialize, Serialize};

use super::types::{SearchTextFormat, SearchType};

/// A search parameter an indexer accepts for some search type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParam {
    Q,
    Season,
    Ep,
    ImdbId,
    TmdbId,
    TvdbId,
    TvmazeId,
    Year,
    Genre,
    Artist,
    Album,
    Author,
    Title,
}

/// Capabilities of an indexer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerCapabilities {
    /// Whether basic text search is available
    pub search_available: bool,
    /// Whether TV search is available
    pub tv_search_available: bool,
    /// Whether movie search is available
    pub movie_search_available: bool,
    /// Whether music search is available
    pub music_search_available: bool,
    /// Whether book search is available
    pub book_search_available: bool,

    /// Parameters supported per search type
    pub tv_search_params: Vec<SearchParam>,
    pub movie_search_params: Vec<SearchParam>,
    pub music_search_params: Vec<SearchParam>,
    pub book_search_params: Vec<SearchParam>,

    /// Category IDs the indexer carries
    pub categories: Vec<i32>,

    /// Whether limit/offset pagination is honored
    pub supports_pagination: bool,

    /// Whether results carry torrent info hashes
    pub supports_info_hash: bool,

    /// Maximum results per page
    pub limits_max: Option<usize>,
    /// Default results per page
    pub limits_default: Option<usize>,

    /// Query-text formats worth enumerating for TV text searches
    pub tv_search_formats: Vec<SearchTextFormat>,
    /// Query-text formats worth enumerating for movie text searches
    pub movie_search_formats: Vec<SearchTextFormat>,
}

impl Default for IndexerCapabilities {
    fn default() -> Self {
        Self {
            search_available: true,
            tv_search_available: false,
            movie_search_available: false,
            music_search_available: false,
            book_search_available: false,
            tv_search_params: vec![],
            movie_search_params: vec![],
            music_search_params: vec![],
            book_search_params: vec![],
            categories: vec![],
            supports_pagination: false,
            supports_info_hash: false,
            limits_max: Some(100),
            limits_default: Some(100),
            tv_search_formats: vec![SearchTextFormat::Standard],
            movie_search_formats: vec![SearchTextFormat::Standard],
        }
    }
}

impl IndexerCapabilities {
    /// Whether the given search type is available at all
    pub fn supports_search_type(&self, search_type: SearchType) -> bool {
        match search_type {
            SearchType::Basic => self.search_available,
            SearchType::Tv => self.tv_search_available,
            SearchType::Movie => self.movie_search_available,
            SearchType::Music => self.music_search_available,
            SearchType::Book => self.book_search_available,
        }
    }

    /// The parameter set for a search type
    pub fn params_for(&self, search_type: SearchType) -> &[SearchParam] {
        match search_type {
            SearchType::Tv => &self.tv_search_params,
            SearchType::Movie => &self.movie_search_params,
            SearchType::Music => &self.music_search_params,
            SearchType::Book => &self.book_search_params,
            SearchType::Basic => &[],
        }
    }

    /// Check if a specific parameter is supported for a search type
    pub fn has_param(&self, search_type: SearchType, param: SearchParam) -> bool {
        self.params_for(search_type).contains(&param)
    }

    /// Text formats declared for a search type
    pub fn text_formats_for(&self, search_type: SearchType) -> &[SearchTextFormat] {
        match search_type {
            SearchType::Tv => &self.tv_search_formats,
            SearchType::Movie => &self.movie_search_formats,
            _ => &[SearchTextFormat::Standard],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_type_availability() {
        let caps = IndexerCapabilities {
            tv_search_available: true,
            tv_search_params: vec![SearchParam::Q, SearchParam::TvdbId],
            ..Default::default()
        };
        assert!(caps.supports_search_type(SearchType::Tv));
        assert!(!caps.supports_search_type(SearchType::Movie));
        assert!(caps.has_param(SearchType::Tv, SearchParam::TvdbId));
        assert!(!caps.has_param(SearchType::Tv, SearchParam::ImdbId));
    }
}
