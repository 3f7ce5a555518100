//! Tiered search planning
//!
//! ID-based searches run first when the indexer declares support for one of
//! the criteria's IDs; text searches are the fallback, enumerated over the
//! indexer's declared query-text formats. The helpers here derive the
//! per-attempt criteria so drivers stay oblivious to tiering.

use crate::indexer::{
    IndexerCapabilities, SearchCriteria, SearchParam, SearchSource, SearchTextFormat, SearchType,
};

/// Whether the indexer supports an ID search for one of the IDs this
/// criteria actually carries
pub fn id_search_supported(caps: &IndexerCapabilities, criteria: &SearchCriteria) -> bool {
    let st = criteria.search_type;
    (criteria.imdb_id.is_some() && caps.has_param(st, SearchParam::ImdbId))
        || (criteria.tmdb_id.is_some() && caps.has_param(st, SearchParam::TmdbId))
        || (criteria.tvdb_id.is_some() && caps.has_param(st, SearchParam::TvdbId))
        || (criteria.tvmaze_id.is_some() && caps.has_param(st, SearchParam::TvmazeId))
}

/// Criteria for an ID-tier attempt. `keep_query_year` keeps the query text
/// and year alongside the IDs (the first movie-interactive attempt); the
/// stripped retry and every other ID attempt drop both.
pub fn build_id_criteria(criteria: &SearchCriteria, keep_query_year: bool) -> SearchCriteria {
    let mut c = criteria.clone();
    if !keep_query_year {
        c.query = None;
        c.year = None;
    }
    c.preferred_episode_format = None;
    c
}

/// Criteria for a text-tier attempt: IDs stripped, format hint set
pub fn build_text_criteria(criteria: &SearchCriteria, format: SearchTextFormat) -> SearchCriteria {
    let mut c = criteria.clone();
    c.imdb_id = None;
    c.tmdb_id = None;
    c.tvdb_id = None;
    c.tvmaze_id = None;
    if format == SearchTextFormat::NoYear {
        c.year = None;
    }
    c.preferred_episode_format = Some(format);
    c
}

/// Formats to enumerate for the text tier, from the indexer's declaration.
/// `noYear` is a movie-interactive variant; automatic movie searches skip it.
pub fn text_formats(caps: &IndexerCapabilities, criteria: &SearchCriteria) -> Vec<SearchTextFormat> {
    let declared = caps.text_formats_for(criteria.search_type);
    match criteria.search_type {
        SearchType::Tv => declared
            .iter()
            .copied()
            .filter(|f| {
                matches!(
                    f,
                    SearchTextFormat::Standard
                        | SearchTextFormat::European
                        | SearchTextFormat::Compact
                )
            })
            .collect(),
        SearchType::Movie => declared
            .iter()
            .copied()
            .filter(|f| match f {
                SearchTextFormat::Standard => true,
                SearchTextFormat::NoYear => {
                    criteria.search_source == SearchSource::Interactive
                }
                _ => false,
            })
            .collect(),
        _ => vec![SearchTextFormat::Standard],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with(params: Vec<SearchParam>) -> IndexerCapabilities {
        IndexerCapabilities {
            tv_search_available: true,
            movie_search_available: true,
            tv_search_params: params.clone(),
            movie_search_params: params,
            ..Default::default()
        }
    }

    #[test]
    fn id_support_requires_matching_id() {
        let caps = caps_with(vec![SearchParam::Q, SearchParam::ImdbId]);
        let with_imdb = SearchCriteria::tv("x").with_imdb("tt1");
        let with_tvdb = SearchCriteria::tv("x").with_tvdb(5);
        assert!(id_search_supported(&caps, &with_imdb));
        assert!(!id_search_supported(&caps, &with_tvdb));
        assert!(!id_search_supported(&caps, &SearchCriteria::tv("x")));
    }

    #[test]
    fn id_criteria_strips_query_and_year() {
        let criteria = SearchCriteria::movie("Heat").with_imdb("tt1").with_year(1995);
        let stripped = build_id_criteria(&criteria, false);
        assert!(stripped.query.is_none());
        assert!(stripped.year.is_none());
        assert_eq!(stripped.imdb_id.as_deref(), Some("tt1"));

        let kept = build_id_criteria(&criteria, true);
        assert_eq!(kept.query.as_deref(), Some("Heat"));
        assert_eq!(kept.year, Some(1995));
    }

    #[test]
    fn text_criteria_strips_ids_and_sets_format() {
        let criteria = SearchCriteria::tv("Show")
            .with_imdb("tt1")
            .with_tvdb(5)
            .with_season_episode(1, Some(5));
        let text = build_text_criteria(&criteria, SearchTextFormat::Standard);
        assert!(text.imdb_id.is_none());
        assert!(text.tvdb_id.is_none());
        assert_eq!(text.query.as_deref(), Some("Show"));
        assert_eq!(text.preferred_episode_format, Some(SearchTextFormat::Standard));
        assert_eq!(text.season, Some(1));
    }

    #[test]
    fn movie_no_year_is_interactive_only() {
        let mut caps = caps_with(vec![SearchParam::Q]);
        caps.movie_search_formats = vec![SearchTextFormat::Standard, SearchTextFormat::NoYear];

        let interactive = SearchCriteria::movie("Heat");
        assert_eq!(
            text_formats(&caps, &interactive),
            vec![SearchTextFormat::Standard, SearchTextFormat::NoYear]
        );

        let automatic = SearchCriteria::movie("Heat").with_source(SearchSource::Automatic);
        assert_eq!(text_formats(&caps, &automatic), vec![SearchTextFormat::Standard]);
    }
}
