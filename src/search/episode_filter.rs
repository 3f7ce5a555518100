//! Season/episode filtering
//!
//! Applies only to TV criteria carrying a season or episode. Titles are
//! parsed once per pass into a parallel map keyed by release guid; the
//! releases themselves stay immutable. Whether packs are acceptable depends
//! on the search source: interactive searches for a specific episode reject
//! packs, automatic searches keep both and let the ranker hoist packs.

use std::collections::HashMap;

use tracing::debug;

use crate::indexer::{ReleaseResult, SearchCriteria, SearchSource, SearchType};

use super::title_parser::{EpisodeInfo, parse_release_title};

/// Whether the criteria asks for season/episode filtering at all
pub fn applies(criteria: &SearchCriteria) -> bool {
    criteria.search_type == SearchType::Tv
        && (criteria.season.is_some() || criteria.episode.is_some())
}

/// Filter releases against the criteria's season/episode intent.
///
/// The caller passes the *original* user criteria, never the ID-enriched
/// variant: the filter expresses user intent, not which IDs resolved.
pub fn filter_by_episode(
    releases: Vec<ReleaseResult>,
    criteria: &SearchCriteria,
) -> Vec<ReleaseResult> {
    if !applies(criteria) {
        return releases;
    }

    let mut parsed: HashMap<String, Option<EpisodeInfo>> = HashMap::new();
    for release in &releases {
        parsed
            .entry(release.guid.clone())
            .or_insert_with(|| parse_release_title(&release.title));
    }

    let before = releases.len();
    let kept: Vec<ReleaseResult> = releases
        .into_iter()
        .filter(|release| {
            let info = parsed.get(&release.guid).and_then(|p| p.as_ref());
            accepts(criteria, info)
        })
        .collect();

    debug!(
        before = before,
        after = kept.len(),
        season = ?criteria.season,
        episode = ?criteria.episode,
        source = ?criteria.search_source,
        "Season/episode filter applied"
    );

    kept
}

/// Decide one release. `None` info (unparseable title) is always rejected.
pub fn accepts(criteria: &SearchCriteria, info: Option<&EpisodeInfo>) -> bool {
    let Some(info) = info else {
        return false;
    };

    match (criteria.season, criteria.episode) {
        // Season-only search: packs covering the target season
        (Some(season), None) => info.is_season_pack && info.covers_season(season),

        (Some(season), Some(episode)) => {
            let episode_match = !info.is_season_pack
                && info.season == Some(season)
                && info.episodes.contains(&episode);

            match criteria.search_source {
                SearchSource::Interactive => episode_match,
                SearchSource::Automatic => {
                    episode_match || (info.is_season_pack && info.covers_season(season))
                }
            }
        }

        // Episode-only: any pack, or individual episodes carrying the target
        (None, Some(episode)) => info.is_season_pack || info.episodes.contains(&episode),

        (None, None) => true,
    }
}
