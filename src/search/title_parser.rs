//! Release title parsing
//!
//! Extracts season/episode structure and quality markers from scene-style
//! release titles. The season/episode filter and the ranker both consume
//! the output; parsing happens once per release per pass and results are
//! memoized in a parallel map so releases stay immutable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Pattern for multi-episode S01E01-E03 or S01E01E02 ranges
static MULTI_EPISODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bS(\d{1,2})E(\d{1,3})(?:[-.]?E(\d{1,3}))+\b").unwrap()
});

/// Pattern for single-episode S01E05
static SINGLE_EPISODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bS(\d{1,2})E(\d{1,3})\b").unwrap());

/// Pattern for european 1x05 numbering
static EUROPEAN_EPISODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})x(\d{2,3})\b").unwrap());

/// Pattern for multi-season packs S01-S05
static SEASON_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bS(\d{1,2})\s*-\s*S(\d{1,2})\b").unwrap());

/// Pattern for season-only packs: a lone S01 token or "Season 1". Checked
/// after the episode and range patterns, which consume S01E05 and S01-S05.
static SEASON_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:S(\d{1,2})|Season[ ._](\d{1,2}))\b").unwrap());

/// Complete-series marker
static COMPLETE_SERIES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bcomplete[ ._-]series\b").unwrap());

/// Quality tier detected from a release title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    Uhd2160,
    Hd1080,
    Hd720,
    Sd,
    Unknown,
}

impl QualityTier {
    /// Score component consumed by the ranker
    pub fn score(self) -> f64 {
        match self {
            QualityTier::Uhd2160 => 1.0,
            QualityTier::Hd1080 => 0.8,
            QualityTier::Hd720 => 0.6,
            QualityTier::Sd => 0.3,
            QualityTier::Unknown => 0.4,
        }
    }
}

static QUALITY_UHD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(2160p|4k|uhd)\b").unwrap());
static QUALITY_1080: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b1080[pi]\b").unwrap());
static QUALITY_720: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b720p\b").unwrap());
static QUALITY_SD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(480p|dvdrip|sdtv|cam|ts|telesync|hdcam)\b").unwrap());

/// Season/episode structure parsed from a release title
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeInfo {
    /// First (or only) season named by the title
    pub season: Option<u32>,
    /// All seasons covered, for range packs
    pub seasons: Vec<u32>,
    /// All episodes covered; empty for packs
    pub episodes: Vec<u32>,
    /// Whether the title is a season (or multi-season) pack
    pub is_season_pack: bool,
    /// Whether the title bundles every season
    pub is_complete_series: bool,
    /// Detected quality marker
    pub quality: QualityTier,
}

impl EpisodeInfo {
    /// Whether this release covers the given season
    pub fn covers_season(&self, season: u32) -> bool {
        if self.is_complete_series {
            return true;
        }
        if self.seasons.len() > 1 {
            return self.seasons.contains(&season);
        }
        self.season == Some(season)
    }
}

/// Detect the quality tier of a title
pub fn detect_quality(title: &str) -> QualityTier {
    if QUALITY_UHD.is_match(title) {
        QualityTier::Uhd2160
    } else if QUALITY_1080.is_match(title) {
        QualityTier::Hd1080
    } else if QUALITY_720.is_match(title) {
        QualityTier::Hd720
    } else if QUALITY_SD.is_match(title) {
        QualityTier::Sd
    } else {
        QualityTier::Unknown
    }
}

/// Parse season/episode structure from a release title.
///
/// Returns `None` when no recognizable marker is present; the episode
/// filter rejects such releases for season/episode searches.
pub fn parse_release_title(title: &str) -> Option<EpisodeInfo> {
    let quality = detect_quality(title);

    if let Some(caps) = MULTI_EPISODE.captures(title) {
        let season: u32 = caps.get(1)?.as_str().parse().ok()?;
        let first: u32 = caps.get(2)?.as_str().parse().ok()?;
        let last: u32 = caps.get(3)?.as_str().parse().ok()?;
        let (lo, hi) = if first <= last { (first, last) } else { (last, first) };
        return Some(EpisodeInfo {
            season: Some(season),
            seasons: vec![season],
            episodes: (lo..=hi).collect(),
            is_season_pack: false,
            is_complete_series: false,
            quality,
        });
    }

    if let Some(caps) = SINGLE_EPISODE.captures(title) {
        let season: u32 = caps.get(1)?.as_str().parse().ok()?;
        let episode: u32 = caps.get(2)?.as_str().parse().ok()?;
        return Some(EpisodeInfo {
            season: Some(season),
            seasons: vec![season],
            episodes: vec![episode],
            is_season_pack: false,
            is_complete_series: false,
            quality,
        });
    }

    if let Some(caps) = EUROPEAN_EPISODE.captures(title) {
        let season: u32 = caps.get(1)?.as_str().parse().ok()?;
        let episode: u32 = caps.get(2)?.as_str().parse().ok()?;
        return Some(EpisodeInfo {
            season: Some(season),
            seasons: vec![season],
            episodes: vec![episode],
            is_season_pack: false,
            is_complete_series: false,
            quality,
        });
    }

    if let Some(caps) = SEASON_RANGE.captures(title) {
        let first: u32 = caps.get(1)?.as_str().parse().ok()?;
        let last: u32 = caps.get(2)?.as_str().parse().ok()?;
        let (lo, hi) = if first <= last { (first, last) } else { (last, first) };
        return Some(EpisodeInfo {
            season: Some(lo),
            seasons: (lo..=hi).collect(),
            episodes: vec![],
            is_season_pack: true,
            is_complete_series: false,
            quality,
        });
    }

    if COMPLETE_SERIES.is_match(title) {
        return Some(EpisodeInfo {
            season: None,
            seasons: vec![],
            episodes: vec![],
            is_season_pack: true,
            is_complete_series: true,
            quality,
        });
    }

    if let Some(caps) = SEASON_ONLY.captures(title) {
        let season: u32 = caps
            .get(1)
            .or_else(|| caps.get(2))?
            .as_str()
            .parse()
            .ok()?;
        return Some(EpisodeInfo {
            season: Some(season),
            seasons: vec![season],
            episodes: vec![],
            is_season_pack: true,
            is_complete_series: false,
            quality,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_episode() {
        let info = parse_release_title("Smallville.S01E01.1080p.WEBRip").unwrap();
        assert_eq!(info.season, Some(1));
        assert_eq!(info.episodes, vec![1]);
        assert!(!info.is_season_pack);
        assert_eq!(info.quality, QualityTier::Hd1080);
    }

    #[test]
    fn parses_multi_episode_range() {
        let info = parse_release_title("Show.S02E01-E03.720p.WEB").unwrap();
        assert_eq!(info.season, Some(2));
        assert_eq!(info.episodes, vec![1, 2, 3]);
        assert!(!info.is_season_pack);
    }

    #[test]
    fn parses_european_numbering() {
        let info = parse_release_title("Show 3x07 HDTV XviD").unwrap();
        assert_eq!(info.season, Some(3));
        assert_eq!(info.episodes, vec![7]);
    }

    #[test]
    fn parses_season_pack() {
        let info = parse_release_title("Smallville.S01.COMPLETE.1080p.BluRay").unwrap();
        assert_eq!(info.season, Some(1));
        assert!(info.is_season_pack);
        assert!(!info.is_complete_series);
        assert!(info.covers_season(1));
        assert!(!info.covers_season(2));
    }

    #[test]
    fn parses_season_range_pack() {
        let info = parse_release_title("Smallville.S01-S05.1080p.BluRay").unwrap();
        assert!(info.is_season_pack);
        assert_eq!(info.seasons, vec![1, 2, 3, 4, 5]);
        assert!(info.covers_season(3));
        assert!(!info.covers_season(6));
    }

    #[test]
    fn parses_complete_series() {
        let info = parse_release_title("The.Wire.Complete.Series.1080p").unwrap();
        assert!(info.is_complete_series);
        assert!(info.is_season_pack);
        assert!(info.covers_season(4));
    }

    #[test]
    fn season_word_form() {
        let info = parse_release_title("My Show Season 2 2160p WEB-DL").unwrap();
        assert_eq!(info.season, Some(2));
        assert!(info.is_season_pack);
        assert_eq!(info.quality, QualityTier::Uhd2160);
    }

    #[test]
    fn rejects_unparseable_titles() {
        assert!(parse_release_title("Random Movie 2024 1080p").is_none());
        assert!(parse_release_title("not a tv release at all").is_none());
    }

    #[test]
    fn quality_tiers() {
        assert_eq!(detect_quality("Film.2160p.HDR"), QualityTier::Uhd2160);
        assert_eq!(detect_quality("Film.1080i.HDTV"), QualityTier::Hd1080);
        assert_eq!(detect_quality("Film.720p"), QualityTier::Hd720);
        assert_eq!(detect_quality("Film.DVDRip.XviD"), QualityTier::Sd);
        assert_eq!(detect_quality("Film.WEBRip"), QualityTier::Unknown);
    }
}
