//! Release ranking
//!
//! Weighted scoring over seeders, freshness, detected quality, and size.
//! The sort is stable so that ties preserve the dedup pass's preference
//! order.

use chrono::{DateTime, Utc};

use crate::indexer::ReleaseResult;

use super::title_parser::detect_quality;

/// Score weights; defaults sum to 1.0
#[derive(Debug, Clone)]
pub struct RankWeights {
    pub seeders: f64,
    pub freshness: f64,
    pub quality: f64,
    pub size: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            seeders: 0.40,
            freshness: 0.20,
            quality: 0.25,
            size: 0.15,
        }
    }
}

/// `min(log10(n+1)/3, 1)`, zero for no seeders
pub fn seeder_score(seeders: i32) -> f64 {
    if seeders <= 0 {
        return 0.0;
    }
    (((seeders as f64) + 1.0).log10() / 3.0).min(1.0)
}

/// `exp(-ageDays/30)`; unknown dates score zero
pub fn freshness_score(publish_date: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match publish_date {
        Some(date) => {
            let age_days = (now - date).num_seconds().max(0) as f64 / 86_400.0;
            (-age_days / 30.0).exp()
        }
        None => 0.0,
    }
}

/// Quality detected from the title
pub fn quality_score(title: &str) -> f64 {
    detect_quality(title).score()
}

/// Sweet spot is 2-15 GB; unknown sizes are neutral
pub fn size_score(size_bytes: i64) -> f64 {
    if size_bytes <= 0 {
        return 0.5;
    }
    let gb = size_bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    if gb < 1.0 {
        0.3
    } else if (2.0..=15.0).contains(&gb) {
        0.8 + gb.min(10.0) / 10.0 * 0.2
    } else if gb > 30.0 {
        0.7
    } else {
        0.6
    }
}

/// Composite score for one release
pub fn score_release(release: &ReleaseResult, weights: &RankWeights, now: DateTime<Utc>) -> f64 {
    weights.seeders * seeder_score(release.seeders.unwrap_or(0))
        + weights.freshness * freshness_score(release.publish_date, now)
        + weights.quality * quality_score(&release.title)
        + weights.size * size_score(release.size)
}

/// Sort releases by score descending; stable on ties
pub fn rank_releases(releases: &mut Vec<ReleaseResult>, weights: &RankWeights) {
    let now = Utc::now();
    let mut scored: Vec<(f64, ReleaseResult)> = releases
        .drain(..)
        .map(|r| (score_release(&r, weights, now), r))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    releases.extend(scored.into_iter().map(|(_, r)| r));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn seeder_score_boundaries() {
        assert_eq!(seeder_score(0), 0.0);
        assert_eq!(seeder_score(-5), 0.0);
        assert!(seeder_score(9) > 0.0);
        assert!((seeder_score(999) - 1.0).abs() < 1e-9);
        assert_eq!(seeder_score(100_000), 1.0);
    }

    #[test]
    fn size_score_boundaries() {
        assert_eq!(size_score(0), 0.5);
        assert_eq!(size_score(-1), 0.5);
        let gb = 1024_i64 * 1024 * 1024;
        assert_eq!(size_score(gb / 2), 0.3);
        assert_eq!(size_score(gb + gb / 2), 0.6);
        assert!((size_score(5 * gb) - 0.9).abs() < 1e-9);
        assert!((size_score(12 * gb) - 1.0).abs() < 1e-9);
        assert_eq!(size_score(20 * gb), 0.6);
        assert_eq!(size_score(40 * gb), 0.7);
    }

    #[test]
    fn freshness_decays() {
        let now = Utc::now();
        let fresh = freshness_score(Some(now), now);
        let month_old = freshness_score(Some(now - Duration::days(30)), now);
        let stale = freshness_score(Some(now - Duration::days(365)), now);
        assert!(fresh > 0.99);
        assert!((month_old - (-1.0f64).exp()).abs() < 0.01);
        assert!(stale < 0.01);
        assert_eq!(freshness_score(None, now), 0.0);
    }

    #[test]
    fn ranks_better_release_first() {
        let now = Utc::now();
        let mut low = ReleaseResult::new("Show.S01E01.480p.CAM", "1", "a", "a");
        low.seeders = Some(1);
        low.publish_date = Some(now - Duration::days(300));
        let mut high = ReleaseResult::new("Show.S01E01.1080p.WEB", "2", "a", "a");
        high.seeders = Some(150);
        high.size = 6 * 1024 * 1024 * 1024;
        high.publish_date = Some(now - Duration::days(1));

        let mut releases = vec![low, high];
        rank_releases(&mut releases, &RankWeights::default());
        assert_eq!(releases[0].guid, "2");
    }
}
