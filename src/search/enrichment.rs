//! Release enrichment interface
//!
//! The enhanced search path hands raw releases to an external enrichment
//! collaborator (quality profiles, custom scoring) and delegates final
//! ordering to it. The core only defines the contract and the enriched
//! result shape.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::indexer::{ReleaseResult, SearchCriteria};

use super::title_parser::EpisodeInfo;

/// Default indexer priority when the collaborator reports none
pub const DEFAULT_INDEXER_PRIORITY: i32 = 25;

/// A release annotated by the enrichment collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedReleaseResult {
    pub release: ReleaseResult,
    /// Parsed title structure; populated once, kept beside the release
    pub parsed: Option<EpisodeInfo>,
    /// Collaborator-computed score used for ordering
    pub total_score: f64,
    /// Whether the collaborator rejected the release outright
    pub rejected: bool,
    /// Human-readable rejection reasons
    pub rejections: Vec<String>,
    /// Priority of the originating indexer (lower preferred)
    pub indexer_priority: i32,
}

impl EnhancedReleaseResult {
    /// Wrap a raw release with neutral enrichment values
    pub fn passthrough(release: ReleaseResult) -> Self {
        let parsed = super::title_parser::parse_release_title(&release.title);
        Self {
            release,
            parsed,
            total_score: 0.0,
            rejected: false,
            rejections: Vec::new(),
            indexer_priority: DEFAULT_INDEXER_PRIORITY,
        }
    }

    pub fn rejection_count(&self) -> usize {
        self.rejections.len()
    }
}

/// Knobs forwarded to the enrichment collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    /// Drop releases the collaborator scores below this
    pub reject_below_score: Option<f64>,
    /// Include releases the collaborator rejected (marked, not dropped)
    pub keep_rejected: bool,
}

/// External enrichment collaborator
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    /// Annotate releases with scores and rejections. Order of the returned
    /// vector is not significant; `order` decides the final ranking.
    async fn enrich(
        &self,
        releases: Vec<ReleaseResult>,
        criteria: &SearchCriteria,
        options: &EnrichmentOptions,
    ) -> Vec<EnhancedReleaseResult>;

    /// Final ordering for the enhanced path
    fn order(&self, mut releases: Vec<EnhancedReleaseResult>) -> Vec<EnhancedReleaseResult> {
        releases.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        releases
    }
}
