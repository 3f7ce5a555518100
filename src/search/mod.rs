//! Search orchestration core
//!
//! Tiered, concurrency-controlled fan-out across indexers with dedup,
//! season/episode filtering, ranking, and result caching.

pub mod cache;
pub mod dedup;
pub mod enrichment;
pub mod episode_filter;
pub mod orchestrator;
pub mod ranker;
pub mod tiering;
pub mod title_parser;

pub use cache::{ReleaseCache, fingerprint};
pub use dedup::{TitleNormalizer, dedup_enhanced, dedup_releases};
pub use enrichment::{EnhancedReleaseResult, EnrichmentOptions, EnrichmentService};
pub use orchestrator::{
    EnhancedSearchResult, FailureTag, IndexerSearchOutcome, SearchFailure, SearchOptions,
    SearchOrchestrator, SearchResult,
};
pub use ranker::RankWeights;
pub use title_parser::{EpisodeInfo, QualityTier, parse_release_title};
