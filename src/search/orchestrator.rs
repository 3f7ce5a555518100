//! Search orchestration
//!
//! Fans a criteria out across eligible indexers in bounded batches, runs
//! the tiered search per indexer under a deadline, and post-processes the
//! merged result set: dedup, season/episode filter, rank, truncate, cache.
//! A single indexer failing (Cloudflare, timeout, anything) never fails the
//! overall search; it is recorded against that indexer and the rest carry
//! on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::indexer::{
    DriverError, FilterOptions, IndexerDriver, IndexerStatusTracker, RejectedIndexer,
    ReleaseResult, SearchCriteria, SearchMethod, SearchSource, SearchType, filter_indexers,
};
use crate::metadata::MetadataClient;
use crate::ratelimit::SearchRateLimiters;

use super::cache::{ReleaseCache, fingerprint};
use super::dedup::{TitleNormalizer, dedup_enhanced, dedup_releases};
use super::enrichment::{
    EnhancedReleaseResult, EnrichmentOptions, EnrichmentService,
};
use super::episode_filter;
use super::ranker::{RankWeights, rank_releases, score_release};
use super::tiering;

/// Fallback result cap when the criteria names no limit
const DEFAULT_RESULT_LIMIT: usize = 100;

/// Options controlling one orchestrated search
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub respect_enabled: bool,
    pub respect_backoff: bool,
    pub use_tiered_search: bool,
    /// Indexers searched in parallel per batch
    pub concurrency: usize,
    /// Per-indexer deadline
    pub timeout: Duration,
    pub use_cache: bool,
    pub search_source: SearchSource,
    pub enrichment: Option<EnrichmentOptions>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            respect_enabled: true,
            respect_backoff: true,
            use_tiered_search: true,
            concurrency: 5,
            timeout: Duration::from_millis(30_000),
            use_cache: true,
            search_source: SearchSource::Interactive,
            enrichment: None,
        }
    }
}

/// Behavior tag for a per-indexer failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureTag {
    Cloudflare,
    Timeout,
    RateLimit,
    Error,
}

impl std::fmt::Display for FailureTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureTag::Cloudflare => write!(f, "cloudflare"),
            FailureTag::Timeout => write!(f, "timeout"),
            FailureTag::RateLimit => write!(f, "ratelimit"),
            FailureTag::Error => write!(f, "error"),
        }
    }
}

/// A per-indexer failure, tag plus preserved message
#[derive(Debug, Clone, Serialize)]
pub struct SearchFailure {
    pub tag: FailureTag,
    pub message: String,
}

/// Per-indexer outcome of one fan-out
#[derive(Debug, Clone, Serialize)]
pub struct IndexerSearchOutcome {
    pub indexer_id: String,
    pub indexer_name: String,
    pub result_count: usize,
    /// Which tier produced the results; `None` when the indexer was skipped
    /// as a zero-result success
    pub search_method: Option<SearchMethod>,
    pub elapsed_ms: u64,
    pub failure: Option<SearchFailure>,
}

/// Merged result of an orchestrated search
#[derive(Debug, Clone, Serialize, Default)]
pub struct SearchResult {
    pub releases: Vec<ReleaseResult>,
    pub total_results: usize,
    pub removed_by_dedup: usize,
    pub rejected_indexers: Vec<RejectedIndexer>,
    pub outcomes: Vec<IndexerSearchOutcome>,
    pub from_cache: bool,
    pub elapsed_ms: u64,
}

/// Merged result of the enhanced path
#[derive(Debug, Clone, Serialize)]
pub struct EnhancedSearchResult {
    pub releases: Vec<EnhancedReleaseResult>,
    pub total_results: usize,
    pub removed_by_dedup: usize,
    pub rejected_indexers: Vec<RejectedIndexer>,
    pub outcomes: Vec<IndexerSearchOutcome>,
    pub elapsed_ms: u64,
}

/// Orchestrates searches across indexer drivers
pub struct SearchOrchestrator {
    tracker: Arc<IndexerStatusTracker>,
    limiters: Arc<SearchRateLimiters>,
    cache: Arc<ReleaseCache>,
    normalizer: TitleNormalizer,
    weights: RankWeights,
    metadata: Option<Arc<dyn MetadataClient>>,
    enrichment: Option<Arc<dyn EnrichmentService>>,
}

impl SearchOrchestrator {
    pub fn new(
        tracker: Arc<IndexerStatusTracker>,
        limiters: Arc<SearchRateLimiters>,
        cache: Arc<ReleaseCache>,
    ) -> Self {
        Self {
            tracker,
            limiters,
            cache,
            normalizer: TitleNormalizer::new(),
            weights: RankWeights::default(),
            metadata: None,
            enrichment: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataClient>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_enrichment(mut self, enrichment: Arc<dyn EnrichmentService>) -> Self {
        self.enrichment = Some(enrichment);
        self
    }

    pub fn status_tracker(&self) -> &Arc<IndexerStatusTracker> {
        &self.tracker
    }

    /// Search eligible indexers and return a merged, ranked result set
    pub async fn search(
        &self,
        indexers: &[Arc<dyn IndexerDriver>],
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> SearchResult {
        let start = Instant::now();

        let mut criteria = criteria.clone();
        criteria.search_source = options.search_source;
        // Episode filtering depends on user intent, so it uses the original
        // criteria rather than the ID-enriched variant.
        let original = criteria.clone();

        self.enrich_ids(&mut criteria).await;

        let fp = fingerprint(&criteria);
        if options.use_cache {
            if let Some(hit) = self.cache.get(&fp) {
                debug!(fingerprint = %fp, results = hit.len(), "Release cache hit");
                return SearchResult {
                    total_results: hit.len(),
                    releases: hit,
                    from_cache: true,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    ..Default::default()
                };
            }
        }

        let (eligible, rejected) = filter_indexers(
            indexers,
            &self.tracker,
            &criteria,
            FilterOptions {
                respect_enabled: options.respect_enabled,
                respect_backoff: options.respect_backoff,
            },
        );

        let (releases, outcomes) = self.fan_out(&eligible, &criteria, options).await;

        let dedup = dedup_releases(releases, &self.normalizer);
        let removed_by_dedup = dedup.removed;
        let filtered = episode_filter::filter_by_episode(dedup.releases, &original);

        let mut ranked = filtered;
        rank_releases(&mut ranked, &self.weights);
        ranked.truncate(criteria.limit.unwrap_or(DEFAULT_RESULT_LIMIT));

        if options.use_cache && !ranked.is_empty() {
            self.cache.insert(fp, ranked.clone());
        }

        info!(
            indexers = eligible.len(),
            rejected = rejected.len(),
            results = ranked.len(),
            removed_by_dedup = removed_by_dedup,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Search complete"
        );

        SearchResult {
            total_results: ranked.len(),
            releases: ranked,
            removed_by_dedup,
            rejected_indexers: rejected,
            outcomes,
            from_cache: false,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Search and annotate through the enrichment collaborator; ordering is
    /// delegated to it. The release cache is not consulted on this path.
    pub async fn search_enhanced(
        &self,
        indexers: &[Arc<dyn IndexerDriver>],
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> EnhancedSearchResult {
        let start = Instant::now();

        let mut criteria = criteria.clone();
        criteria.search_source = options.search_source;
        let original = criteria.clone();

        self.enrich_ids(&mut criteria).await;

        let (eligible, rejected) = filter_indexers(
            indexers,
            &self.tracker,
            &criteria,
            FilterOptions {
                respect_enabled: options.respect_enabled,
                respect_backoff: options.respect_backoff,
            },
        );

        let (releases, outcomes) = self.fan_out(&eligible, &criteria, options).await;

        let enrichment_options = options.enrichment.clone().unwrap_or_default();
        let enhanced = match &self.enrichment {
            Some(service) => {
                service
                    .enrich(releases, &criteria, &enrichment_options)
                    .await
            }
            None => {
                // Neutral enrichment: the ranker score doubles as totalScore
                let now = Utc::now();
                releases
                    .into_iter()
                    .map(|r| {
                        let mut e = EnhancedReleaseResult::passthrough(r);
                        e.total_score = score_release(&e.release, &self.weights, now);
                        e
                    })
                    .collect()
            }
        };

        let mut annotated = enhanced;
        for e in &mut annotated {
            let priority = self.tracker.get_status_sync(&e.release.indexer_id).priority;
            e.indexer_priority = priority;
        }

        let dedup = dedup_enhanced(annotated, &self.normalizer);
        let removed_by_dedup = dedup.removed;

        let filter_active = episode_filter::applies(&original);
        let filtered: Vec<EnhancedReleaseResult> = dedup
            .releases
            .into_iter()
            .filter(|e| !filter_active || episode_filter::accepts(&original, e.parsed.as_ref()))
            .collect();

        let mut ordered = match &self.enrichment {
            Some(service) => service.order(filtered),
            None => {
                let mut v = filtered;
                v.sort_by(|a, b| {
                    b.total_score
                        .partial_cmp(&a.total_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                v
            }
        };
        ordered.truncate(criteria.limit.unwrap_or(DEFAULT_RESULT_LIMIT));

        EnhancedSearchResult {
            total_results: ordered.len(),
            releases: ordered,
            removed_by_dedup,
            rejected_indexers: rejected,
            outcomes,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Download a release payload through the driver that advertised it
    pub async fn grab(
        &self,
        indexers: &[Arc<dyn IndexerDriver>],
        release: &ReleaseResult,
    ) -> Result<Vec<u8>, DriverError> {
        let driver = indexers
            .iter()
            .find(|d| d.id() == release.indexer_id)
            .ok_or_else(|| {
                DriverError::Capability(format!("indexer {} not loaded", release.indexer_id))
            })?;
        let url = release
            .download_url
            .as_deref()
            .ok_or_else(|| DriverError::Capability("release has no download URL".to_string()))?;
        driver.download(url).await
    }

    /// Splice an IMDB ID into movie/tv criteria that only carry a TMDB ID.
    /// Lookup failures log and proceed with the original criteria.
    async fn enrich_ids(&self, criteria: &mut SearchCriteria) {
        if !matches!(criteria.search_type, SearchType::Movie | SearchType::Tv) {
            return;
        }
        let Some(tmdb_id) = criteria.tmdb_id else {
            return;
        };
        if criteria.imdb_id.is_some() {
            return;
        }
        let Some(metadata) = &self.metadata else {
            return;
        };

        let lookup = match criteria.search_type {
            SearchType::Movie => metadata.get_movie_external_ids(tmdb_id).await,
            SearchType::Tv => metadata.get_tv_external_ids(tmdb_id).await,
            _ => unreachable!(),
        };

        match lookup {
            Ok(ids) => {
                if criteria.imdb_id.is_none() {
                    criteria.imdb_id = ids.imdb_id;
                }
                if criteria.search_type == SearchType::Tv && criteria.tvdb_id.is_none() {
                    criteria.tvdb_id = ids.tvdb_id;
                }
                debug!(tmdb_id = tmdb_id, imdb_id = ?criteria.imdb_id, "ID enrichment applied");
            }
            Err(e) => {
                warn!(tmdb_id = tmdb_id, error = %e, "ID enrichment failed, proceeding without");
            }
        }
    }

    /// Process eligible indexers in batches of `concurrency`; within a
    /// batch every indexer runs in parallel under its own deadline.
    async fn fan_out(
        &self,
        eligible: &[Arc<dyn IndexerDriver>],
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> (Vec<ReleaseResult>, Vec<IndexerSearchOutcome>) {
        let mut all_releases = Vec::new();
        let mut outcomes = Vec::new();

        for batch in eligible.chunks(options.concurrency.max(1)) {
            let futures = batch
                .iter()
                .map(|driver| self.search_one(driver.clone(), criteria, options));
            for (releases, outcome) in join_all(futures).await {
                all_releases.extend(releases);
                outcomes.push(outcome);
            }
        }

        (all_releases, outcomes)
    }

    async fn search_one(
        &self,
        driver: Arc<dyn IndexerDriver>,
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> (Vec<ReleaseResult>, IndexerSearchOutcome) {
        let start = Instant::now();
        let indexer_id = driver.id().to_string();
        let indexer_name = driver.name().to_string();

        let outcome = |releases: Vec<ReleaseResult>,
                       method: Option<SearchMethod>,
                       failure: Option<SearchFailure>,
                       elapsed: Duration| {
            let o = IndexerSearchOutcome {
                indexer_id: indexer_id.clone(),
                indexer_name: indexer_name.clone(),
                result_count: releases.len(),
                search_method: method,
                elapsed_ms: elapsed.as_millis() as u64,
                failure,
            };
            (releases, o)
        };

        // Rate limit gate: wait when the window allows, skip when the
        // required wait would blow the whole deadline.
        let decision = self.limiters.check(driver.id(), driver.base_url());
        if !decision.can_proceed {
            if decision.wait > options.timeout {
                let message = format!(
                    "rate limited: required wait {}s exceeds {}ms timeout ({})",
                    decision.wait.as_secs(),
                    options.timeout.as_millis(),
                    decision.reason.unwrap_or_default()
                );
                warn!(indexer_id = %indexer_id, message = %message, "Skipping indexer");
                return outcome(
                    vec![],
                    None,
                    Some(SearchFailure {
                        tag: FailureTag::RateLimit,
                        message,
                    }),
                    start.elapsed(),
                );
            }
            tokio::time::sleep(decision.wait).await;
        }
        self.limiters.record(driver.id(), driver.base_url());

        let searched = tokio::time::timeout(
            options.timeout,
            self.tiered_search(driver.as_ref(), criteria, options),
        )
        .await;

        match searched {
            Err(_) => {
                let message = format!("Search timeout after {}ms", options.timeout.as_millis());
                self.tracker.record_failure(&indexer_id, &message);
                outcome(
                    vec![],
                    None,
                    Some(SearchFailure {
                        tag: FailureTag::Timeout,
                        message,
                    }),
                    start.elapsed(),
                )
            }
            Ok(Err(err)) => {
                let tag = match err {
                    DriverError::Cloudflare => FailureTag::Cloudflare,
                    DriverError::Timeout => FailureTag::Timeout,
                    _ => FailureTag::Error,
                };
                let message = err.to_string();
                self.tracker.record_failure(&indexer_id, &message);
                outcome(
                    vec![],
                    None,
                    Some(SearchFailure { tag, message }),
                    start.elapsed(),
                )
            }
            Ok(Ok((releases, method))) => {
                self.tracker.record_success(&indexer_id);
                outcome(releases, method, None, start.elapsed())
            }
        }
    }

    /// Tier sequence for one indexer. Tiers run sequentially: the text tier
    /// starts only after the ID tier's empty response is confirmed.
    async fn tiered_search(
        &self,
        driver: &dyn IndexerDriver,
        criteria: &SearchCriteria,
        options: &SearchOptions,
    ) -> Result<(Vec<ReleaseResult>, Option<SearchMethod>), DriverError> {
        if !options.use_tiered_search {
            let releases = driver.search(criteria).await?;
            return Ok((releases, None));
        }

        let caps = driver.capabilities();

        if tiering::id_search_supported(caps, criteria) {
            // Movie interactive searches with query text keep query+year on
            // the first ID attempt, then retry stripped.
            let movie_retry = criteria.search_type == SearchType::Movie
                && criteria.search_source == SearchSource::Interactive
                && criteria.has_query_text();

            let first = tiering::build_id_criteria(criteria, movie_retry);
            let releases = driver.search(&first).await?;
            if !releases.is_empty() {
                return Ok((releases, Some(SearchMethod::Id)));
            }

            if movie_retry {
                let stripped = tiering::build_id_criteria(criteria, false);
                let releases = driver.search(&stripped).await?;
                if !releases.is_empty() {
                    return Ok((releases, Some(SearchMethod::Id)));
                }
            }

            debug!(indexer_id = driver.id(), "ID tier empty, falling through to text");
        }

        if criteria.has_query_text() {
            for format in tiering::text_formats(caps, criteria) {
                let text = tiering::build_text_criteria(criteria, format);
                let releases = driver.search(&text).await?;
                if !releases.is_empty() {
                    return Ok((releases, Some(SearchMethod::Text)));
                }
            }
            return Ok((vec![], Some(SearchMethod::Text)));
        }

        // No usable ID support and no text: zero-result success
        Ok((vec![], None))
    }
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("has_metadata", &self.metadata.is_some())
            .field("has_enrichment", &self.enrichment.is_some())
            .finish()
    }
}
