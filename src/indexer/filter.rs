//! Indexer eligibility filter
//!
//! Reduces a driver set to those eligible for a criteria, producing a
//! parallel rejection list with one tagged reason per indexer. Checks run
//! in a fixed order so the recorded reason is deterministic: search-type
//! capability, interactive/automatic capability, enabled flag, backoff,
//! explicit allow-list.

use std::sync::Arc;

use serde::Serialize;

use super::driver::IndexerDriver;
use super::status::IndexerStatusTracker;
use super::types::{SearchCriteria, SearchSource};

/// Why an indexer was excluded from a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectionReason {
    /// Indexer does not offer this search type
    SearchType,
    /// Indexer opted out of interactive or automatic searches
    SearchSource,
    /// Indexer is disabled
    Disabled,
    /// Indexer is inside its failure backoff window
    Backoff,
    /// Criteria carried an allow-list that excludes this indexer
    IndexerFilter,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::SearchType => write!(f, "searchType"),
            RejectionReason::SearchSource => write!(f, "searchSource"),
            RejectionReason::Disabled => write!(f, "disabled"),
            RejectionReason::Backoff => write!(f, "backoff"),
            RejectionReason::IndexerFilter => write!(f, "indexerFilter"),
        }
    }
}

/// An excluded indexer and the first check it failed
#[derive(Debug, Clone, Serialize)]
pub struct RejectedIndexer {
    pub indexer_id: String,
    pub indexer_name: String,
    pub reason: RejectionReason,
}

/// Knobs controlling which checks apply
#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub respect_enabled: bool,
    pub respect_backoff: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            respect_enabled: true,
            respect_backoff: true,
        }
    }
}

/// Partition drivers into eligible (sorted by priority, then id) and
/// rejected (with a single reason each).
pub fn filter_indexers(
    drivers: &[Arc<dyn IndexerDriver>],
    tracker: &IndexerStatusTracker,
    criteria: &SearchCriteria,
    options: FilterOptions,
) -> (Vec<Arc<dyn IndexerDriver>>, Vec<RejectedIndexer>) {
    let mut eligible = Vec::new();
    let mut rejected = Vec::new();

    for driver in drivers {
        if let Some(reason) = rejection_for(driver.as_ref(), tracker, criteria, options) {
            rejected.push(RejectedIndexer {
                indexer_id: driver.id().to_string(),
                indexer_name: driver.name().to_string(),
                reason,
            });
        } else {
            eligible.push(driver.clone());
        }
    }

    eligible.sort_by(|a, b| {
        let pa = tracker.get_status_sync(a.id()).priority;
        let pb = tracker.get_status_sync(b.id()).priority;
        pa.cmp(&pb).then_with(|| a.id().cmp(b.id()))
    });

    (eligible, rejected)
}

fn rejection_for(
    driver: &dyn IndexerDriver,
    tracker: &IndexerStatusTracker,
    criteria: &SearchCriteria,
    options: FilterOptions,
) -> Option<RejectionReason> {
    if !driver.capabilities().supports_search_type(criteria.search_type) {
        return Some(RejectionReason::SearchType);
    }

    let source_allowed = match criteria.search_source {
        SearchSource::Interactive => driver.enable_interactive_search(),
        SearchSource::Automatic => driver.enable_automatic_search(),
    };
    if !source_allowed {
        return Some(RejectionReason::SearchSource);
    }

    let status = tracker.get_status_sync(driver.id());
    if options.respect_enabled && !status.is_enabled {
        return Some(RejectionReason::Disabled);
    }

    if options.respect_backoff && !tracker.can_use(driver.id()) {
        return Some(RejectionReason::Backoff);
    }

    if !criteria.indexer_ids.is_empty()
        && !criteria.indexer_ids.iter().any(|id| id == driver.id())
    {
        return Some(RejectionReason::IndexerFilter);
    }

    None
}
