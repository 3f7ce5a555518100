//! Indexer abstraction
//!
//! An indexer is a release-directory source: it advertises capabilities
//! (which search types and ID parameters it understands) and answers search
//! criteria with release metadata. The search orchestrator fans out across
//! drivers implementing [IndexerDriver]; eligibility, health, and backoff
//! are tracked here.

pub mod capabilities;
pub mod driver;
pub mod filter;
pub mod newznab;
pub mod status;
pub mod types;

pub use capabilities::{IndexerCapabilities, SearchParam};
pub use driver::{DriverError, IndexerDriver};
pub use filter::{FilterOptions, RejectedIndexer, RejectionReason, filter_indexers};
pub use newznab::NewznabDriver;
pub use status::{BackoffConfig, IndexerStatus, IndexerStatusTracker};
pub use types::{
    DownloadProtocol, ReleaseResult, SearchCriteria, SearchMethod, SearchSource, SearchTextFormat,
    SearchType,
};
