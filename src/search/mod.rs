//! Full-text search.
//!
//! [`SearchIndexManager`] owns the HTTP client to an Elasticsearch-compatible
//! engine, declares the [`IndexFamily`] indices, and answers queries built
//! from [`SearchQuery`]. Search degrades gracefully: an unreachable engine
//! never fails startup (unless marked required) and reads return the
//! "Search unavailable" sentinel.

pub mod indices;
pub mod manager;
pub mod query;

pub use indices::{BoostedField, IndexFamily, global_fields};
pub use manager::{IndexReport, SearchIndexManager};
pub use query::{
    AnalyticsResults, Bucket, DateRange, SearchHit, SearchQuery, SearchResults, SortOrder,
    UNAVAILABLE_MESSAGE,
};
