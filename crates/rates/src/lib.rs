//! Rate collection and derivation
//!
//! Features:
//! - Symmetric rate graph built from many source feeds
//! - 2- and 3-market path composition through intermediate assets
//! - Median / mean / volume-weighted statistics
//! - Composite sources reducing several exchanges into one
//! - Bounded concurrent fetching with per-source failure isolation

pub mod aggregator;
pub mod collector;
pub mod feeds;
pub mod graph;
pub mod paths;

pub use aggregator::{aggregate, aggregate_pair, reduce_composite, select};
pub use collector::{RateCollector, SourceOptions, ALL_SOURCES};
pub use feeds::{build_source, fetch_all, FetchOptions, RateSource};
pub use graph::{RateGraph, RateGraphStats};
pub use paths::PathDeriver;
