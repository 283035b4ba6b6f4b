//! Derived price types and the per-symbol feed decision

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::RawObservation;

/// Statistics over the observations of one (base, quote) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub median: f64,
    pub mean: f64,
    pub weighted_mean: f64,
    pub weighted_std: f64,
    pub sample_count: usize,
}

impl AggregateStats {
    /// Stats of a single observation
    pub fn single(price: f64) -> Self {
        Self {
            median: price,
            mean: price,
            weighted_mean: price,
            weighted_std: 0.0,
            sample_count: 1,
        }
    }

    pub fn metric(&self, metric: crate::Metric) -> f64 {
        match metric {
            crate::Metric::Median => self.median,
            crate::Metric::Mean => self.mean,
            crate::Metric::Weighted => self.weighted_mean,
        }
    }
}

/// Market data used to explain the premium
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumDetails {
    pub dex_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<Vec<RawObservation>>,
}

/// Output of the target price computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPriceResult {
    /// real_price / dex_price - 1
    pub premium: f64,
    pub adjusted_price: f64,
    pub premium_details: PremiumDetails,
}

/// Persisted PID controller snapshot, one per asset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidState {
    pub premium: f64,
    pub i: f64,
}

/// Ticker of an on-chain market
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketTicker {
    pub latest: f64,
    pub settlement_price: f64,
}

/// A feed previously published by this producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedFeed {
    pub settlement_price: f64,
    pub date: DateTime<Utc>,
}

impl PublishedFeed {
    pub fn age_seconds(&self, now: DateTime<Utc>) -> f64 {
        (now - self.date).num_milliseconds() as f64 / 1000.0
    }
}

/// Policy flags raised by the feed evaluator.
///
/// Declaration order is the evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedFlag {
    MinChange,
    OverWarnChange,
    SkipChange,
    SkipInactiveWitness,
    OverMaxAge,
}

impl FeedFlag {
    pub fn name(&self) -> &'static str {
        match self {
            FeedFlag::MinChange => "min_change",
            FeedFlag::OverWarnChange => "over_warn_change",
            FeedFlag::SkipChange => "skip_change",
            FeedFlag::SkipInactiveWitness => "skip_inactive_witness",
            FeedFlag::OverMaxAge => "over_max_age",
        }
    }
}

impl fmt::Display for FeedFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Final, read-only result for one symbol in one derivation cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedDecision {
    pub symbol: String,
    /// Adjusted target price
    pub price: f64,
    /// Aggregate selected by the configured metric, before adjustment
    pub unadjusted_price: f64,
    pub cer: f64,
    pub mean: f64,
    pub median: f64,
    pub weighted: f64,
    /// Weighted standard deviation, in percent
    pub std: f64,
    pub sample_count: usize,
    /// Premium, in percent
    pub premium: f64,
    pub short_backing_symbol: String,
    pub mssr: f64,
    pub mcr: f64,
    pub price_change_percent: f64,
    pub flags: BTreeSet<FeedFlag>,
    pub premium_details: PremiumDetails,
    pub current_feed: Option<PublishedFeed>,
    /// Observations the aggregate was computed from
    pub observations: Vec<RawObservation>,
}

impl FeedDecision {
    pub fn has_flag(&self, flag: FeedFlag) -> bool {
        self.flags.contains(&flag)
    }
}
