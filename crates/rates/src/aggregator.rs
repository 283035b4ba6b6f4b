//! Statistical reduction of rate observations
//!
//! Two reductions live here:
//! - `aggregate`: many observations of one pair into `AggregateStats`
//! - `reduce_composite`: several whole exchange feeds into one virtual feed

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use pricefeed_core::{
    AggregateStats, CompositeStrategy, DeriveError, DeriveResult, Rate, RawObservation, SourceFeed,
};

/// Median of an unsorted slice; mean of the two middle values for even lengths
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Volume-weighted average; `None` when the total weight is zero
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let total: f64 = weights.iter().sum();
    if values.is_empty() || total == 0.0 {
        return None;
    }
    let sum: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    Some(sum / total)
}

/// Square root of the weighted variance around the weighted mean
pub fn weighted_std(values: &[f64], weights: &[f64]) -> Option<f64> {
    let average = weighted_mean(values, weights)?;
    let deviations: Vec<f64> = values.iter().map(|v| (v - average).powi(2)).collect();
    weighted_mean(&deviations, weights).map(f64::sqrt)
}

/// Reduce the observations of one pair.
///
/// Fails with `InsufficientData` on an empty list. When every volume is zero
/// the weighted statistics use equal weights.
pub fn aggregate(observations: &[RawObservation]) -> DeriveResult<AggregateStats> {
    aggregate_pair("?", "?", observations)
}

/// Same as [`aggregate`], naming the pair in the error
pub fn aggregate_pair(
    base: &str,
    quote: &str,
    observations: &[RawObservation],
) -> DeriveResult<AggregateStats> {
    match observations {
        [] => Err(DeriveError::insufficient(base, quote)),
        [single] => Ok(AggregateStats::single(single.price)),
        _ => {
            let prices: Vec<f64> = observations.iter().map(|o| o.price).collect();
            let mut volumes: Vec<f64> = observations.iter().map(|o| o.volume).collect();
            if volumes.iter().sum::<f64>() == 0.0 {
                warn!("All volumes zero for {}:{}, weighting equally", base, quote);
                volumes.fill(1.0);
            }

            let insufficient = || DeriveError::insufficient(base, quote);
            Ok(AggregateStats {
                median: median(&prices).ok_or_else(insufficient)?,
                mean: mean(&prices).ok_or_else(insufficient)?,
                weighted_mean: weighted_mean(&prices, &volumes).ok_or_else(insufficient)?,
                weighted_std: weighted_std(&prices, &volumes).ok_or_else(insufficient)?,
                sample_count: observations.len(),
            })
        }
    }
}

/// Pick or compute one representative rate from per-exchange candidates.
///
/// Candidates are `(exchange name, rate)`; `order` is only read by
/// `first_valid`.
pub fn select(
    strategy: CompositeStrategy,
    order: &[String],
    candidates: &[(String, Rate)],
) -> Option<Rate> {
    if candidates.is_empty() {
        return None;
    }

    let names = || {
        candidates
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let prices: Vec<f64> = candidates.iter().map(|(_, r)| r.price).collect();
    let volumes: Vec<f64> = candidates.iter().map(|(_, r)| r.volume).collect();
    let total_volume: f64 = volumes.iter().sum();
    let reduced = |price: f64| {
        Rate::new(price, total_volume).with_source(format!("{}({})", strategy.name(), names()))
    };

    match strategy {
        CompositeStrategy::Min => candidates
            .iter()
            .fold(None::<&(String, Rate)>, |best, c| match best {
                Some(b) if b.1.price <= c.1.price => Some(b),
                _ => Some(c),
            })
            .map(|(name, rate)| rate.clone().with_source(name.clone())),
        CompositeStrategy::Max => candidates
            .iter()
            .fold(None::<&(String, Rate)>, |best, c| match best {
                Some(b) if b.1.price >= c.1.price => Some(b),
                _ => Some(c),
            })
            .map(|(name, rate)| rate.clone().with_source(name.clone())),
        CompositeStrategy::Mean => mean(&prices).map(reduced),
        CompositeStrategy::Median => median(&prices).map(reduced),
        CompositeStrategy::WeightedMean => weighted_mean(&prices, &volumes).map(reduced),
        CompositeStrategy::FirstValid => order.iter().find_map(|wanted| {
            candidates
                .iter()
                .find(|(name, _)| name == wanted)
                .map(|(name, rate)| rate.clone().with_source(name.clone()))
        }),
    }
}

/// Reduce several exchange feeds into one feed, pair by pair.
///
/// Candidates are listed in `order` first, then by exchange name.
pub fn reduce_composite(
    strategy: CompositeStrategy,
    order: &[String],
    feeds: &BTreeMap<String, SourceFeed>,
) -> SourceFeed {
    let pairs: BTreeSet<(&str, &str)> = feeds
        .values()
        .flat_map(|feed| feed.iter().map(|(base, quote, _)| (base, quote)))
        .collect();

    let mut result = SourceFeed::new();
    for (base, quote) in pairs {
        let mut candidates: Vec<(String, Rate)> = feeds
            .iter()
            .filter_map(|(name, feed)| feed.get(base, quote).map(|r| (name.clone(), r.clone())))
            .collect();
        // stable: unlisted exchanges keep name order behind the listed ones
        candidates.sort_by_key(|(name, _)| {
            order.iter().position(|o| o == name).unwrap_or(order.len())
        });

        match select(strategy, order, &candidates) {
            Some(rate) => result.add_rate(base, quote, rate),
            None => warn!(
                "Composite {} produced no rate for {}:{}",
                strategy.name(),
                base,
                quote
            ),
        }
    }
    result
}
