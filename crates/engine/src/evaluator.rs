//! Feed change policy

use std::collections::BTreeSet;

use pricefeed_core::{ChangeThresholds, FeedFlag};

/// Everything the policy looks at for one symbol
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationInput {
    pub new_price: f64,
    /// Settlement price this producer published last, if any
    pub previous_price: Option<f64>,
    pub producer_is_active: bool,
    pub require_active_producer: bool,
    /// Seconds since the last on-chain update of this producer's feed
    pub feed_age_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub price_change_percent: f64,
    pub flags: BTreeSet<FeedFlag>,
}

/// `(old - new) / new * 100`; infinite without a previous price
pub fn price_change_percent(new_price: f64, previous_price: Option<f64>) -> f64 {
    match previous_price {
        Some(old) => (old - new_price) / new_price * 100.0,
        None => f64::INFINITY,
    }
}

/// Raise every flag whose condition holds; flags are independent
pub fn evaluate(input: &EvaluationInput, thresholds: &ChangeThresholds) -> Evaluation {
    let change = price_change_percent(input.new_price, input.previous_price);
    let magnitude = change.abs();
    let age = input.feed_age_seconds.unwrap_or(f64::INFINITY);

    let mut flags = BTreeSet::new();
    if magnitude > thresholds.min_change {
        flags.insert(FeedFlag::MinChange);
    }
    if magnitude > thresholds.warn_change {
        flags.insert(FeedFlag::OverWarnChange);
    }
    if magnitude > thresholds.skip_change {
        flags.insert(FeedFlag::SkipChange);
    }
    if input.require_active_producer && !input.producer_is_active {
        flags.insert(FeedFlag::SkipInactiveWitness);
    }
    if age > thresholds.max_age_seconds as f64 {
        flags.insert(FeedFlag::OverMaxAge);
    }

    Evaluation {
        price_change_percent: change,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> ChangeThresholds {
        ChangeThresholds {
            min_change: 1.0,
            warn_change: 5.0,
            skip_change: 10.0,
            max_age_seconds: 3600,
            require_active_producer: false,
        }
    }

    fn input(new_price: f64, previous_price: Option<f64>) -> EvaluationInput {
        EvaluationInput {
            new_price,
            previous_price,
            producer_is_active: true,
            require_active_producer: false,
            feed_age_seconds: Some(60.0),
        }
    }

    fn flags(list: &[FeedFlag]) -> BTreeSet<FeedFlag> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_seven_percent_change_flags() {
        let result = evaluate(&input(100.0, Some(107.0)), &thresholds());

        assert!((result.price_change_percent - 7.0).abs() < 1e-9);
        assert_eq!(
            result.flags,
            flags(&[FeedFlag::MinChange, FeedFlag::OverWarnChange])
        );
    }

    #[test]
    fn test_negative_change_uses_magnitude() {
        let result = evaluate(&input(100.0, Some(88.0)), &thresholds());

        assert!((result.price_change_percent + 12.0).abs() < 1e-9);
        assert_eq!(
            result.flags,
            flags(&[
                FeedFlag::MinChange,
                FeedFlag::OverWarnChange,
                FeedFlag::SkipChange
            ])
        );
    }

    #[test]
    fn test_small_change_raises_nothing() {
        let result = evaluate(&input(100.0, Some(100.5)), &thresholds());
        assert!(result.flags.is_empty());
    }

    #[test]
    fn test_first_publication_trips_change_flags() {
        let mut data = input(100.0, None);
        data.feed_age_seconds = None;

        let result = evaluate(&data, &thresholds());
        assert!(result.price_change_percent.is_infinite());
        assert_eq!(
            result.flags,
            flags(&[
                FeedFlag::MinChange,
                FeedFlag::OverWarnChange,
                FeedFlag::SkipChange,
                FeedFlag::OverMaxAge
            ])
        );
    }

    #[test]
    fn test_inactive_producer_only_when_required() {
        let mut data = input(100.0, Some(100.0));
        data.producer_is_active = false;
        assert!(evaluate(&data, &thresholds()).flags.is_empty());

        data.require_active_producer = true;
        assert_eq!(
            evaluate(&data, &thresholds()).flags,
            flags(&[FeedFlag::SkipInactiveWitness])
        );
    }

    #[test]
    fn test_stale_feed_over_max_age() {
        let mut data = input(100.0, Some(100.0));
        data.feed_age_seconds = Some(3601.0);
        assert_eq!(
            evaluate(&data, &thresholds()).flags,
            flags(&[FeedFlag::OverMaxAge])
        );
    }
}
