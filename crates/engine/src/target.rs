//! Target price adjustment
//!
//! Turns the aggregated "real" price into the price to publish, using the
//! on-chain market of the asset against its backing asset:
//! - premium = real / dex - 1
//! - per-asset algorithm decides how far to lean against the premium
//! - the PID controller carries `{premium, i}` from one cycle to the next

use tracing::debug;

use pricefeed_core::{
    DeriveError, DeriveResult, PidParams, PidState, PremiumDetails, RawObservation,
    TargetPriceAlgorithm, TargetPriceResult,
};

/// Hard ceiling on the PID upward adjustment factor
pub const PID_MAX_FACTOR: f64 = 1.5;

/// Market prices feeding one target price computation
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPriceInput {
    pub symbol: String,
    pub backing_symbol: String,
    /// Aggregate selected by the asset's metric
    pub real_price: f64,
    /// Latest trade on the (backing, symbol) market
    pub dex_price: f64,
    /// Currently active on-chain settlement price
    pub settlement_price: f64,
    pub alternative: Vec<RawObservation>,
}

/// Result plus the controller state to persist, if any
#[derive(Debug, Clone, PartialEq)]
pub struct TargetPriceOutcome {
    pub result: TargetPriceResult,
    pub controller_state: Option<PidState>,
}

/// Stateless target price calculator
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetPriceEngine;

impl TargetPriceEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(
        &self,
        input: &TargetPriceInput,
        algorithm: &TargetPriceAlgorithm,
        prior: Option<PidState>,
    ) -> DeriveResult<TargetPriceOutcome> {
        check_price("dex", input.dex_price)?;
        check_price("real", input.real_price)?;

        let real = input.real_price;
        let dex = input.dex_price;
        let settlement = input.settlement_price;
        let premium = real / dex - 1.0;

        let mut controller_state = None;
        let adjusted_price = match algorithm {
            TargetPriceAlgorithm::Identity => real,
            TargetPriceAlgorithm::AdjustedFeedPrice { scale } => {
                settlement * (1.0 + premium * scale)
            }
            TargetPriceAlgorithm::AdjustedRealPriceEmpowered {
                theoretical_premium,
                acceleration_factor,
            } => real * (1.0 + premium + theoretical_premium).powf(*acceleration_factor),
            TargetPriceAlgorithm::AdjustedDexPriceUsingBuckets => {
                bucket_price(premium, real, dex)
            }
            TargetPriceAlgorithm::Pid(params) => {
                check_price("settlement", settlement)?;
                let step = pid_step(params, premium, real, settlement, prior);
                // never persist a state the next cycle cannot reload
                if !(step.state.i.is_finite() && step.applied_factor.is_finite()) {
                    return Err(DeriveError::ControllerState(format!(
                        "{}: non-finite controller step (i={}, factor={})",
                        input.symbol, step.state.i, step.applied_factor
                    )));
                }
                controller_state = Some(step.state);
                dex * step.applied_factor
            }
        };

        debug!(
            "{} target price via {}: real={} dex={} premium={:.6} adjusted={}",
            input.symbol,
            algorithm.name(),
            real,
            dex,
            premium,
            adjusted_price
        );

        let alternative = if input.alternative.is_empty() {
            None
        } else {
            Some(input.alternative.clone())
        };

        Ok(TargetPriceOutcome {
            result: TargetPriceResult {
                premium,
                adjusted_price,
                premium_details: PremiumDetails {
                    dex_price: dex,
                    alternative,
                },
            },
            controller_state,
        })
    }
}

fn check_price(what: &'static str, value: f64) -> DeriveResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DeriveError::InvalidPrice { what, value })
    }
}

/// Upward-only adjustment in three linear buckets, breaking at 1% and 2.4%
fn bucket_price(premium: f64, real: f64, dex: f64) -> f64 {
    if premium <= 0.0 {
        real
    } else if premium <= 0.01 {
        dex * (1.0 + 0.096 * (premium * 100.0))
    } else if premium <= 0.024 {
        dex * 1.096
    } else {
        dex * (1.0 + 4.0 * premium)
    }
}

/// One PID controller step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidStep {
    pub raw_factor: f64,
    pub applied_factor: f64,
    pub state: PidState,
}

pub fn pid_step(
    params: &PidParams,
    premium: f64,
    real_price: f64,
    settlement_price: f64,
    prior: Option<PidState>,
) -> PidStep {
    let p = params.proportional_factor * premium;

    let (mut i, d) = match prior {
        // seeded so that a zero premium publishes the settlement ratio unchanged
        None => (settlement_price / real_price - 1.0 - p, 0.0),
        Some(prior) => (
            prior.i + premium / params.integral_factor,
            params.derivative_factor * (premium - prior.premium),
        ),
    };
    if let Some(min) = params.integral_adjustment_min {
        i = i.max(min);
    }
    if let Some(max) = params.integral_adjustment_max {
        i = i.min(max);
    }

    let raw_factor = 1.0 + p + i + d;
    let settlement_ratio = settlement_price / real_price;
    let applied_factor = if raw_factor > 1.0 {
        raw_factor
            .min(PID_MAX_FACTOR)
            .min(params.safe_upward_feed_change * settlement_ratio)
    } else {
        raw_factor.max(params.safe_downward_feed_change * settlement_ratio)
    };

    PidStep {
        raw_factor,
        applied_factor,
        state: PidState { premium, i },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(real: f64, dex: f64, settlement: f64) -> TargetPriceInput {
        TargetPriceInput {
            symbol: "USD".into(),
            backing_symbol: "BTS".into(),
            real_price: real,
            dex_price: dex,
            settlement_price: settlement,
            alternative: vec![],
        }
    }

    fn pid(proportional_factor: f64) -> PidParams {
        PidParams {
            proportional_factor,
            integral_factor: 100.0,
            derivative_factor: 0.0,
            integral_adjustment_min: None,
            integral_adjustment_max: None,
            safe_upward_feed_change: 1.05,
            safe_downward_feed_change: 0.95,
        }
    }

    fn adjusted(input: &TargetPriceInput, algorithm: &TargetPriceAlgorithm) -> f64 {
        TargetPriceEngine::new()
            .compute(input, algorithm, None)
            .unwrap()
            .result
            .adjusted_price
    }

    #[test]
    fn test_identity_publishes_real_price() {
        let outcome = TargetPriceEngine::new()
            .compute(&input(0.022, 0.02, 0.021), &TargetPriceAlgorithm::Identity, None)
            .unwrap();

        assert_eq!(outcome.result.adjusted_price, 0.022);
        assert!((outcome.result.premium - 0.1).abs() < 1e-12);
        assert_eq!(outcome.result.premium_details.dex_price, 0.02);
        assert!(outcome.result.premium_details.alternative.is_none());
        assert!(outcome.controller_state.is_none());
    }

    #[test]
    fn test_adjusted_feed_price() {
        let algorithm = TargetPriceAlgorithm::AdjustedFeedPrice { scale: 0.5 };
        // premium 10%
        let price = adjusted(&input(110.0, 100.0, 90.0), &algorithm);
        assert!((price - 90.0 * 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_adjusted_real_price_empowered() {
        let algorithm = TargetPriceAlgorithm::AdjustedRealPriceEmpowered {
            theoretical_premium: 0.0,
            acceleration_factor: 2.0,
        };
        let price = adjusted(&input(110.0, 100.0, 90.0), &algorithm);
        assert!((price - 110.0 * 1.1 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_dex_price_buckets() {
        let algorithm = TargetPriceAlgorithm::AdjustedDexPriceUsingBuckets;

        // 0.5% premium, first bucket
        let price = adjusted(&input(100.5, 100.0, 100.0), &algorithm);
        assert!((price - 100.0 * (1.0 + 0.096 * 0.5)).abs() < 1e-6);

        // 2% premium, flat bucket
        let price = adjusted(&input(102.0, 100.0, 100.0), &algorithm);
        assert!((price - 109.6).abs() < 1e-9);

        // 5% premium, steep bucket
        let price = adjusted(&input(105.0, 100.0, 100.0), &algorithm);
        assert!((price - 120.0).abs() < 1e-6);

        // discount leaves the real price untouched
        let price = adjusted(&input(95.0, 100.0, 100.0), &algorithm);
        assert_eq!(price, 95.0);
    }

    #[test]
    fn test_pid_cold_start_is_identity() {
        for factor in [0.0, 0.5, 3.0] {
            let algorithm = TargetPriceAlgorithm::Pid(pid(factor));
            let outcome = TargetPriceEngine::new()
                .compute(&input(100.0, 100.0, 100.0), &algorithm, None)
                .unwrap();

            assert_eq!(outcome.result.premium, 0.0);
            assert!((outcome.result.adjusted_price - 100.0).abs() < 1e-9);
            assert_eq!(
                outcome.controller_state,
                Some(PidState {
                    premium: 0.0,
                    i: 0.0
                })
            );
        }
    }

    #[test]
    fn test_pid_upward_clamp() {
        let params = PidParams {
            proportional_factor: 0.0,
            integral_factor: 1e12,
            safe_upward_feed_change: 0.05,
            ..pid(0.0)
        };
        let prior = PidState {
            premium: 0.0,
            i: 1.0,
        };

        let step = pid_step(&params, 100.0 / 90.0 - 1.0, 100.0, 100.0, Some(prior));
        assert!((step.raw_factor - 2.0).abs() < 1e-9);
        assert!((step.applied_factor - 0.05).abs() < 1e-12);

        let outcome = TargetPriceEngine::new()
            .compute(
                &input(100.0, 90.0, 100.0),
                &TargetPriceAlgorithm::Pid(params),
                Some(prior),
            )
            .unwrap();
        assert!((outcome.result.adjusted_price - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_pid_hard_ceiling() {
        let params = PidParams {
            safe_upward_feed_change: 10.0,
            ..pid(0.0)
        };
        let prior = PidState {
            premium: 0.0,
            i: 3.0,
        };
        let step = pid_step(&params, 0.0, 100.0, 100.0, Some(prior));
        assert_eq!(step.applied_factor, PID_MAX_FACTOR);
    }

    #[test]
    fn test_pid_downward_floor() {
        let prior = PidState {
            premium: 0.0,
            i: -0.5,
        };
        let step = pid_step(&pid(0.0), 0.0, 100.0, 100.0, Some(prior));
        assert!((step.raw_factor - 0.5).abs() < 1e-12);
        assert!((step.applied_factor - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_pid_integral_accumulates_and_clamps() {
        let params = PidParams {
            integral_adjustment_max: Some(0.015),
            ..pid(0.0)
        };
        let prior = PidState {
            premium: 0.01,
            i: 0.01,
        };

        let step = pid_step(&params, 0.2, 100.0, 100.0, Some(prior));
        // 0.01 + 0.2 / 100 = 0.012, inside the clamp
        assert!((step.state.i - 0.012).abs() < 1e-12);
        assert_eq!(step.state.premium, 0.2);

        let step = pid_step(&params, 1.0, 100.0, 100.0, Some(step.state));
        assert_eq!(step.state.i, 0.015);
    }

    #[test]
    fn test_pid_derivative_term() {
        let params = PidParams {
            derivative_factor: 2.0,
            ..pid(0.0)
        };
        let prior = PidState {
            premium: 0.01,
            i: 0.0,
        };
        let step = pid_step(&params, 0.02, 100.0, 100.0, Some(prior));
        // i = 0.0002, d = 0.02
        assert!((step.raw_factor - 1.0202).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_prices_rejected() {
        let engine = TargetPriceEngine::new();
        let algorithm = TargetPriceAlgorithm::Identity;

        assert!(matches!(
            engine.compute(&input(1.0, 0.0, 1.0), &algorithm, None),
            Err(DeriveError::InvalidPrice { what: "dex", .. })
        ));
        assert!(matches!(
            engine.compute(&input(f64::NAN, 1.0, 1.0), &algorithm, None),
            Err(DeriveError::InvalidPrice { what: "real", .. })
        ));
    }

    #[test]
    fn test_pid_non_finite_integral_not_persisted() {
        let params = PidParams {
            integral_factor: 0.0,
            ..pid(0.0)
        };
        let prior = PidState { premium: 0.0, i: 0.0 };

        let result = TargetPriceEngine::new().compute(
            &input(105.0, 100.0, 100.0),
            &TargetPriceAlgorithm::Pid(params),
            Some(prior),
        );
        assert!(matches!(result, Err(DeriveError::ControllerState(_))));
    }

    #[test]
    fn test_alternative_carried_when_present() {
        let mut data = input(1.0, 1.0, 1.0);
        data.alternative = vec![RawObservation::tagged(1.01, 5.0, "gateway")];

        let outcome = TargetPriceEngine::new()
            .compute(&data, &TargetPriceAlgorithm::Identity, None)
            .unwrap();
        assert_eq!(
            outcome.result.premium_details.alternative,
            Some(vec![RawObservation::tagged(1.01, 5.0, "gateway")])
        );
    }
}
