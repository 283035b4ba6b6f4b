//! One derivation cycle over the configured assets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use pricefeed_core::{
    CerBasis, CoreExchangeRate, DeriveError, DeriveResult, FeedConfig, FeedDecision, MarketTicker,
    RawObservation, SourceFeed, TargetPriceAlgorithm, TickerAttribute,
};
use pricefeed_rates::{aggregate_pair, PathDeriver, RateCollector, RateGraph};

use crate::chain::ChainView;
use crate::controller::ControllerStore;
use crate::evaluator::{evaluate, EvaluationInput};
use crate::target::{TargetPriceEngine, TargetPriceInput};

/// Decisions of one cycle plus the symbols left out of it
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivationReport {
    pub decisions: BTreeMap<String, FeedDecision>,
    /// symbol -> reason
    pub skipped: BTreeMap<String, String>,
}

impl DerivationReport {
    pub fn decision(&self, symbol: &str) -> Option<&FeedDecision> {
        self.decisions.get(symbol)
    }
}

/// Runs collect -> derive -> aggregate -> adjust -> evaluate for each asset
pub struct FeedDeriver<'a> {
    config: &'a FeedConfig,
    chain: &'a dyn ChainView,
    store: &'a dyn ControllerStore,
    collector: RateCollector,
    paths: PathDeriver,
    engine: TargetPriceEngine,
}

impl<'a> FeedDeriver<'a> {
    pub fn new(
        config: &'a FeedConfig,
        chain: &'a dyn ChainView,
        store: &'a dyn ControllerStore,
    ) -> Self {
        let mut seed = config.intermediate_assets.clone();
        for symbol in config.asset_symbols() {
            if !seed.contains(&symbol) {
                seed.push(symbol);
            }
        }

        Self {
            config,
            chain,
            store,
            collector: RateCollector::from_exchanges(seed, &config.exchanges),
            paths: PathDeriver::new(config.intermediate_assets.clone()),
            engine: TargetPriceEngine::new(),
        }
    }

    /// Derive every requested symbol; an empty request means all configured assets
    pub fn derive(
        &self,
        feeds: &BTreeMap<String, SourceFeed>,
        requested: &[String],
        now: DateTime<Utc>,
    ) -> DerivationReport {
        let start = Instant::now();
        let symbols = if requested.is_empty() {
            self.config.asset_symbols()
        } else {
            requested.to_vec()
        };

        let mut report = DerivationReport::default();
        for symbol in symbols {
            match self.derive_symbol(feeds, &symbol, now) {
                Ok(decision) => {
                    info!(
                        "{}: price={} premium={:.4}% change={:.4}% flags=[{}]",
                        symbol,
                        decision.price,
                        decision.premium,
                        decision.price_change_percent,
                        decision
                            .flags
                            .iter()
                            .map(|f| f.name())
                            .collect::<Vec<_>>()
                            .join(", ")
                    );
                    report.decisions.insert(symbol, decision);
                }
                Err(e) => {
                    if e.is_unresolved() {
                        warn!("Skipping {}: {}", symbol, e);
                    } else {
                        error!("Failed to derive {}: {}", symbol, e);
                    }
                    report.skipped.insert(symbol, e.to_string());
                }
            }
        }

        info!(
            "Derived {} feeds, skipped {} in {:?}",
            report.decisions.len(),
            report.skipped.len(),
            start.elapsed()
        );
        report
    }

    pub fn derive_symbol(
        &self,
        feeds: &BTreeMap<String, SourceFeed>,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> DeriveResult<FeedDecision> {
        let config = self.config;
        let backing = self
            .chain
            .backing_symbol(symbol)
            .ok_or_else(|| DeriveError::NotSynthetic(symbol.to_string()))?;

        // resolve everything up front so a config error leaves no controller state behind
        let sources = config.sources(symbol)?;
        let metric = config.metric(symbol)?;
        let thresholds = config.thresholds(symbol)?;
        let mssr = config.mssr(symbol)?;
        let mcr = config.mcr(symbol)?;
        let algorithm = config.target_price_algorithm(symbol);
        let reference_cer = match config.core_exchange_rate(symbol) {
            Some(rate) => Some(self.reference_cer(&rate)?),
            None => None,
        };
        let core_exchange_factor = match reference_cer {
            Some(_) => 1.0,
            None => config.core_exchange_factor(symbol)?,
        };

        let mut graph = self.collector.collect(feeds, &sources);
        let alternative = self.alternative_observations(&graph, symbol);
        self.paths
            .derive_paths(&mut graph, symbol, &backing, config.derive_across_3markets(symbol));

        let observations = graph.observations(symbol, &backing).to_vec();
        let stats = aggregate_pair(symbol, &backing, &observations)?;
        let real_price = stats.metric(metric);

        let ticker = self.require_ticker(&backing, symbol)?;
        let prior = match algorithm {
            TargetPriceAlgorithm::Pid(_) => self.store.load(symbol)?,
            _ => None,
        };
        let outcome = self.engine.compute(
            &TargetPriceInput {
                symbol: symbol.to_string(),
                backing_symbol: backing.clone(),
                real_price,
                dex_price: ticker.latest,
                settlement_price: ticker.settlement_price,
                alternative,
            },
            &algorithm,
            prior,
        )?;
        if let Some(state) = outcome.controller_state {
            self.store.save(symbol, state)?;
        }
        let target = outcome.result;

        let cer = reference_cer.unwrap_or_else(|| {
            let basis = match config.cer_basis(symbol) {
                CerBasis::Unadjusted => real_price,
                CerBasis::Adjusted => target.adjusted_price,
            };
            basis * core_exchange_factor
        });

        let current_feed = self.chain.current_feed(symbol);
        let evaluation = evaluate(
            &EvaluationInput {
                new_price: target.adjusted_price,
                previous_price: current_feed.as_ref().map(|f| f.settlement_price),
                producer_is_active: self.chain.producer_is_active(),
                require_active_producer: thresholds.require_active_producer,
                feed_age_seconds: current_feed.as_ref().map(|f| f.age_seconds(now)),
            },
            &thresholds,
        );

        Ok(FeedDecision {
            symbol: symbol.to_string(),
            price: target.adjusted_price,
            unadjusted_price: real_price,
            cer,
            mean: stats.mean,
            median: stats.median,
            weighted: stats.weighted_mean,
            std: stats.weighted_std * 100.0,
            sample_count: stats.sample_count,
            premium: target.premium * 100.0,
            short_backing_symbol: backing,
            mssr,
            mcr,
            price_change_percent: evaluation.price_change_percent,
            flags: evaluation.flags,
            premium_details: target.premium_details,
            current_feed,
            observations,
        })
    }

    fn require_ticker(&self, base: &str, quote: &str) -> DeriveResult<MarketTicker> {
        self.chain
            .ticker(base, quote)
            .ok_or_else(|| DeriveError::MissingTicker {
                base: base.to_string(),
                quote: quote.to_string(),
            })
    }

    /// Core exchange rate read off a reference market
    fn reference_cer(&self, rate: &CoreExchangeRate) -> DeriveResult<f64> {
        let ticker = self.require_ticker(&rate.market_base, &rate.market_quote)?;
        let value = match rate.attribute {
            TickerAttribute::Latest => ticker.latest,
            TickerAttribute::SettlementPrice => ticker.settlement_price,
        };
        Ok(value * rate.factor)
    }

    /// Direct and 2-market observations of (alternative symbol, symbol) in the raw graph
    fn alternative_observations(&self, graph: &RateGraph, symbol: &str) -> Vec<RawObservation> {
        let Some(alternative) = self.config.alternative_symbol(symbol) else {
            return Vec::new();
        };
        let mut observations = graph.observations(&alternative, symbol).to_vec();
        observations.extend(self.paths.two_hop_candidates(graph, &alternative, symbol));
        debug!(
            "{} alternative observations for {}/{}",
            observations.len(),
            alternative,
            symbol
        );
        observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pricefeed_core::{
        AssetParams, FeedFlag, Metric, PidParams, PidState, PublishedFeed,
    };
    use std::collections::BTreeSet;

    use crate::chain::StaticChain;
    use crate::controller::MemoryControllerStore;

    const CONFIG: &str = r#"
producer: init0
intermediate_assets: [USD]
default:
  metric: median
  sources: ["*"]
  min_change: 0.5
  warn_change: 5
  skip_change: 20
  maxage: 3600
  core_exchange_factor: 0.95
  maximum_short_squeeze_ratio: 1.1
  maintenance_collateral_ratio: 1.75
assets:
  USD:
  GOLD:
  SILVER:
  NOROUTE:
"#;

    fn config() -> FeedConfig {
        FeedConfig::from_yaml_str(CONFIG).unwrap()
    }

    fn override_asset(config: &mut FeedConfig, symbol: &str, params: AssetParams) {
        config.assets.insert(symbol.to_string(), Some(params));
    }

    fn feeds() -> BTreeMap<String, SourceFeed> {
        let mut feeds = BTreeMap::new();
        feeds.insert(
            "manual".to_string(),
            SourceFeed::new()
                .with_rate("USD", "BTS", 50.0, 100.0)
                .with_rate("GOLD", "USD", 1800.0, 1.0)
                .with_rate("BITGOLD", "GOLD", 1.01, 5.0),
        );
        feeds
    }

    fn ticker(latest: f64, settlement_price: f64) -> MarketTicker {
        MarketTicker {
            latest,
            settlement_price,
        }
    }

    fn chain() -> StaticChain {
        StaticChain::new()
            .with_asset("USD", "BTS")
            .with_asset("GOLD", "BTS")
            .with_asset("NOROUTE", "BTS")
            .with_ticker("BTS", "USD", ticker(50.0, 50.0))
            .with_ticker("BTS", "GOLD", ticker(90_000.0, 89_000.0))
    }

    fn now() -> DateTime<Utc> {
        "2024-06-01T12:00:00Z".parse().unwrap()
    }

    fn all() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn test_cycle_derives_direct_and_composed() {
        let config = config();
        let chain = chain();
        let store = MemoryControllerStore::new();
        let deriver = FeedDeriver::new(&config, &chain, &store);

        let report = deriver.derive(&feeds(), &all(), now());

        let usd = report.decision("USD").unwrap();
        assert_eq!(usd.price, 50.0);
        assert_eq!(usd.sample_count, 1);
        assert_eq!(usd.short_backing_symbol, "BTS");
        assert_eq!(usd.premium, 0.0);

        let gold = report.decision("GOLD").unwrap();
        assert_eq!(gold.price, 90_000.0);
        assert_eq!(gold.unadjusted_price, 90_000.0);
        assert_eq!(gold.std, 0.0);
        assert!((gold.cer - 90_000.0 * 0.95).abs() < 1e-6);
        assert_eq!(gold.mssr, 1.1);
        assert_eq!(gold.mcr, 1.75);
        assert_eq!(
            gold.observations[0].sources,
            vec!["manual - GOLD:USD".to_string(), "manual - USD:BTS".to_string()]
        );
        assert!(gold.premium_details.alternative.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unresolvable_symbols_are_skipped() {
        let config = config();
        let chain = chain();
        let store = MemoryControllerStore::new();
        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());

        // not a synthetic asset
        assert!(report.skipped["SILVER"].contains("not a synthetic asset"));
        // no market route
        assert!(report.skipped["NOROUTE"].contains("No market route"));
        assert!(report.decision("NOROUTE").is_none());
        assert_eq!(report.decisions.len(), 2);
    }

    #[test]
    fn test_missing_config_skips_only_that_symbol() {
        let mut config = config();
        config.default.metric = None;
        override_asset(
            &mut config,
            "USD",
            AssetParams {
                metric: Some(Metric::Mean),
                ..Default::default()
            },
        );
        let chain = chain();
        let store = MemoryControllerStore::new();

        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());
        assert!(report.decision("USD").is_some());
        assert_eq!(report.skipped["GOLD"], "metric for GOLD not defined");
    }

    #[test]
    fn test_missing_ticker_skips_symbol() {
        let config = config();
        let chain = StaticChain::new().with_asset("USD", "BTS");
        let store = MemoryControllerStore::new();

        let report = FeedDeriver::new(&config, &chain, &store).derive(
            &feeds(),
            &["USD".to_string()],
            now(),
        );
        assert_eq!(report.skipped["USD"], "No ticker for market BTS:USD");
    }

    #[test]
    fn test_flags_against_current_feed() {
        let config = config();
        let chain = chain()
            .with_feed(
                "USD",
                PublishedFeed {
                    settlement_price: 53.5,
                    date: now() - Duration::minutes(10),
                },
            )
            .with_feed(
                "GOLD",
                PublishedFeed {
                    settlement_price: 90_100.0,
                    date: now() - Duration::hours(2),
                },
            );
        let store = MemoryControllerStore::new();
        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());

        let usd = report.decision("USD").unwrap();
        assert!((usd.price_change_percent - 7.0).abs() < 1e-9);
        assert_eq!(
            usd.flags,
            BTreeSet::from([FeedFlag::MinChange, FeedFlag::OverWarnChange])
        );

        let gold = report.decision("GOLD").unwrap();
        assert_eq!(gold.flags, BTreeSet::from([FeedFlag::OverMaxAge]));
    }

    #[test]
    fn test_first_publication_flags() {
        let config = config();
        let chain = chain();
        let store = MemoryControllerStore::new();
        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());

        let usd = report.decision("USD").unwrap();
        assert!(usd.price_change_percent.is_infinite());
        assert!(usd.has_flag(FeedFlag::SkipChange));
        assert!(usd.has_flag(FeedFlag::OverMaxAge));
        assert!(usd.current_feed.is_none());
    }

    #[test]
    fn test_inactive_producer_flag() {
        let mut config = config();
        override_asset(
            &mut config,
            "USD",
            AssetParams {
                skip_inactive_witness: Some(true),
                ..Default::default()
            },
        );
        let chain = chain().with_producer_active(false);
        let store = MemoryControllerStore::new();

        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());
        assert!(report.decision("USD").unwrap().has_flag(FeedFlag::SkipInactiveWitness));
        assert!(!report.decision("GOLD").unwrap().has_flag(FeedFlag::SkipInactiveWitness));
    }

    #[test]
    fn test_pid_state_persisted_between_cycles() {
        let mut config = config();
        override_asset(
            &mut config,
            "GOLD",
            AssetParams {
                target_price_algorithm: Some(TargetPriceAlgorithm::Pid(PidParams {
                    proportional_factor: 0.5,
                    integral_factor: 10.0,
                    derivative_factor: 0.0,
                    integral_adjustment_min: None,
                    integral_adjustment_max: None,
                    safe_upward_feed_change: 1.2,
                    safe_downward_feed_change: 0.8,
                })),
                ..Default::default()
            },
        );
        let chain = chain();
        let store = MemoryControllerStore::new();
        let deriver = FeedDeriver::new(&config, &chain, &store);
        let symbols = vec!["GOLD".to_string()];

        // real == dex: premium 0, i seeded to settlement / real - 1
        let first = deriver.derive(&feeds(), &symbols, now());
        let gold = first.decision("GOLD").unwrap();
        let seeded = store.load("GOLD").unwrap().unwrap();
        assert_eq!(seeded.premium, 0.0);
        assert!((seeded.i - (89_000.0 / 90_000.0 - 1.0)).abs() < 1e-12);
        assert!((gold.price - 89_000.0).abs() < 1e-6);

        let prior = PidState {
            premium: 0.0,
            i: 0.001,
        };
        store.save("GOLD", prior).unwrap();
        let second = deriver.derive(&feeds(), &symbols, now());
        assert!(second.decision("GOLD").is_some());
        // premium 0 leaves the integral unchanged
        assert_eq!(store.load("GOLD").unwrap().unwrap().i, 0.001);
    }

    #[test]
    fn test_non_finite_pid_step_keeps_previous_state() {
        let mut config = config();
        override_asset(
            &mut config,
            "GOLD",
            AssetParams {
                target_price_algorithm: Some(TargetPriceAlgorithm::Pid(PidParams {
                    proportional_factor: 0.5,
                    integral_factor: 0.0,
                    derivative_factor: 0.0,
                    integral_adjustment_min: None,
                    integral_adjustment_max: None,
                    safe_upward_feed_change: 1.2,
                    safe_downward_feed_change: 0.8,
                })),
                ..Default::default()
            },
        );
        let chain = chain();
        let store = MemoryControllerStore::new();
        let deriver = FeedDeriver::new(&config, &chain, &store);
        let symbols = vec!["GOLD".to_string()];

        // cold start never divides by integral_factor
        assert!(deriver.derive(&feeds(), &symbols, now()).decision("GOLD").is_some());
        let seeded = store.load("GOLD").unwrap().unwrap();

        let second = deriver.derive(&feeds(), &symbols, now());
        assert!(second.decision("GOLD").is_none());
        assert!(second.skipped["GOLD"].contains("Controller state"));
        assert_eq!(store.load("GOLD").unwrap(), Some(seeded));
    }

    #[test]
    fn test_cer_basis_and_reference_market() {
        let mut config = config();
        override_asset(
            &mut config,
            "GOLD",
            AssetParams {
                cer_basis: Some(CerBasis::Adjusted),
                target_price_algorithm: Some(TargetPriceAlgorithm::AdjustedFeedPrice {
                    scale: 1.0,
                }),
                ..Default::default()
            },
        );
        override_asset(
            &mut config,
            "USD",
            AssetParams {
                core_exchange_rate: Some(CoreExchangeRate {
                    market_base: "BTS".into(),
                    market_quote: "USD".into(),
                    attribute: TickerAttribute::SettlementPrice,
                    factor: 0.9,
                }),
                ..Default::default()
            },
        );
        let chain = chain().with_ticker("BTS", "GOLD", ticker(88_000.0, 89_000.0));
        let store = MemoryControllerStore::new();
        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());

        let gold = report.decision("GOLD").unwrap();
        let premium = 90_000.0 / 88_000.0 - 1.0;
        let adjusted = 89_000.0 * (1.0 + premium);
        assert!((gold.price - adjusted).abs() < 1e-6);
        assert!((gold.cer - adjusted * 0.95).abs() < 1e-6);
        assert!((gold.premium - premium * 100.0).abs() < 1e-9);

        let usd = report.decision("USD").unwrap();
        assert!((usd.cer - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_alternative_observations_recorded() {
        let mut config = config();
        override_asset(
            &mut config,
            "GOLD",
            AssetParams {
                alternative_symbol: Some("BITGOLD".into()),
                ..Default::default()
            },
        );
        let chain = chain();
        let store = MemoryControllerStore::new();
        let report = FeedDeriver::new(&config, &chain, &store).derive(&feeds(), &all(), now());

        let alternative = report
            .decision("GOLD")
            .unwrap()
            .premium_details
            .alternative
            .clone()
            .unwrap();
        assert_eq!(alternative.len(), 1);
        assert_eq!(alternative[0].price, 1.01);
        assert_eq!(alternative[0].sources, vec!["manual - BITGOLD:GOLD".to_string()]);
    }

    #[test]
    fn test_three_market_route_opt_in() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "manual".to_string(),
            SourceFeed::new()
                .with_rate("GOLD", "USD", 1800.0, 1.0)
                .with_rate("USD", "BTC", 0.00002, 5.0)
                .with_rate("BTC", "BTS", 3_000_000.0, 7.0),
        );
        let chain = chain();
        let store = MemoryControllerStore::new();
        let symbols = vec!["GOLD".to_string()];

        let mut config = config();
        config.intermediate_assets = vec!["BTC".into(), "USD".into()];
        let report = FeedDeriver::new(&config, &chain, &store).derive(&snapshot, &symbols, now());
        assert!(report.decision("GOLD").is_none());

        config.default.derive_across_3markets = Some(true);
        let report = FeedDeriver::new(&config, &chain, &store).derive(&snapshot, &symbols, now());
        let gold = report.decision("GOLD").unwrap();
        assert!((gold.price - 108_000.0).abs() < 1e-6);
    }
}
