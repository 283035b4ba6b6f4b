//! Configuration types
//!
//! The feed configuration is a YAML document with a `default` parameter
//! bucket and per-asset overrides. Every per-asset parameter is resolved in
//! two levels: `assets[symbol][field]`, then `default[field]`, then an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{ConfigError, ConfigResult, Metric, Rate};

/// How a composite source reduces several exchanges into one rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeStrategy {
    Min,
    Max,
    Mean,
    Median,
    WeightedMean,
    FirstValid,
}

impl CompositeStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            CompositeStrategy::Min => "min",
            CompositeStrategy::Max => "max",
            CompositeStrategy::Mean => "mean",
            CompositeStrategy::Median => "median",
            CompositeStrategy::WeightedMean => "weighted_mean",
            CompositeStrategy::FirstValid => "first_valid",
        }
    }
}

/// Source implementation selected by the `klass` key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "klass", rename_all = "snake_case")]
pub enum SourceKind {
    /// Static rates written in the configuration
    Manual {
        #[serde(default)]
        feed: BTreeMap<String, BTreeMap<String, Rate>>,
    },
    /// Algorithmic HERTZ:USD reference rate
    Hertz,
    /// Reduction over several nested exchanges
    Composite {
        aggregation_type: CompositeStrategy,
        #[serde(default)]
        order: Vec<String>,
        exchanges: BTreeMap<String, ExchangeConfig>,
    },
}

/// One configured exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Symbol renames applied when the exchange's rates are ingested
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default = "default_volume_scale")]
    pub scale_volume_by: f64,
    /// Fall back to the last cached fetch when the live fetch fails
    #[serde(default)]
    pub allow_cache: bool,
    /// Quotes that must not be inverted (e.g. capitalization indices)
    #[serde(default)]
    pub non_invertible_quotes: Vec<String>,
    #[serde(flatten)]
    pub kind: SourceKind,
}

fn default_true() -> bool {
    true
}

fn default_volume_scale() -> f64 {
    1.0
}

impl ExchangeConfig {
    pub fn manual(feed: BTreeMap<String, BTreeMap<String, Rate>>) -> Self {
        Self {
            enable: true,
            aliases: BTreeMap::new(),
            scale_volume_by: 1.0,
            allow_cache: false,
            non_invertible_quotes: Vec::new(),
            kind: SourceKind::Manual { feed },
        }
    }

    /// Non-invertible quotes of this exchange and of every nested one.
    ///
    /// A composite feed carries its children's pairs, so it inherits their
    /// quotes too.
    pub fn all_non_invertible_quotes(&self) -> Vec<String> {
        let mut quotes = self.non_invertible_quotes.clone();
        if let SourceKind::Composite { exchanges, .. } = &self.kind {
            for inner in exchanges.values() {
                for quote in inner.all_non_invertible_quotes() {
                    if !quotes.contains(&quote) {
                        quotes.push(quote);
                    }
                }
            }
        }
        quotes
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        if let SourceKind::Composite {
            aggregation_type,
            order,
            exchanges,
        } = &self.kind
        {
            if exchanges.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "composite source {name} needs 'exchanges'"
                )));
            }
            if *aggregation_type == CompositeStrategy::FirstValid && order.is_empty() {
                return Err(ConfigError::invalid(format!(
                    "composite source {name} needs an 'order' for first_valid"
                )));
            }
            for (inner, config) in exchanges {
                config.validate(inner)?;
            }
        }
        Ok(())
    }
}

/// Parameters of the PID target price controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub proportional_factor: f64,
    pub integral_factor: f64,
    #[serde(default)]
    pub derivative_factor: f64,
    #[serde(default)]
    pub integral_adjustment_min: Option<f64>,
    #[serde(default)]
    pub integral_adjustment_max: Option<f64>,
    pub safe_upward_feed_change: f64,
    pub safe_downward_feed_change: f64,
}

impl PidParams {
    fn validate(&self, owner: &str) -> ConfigResult<()> {
        let invalid = |msg: String| -> ConfigResult<()> {
            Err(ConfigError::invalid(format!("pid of {owner}: {msg}")))
        };

        if !self.integral_factor.is_finite() || self.integral_factor == 0.0 {
            return invalid(format!(
                "integral_factor must be finite and non-zero, got {}",
                self.integral_factor
            ));
        }
        for (field, value) in [
            ("proportional_factor", self.proportional_factor),
            ("derivative_factor", self.derivative_factor),
        ] {
            if !value.is_finite() {
                return invalid(format!("{field} must be finite, got {value}"));
            }
        }
        for (field, value) in [
            ("safe_upward_feed_change", self.safe_upward_feed_change),
            ("safe_downward_feed_change", self.safe_downward_feed_change),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{field} must be finite and positive, got {value}"));
            }
        }
        if let (Some(min), Some(max)) = (self.integral_adjustment_min, self.integral_adjustment_max)
        {
            if min > max {
                return invalid(format!(
                    "integral_adjustment_min {min} exceeds integral_adjustment_max {max}"
                ));
            }
        }
        Ok(())
    }
}

/// Target price adjustment algorithm, selected per asset
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum TargetPriceAlgorithm {
    /// Publish the aggregate unchanged
    #[default]
    Identity,
    AdjustedFeedPrice {
        scale: f64,
    },
    AdjustedRealPriceEmpowered {
        theoretical_premium: f64,
        acceleration_factor: f64,
    },
    AdjustedDexPriceUsingBuckets,
    Pid(PidParams),
}

impl TargetPriceAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            TargetPriceAlgorithm::Identity => "identity",
            TargetPriceAlgorithm::AdjustedFeedPrice { .. } => "adjusted_feed_price",
            TargetPriceAlgorithm::AdjustedRealPriceEmpowered { .. } => {
                "adjusted_real_price_empowered"
            }
            TargetPriceAlgorithm::AdjustedDexPriceUsingBuckets => {
                "adjusted_dex_price_using_buckets"
            }
            TargetPriceAlgorithm::Pid(_) => "pid",
        }
    }
}

/// Which price the core exchange rate is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CerBasis {
    /// The aggregate selected by the metric
    #[default]
    Unadjusted,
    /// The adjusted target price
    Adjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerAttribute {
    Latest,
    SettlementPrice,
}

/// Core exchange rate taken from a reference market instead of the feed price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreExchangeRate {
    pub market_base: String,
    pub market_quote: String,
    pub attribute: TickerAttribute,
    pub factor: f64,
}

/// Per-asset parameters; every field can come from `default` instead
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AssetParams {
    pub sources: Option<Vec<String>>,
    pub metric: Option<Metric>,
    pub target_price_algorithm: Option<TargetPriceAlgorithm>,
    pub min_change: Option<f64>,
    pub warn_change: Option<f64>,
    pub skip_change: Option<f64>,
    /// Seconds after which the published feed must be refreshed
    pub maxage: Option<u64>,
    pub skip_inactive_witness: Option<bool>,
    pub derive_across_3markets: Option<bool>,
    pub core_exchange_factor: Option<f64>,
    pub core_exchange_rate: Option<CoreExchangeRate>,
    pub cer_basis: Option<CerBasis>,
    pub maximum_short_squeeze_ratio: Option<f64>,
    pub maintenance_collateral_ratio: Option<f64>,
    /// On-chain ticker quoted against the asset itself (e.g. BITCNY for CNY)
    pub alternative_symbol: Option<String>,
}

impl AssetParams {
    /// Reject values that would only fail once a cycle runs
    fn validate(&self, owner: &str) -> ConfigResult<()> {
        for (field, value) in [
            ("min_change", self.min_change),
            ("warn_change", self.warn_change),
            ("skip_change", self.skip_change),
        ] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(ConfigError::invalid(format!(
                        "{field} of {owner} must be a non-negative percentage, got {value}"
                    )));
                }
            }
        }
        if let Some(TargetPriceAlgorithm::Pid(params)) = &self.target_price_algorithm {
            params.validate(owner)?;
        }
        Ok(())
    }
}

/// Price change thresholds of one asset, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChangeThresholds {
    pub min_change: f64,
    pub warn_change: f64,
    pub skip_change: f64,
    pub max_age_seconds: u64,
    pub require_active_producer: bool,
}

/// Complete feed configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub producer: String,
    #[serde(default)]
    pub intermediate_assets: Vec<String>,
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
    #[serde(default)]
    pub default: AssetParams,
    /// Assets to derive; an empty entry (`USD:`) uses defaults only
    #[serde(default)]
    pub assets: BTreeMap<String, Option<AssetParams>>,
}

impl FeedConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: FeedConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.producer.trim().is_empty() {
            return Err(ConfigError::invalid("a feed producer name is required"));
        }
        for (name, exchange) in &self.exchanges {
            exchange.validate(name)?;
        }
        self.default.validate("default")?;
        for (symbol, params) in &self.assets {
            if let Some(params) = params {
                params.validate(symbol)?;
            }
        }
        Ok(())
    }

    pub fn asset_symbols(&self) -> Vec<String> {
        self.assets.keys().cloned().collect()
    }

    /// Two-level lookup: asset override, then default
    pub fn resolve_opt<T: Clone>(
        &self,
        symbol: &str,
        get: impl Fn(&AssetParams) -> Option<&T>,
    ) -> Option<T> {
        self.assets
            .get(symbol)
            .and_then(|params| params.as_ref())
            .and_then(&get)
            .or_else(|| get(&self.default))
            .cloned()
    }

    /// Two-level lookup that fails when neither level defines the field
    pub fn resolve<T: Clone>(
        &self,
        symbol: &str,
        field: &'static str,
        get: impl Fn(&AssetParams) -> Option<&T>,
    ) -> ConfigResult<T> {
        self.resolve_opt(symbol, get)
            .ok_or_else(|| ConfigError::missing(symbol, field))
    }

    pub fn sources(&self, symbol: &str) -> ConfigResult<Vec<String>> {
        self.resolve(symbol, "sources", |p| p.sources.as_ref())
    }

    pub fn metric(&self, symbol: &str) -> ConfigResult<Metric> {
        self.resolve(symbol, "metric", |p| p.metric.as_ref())
    }

    pub fn target_price_algorithm(&self, symbol: &str) -> TargetPriceAlgorithm {
        self.resolve_opt(symbol, |p| p.target_price_algorithm.as_ref())
            .unwrap_or_default()
    }

    pub fn derive_across_3markets(&self, symbol: &str) -> bool {
        self.resolve_opt(symbol, |p| p.derive_across_3markets.as_ref())
            .unwrap_or(false)
    }

    pub fn thresholds(&self, symbol: &str) -> ConfigResult<ChangeThresholds> {
        Ok(ChangeThresholds {
            min_change: self.resolve(symbol, "min_change", |p| p.min_change.as_ref())?,
            warn_change: self.resolve(symbol, "warn_change", |p| p.warn_change.as_ref())?,
            skip_change: self.resolve(symbol, "skip_change", |p| p.skip_change.as_ref())?,
            max_age_seconds: self.resolve(symbol, "maxage", |p| p.maxage.as_ref())?,
            require_active_producer: self
                .resolve_opt(symbol, |p| p.skip_inactive_witness.as_ref())
                .unwrap_or(false),
        })
    }

    pub fn core_exchange_factor(&self, symbol: &str) -> ConfigResult<f64> {
        self.resolve(symbol, "core_exchange_factor", |p| {
            p.core_exchange_factor.as_ref()
        })
    }

    pub fn core_exchange_rate(&self, symbol: &str) -> Option<CoreExchangeRate> {
        self.resolve_opt(symbol, |p| p.core_exchange_rate.as_ref())
    }

    pub fn cer_basis(&self, symbol: &str) -> CerBasis {
        self.resolve_opt(symbol, |p| p.cer_basis.as_ref())
            .unwrap_or_default()
    }

    pub fn mssr(&self, symbol: &str) -> ConfigResult<f64> {
        self.resolve(symbol, "maximum_short_squeeze_ratio", |p| {
            p.maximum_short_squeeze_ratio.as_ref()
        })
    }

    pub fn mcr(&self, symbol: &str) -> ConfigResult<f64> {
        self.resolve(symbol, "maintenance_collateral_ratio", |p| {
            p.maintenance_collateral_ratio.as_ref()
        })
    }

    pub fn alternative_symbol(&self, symbol: &str) -> Option<String> {
        self.resolve_opt(symbol, |p| p.alternative_symbol.as_ref())
    }
}
