//! Core type definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single rate observation: price of `quote` expressed in `base`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub price: f64,
    pub volume: f64,
    /// Provenance chain, one entry per market leg
    pub sources: Vec<String>,
}

impl RawObservation {
    pub fn new(price: f64, volume: f64, sources: Vec<String>) -> Self {
        Self { price, volume, sources }
    }

    /// Observation with a single provenance tag
    pub fn tagged(price: f64, volume: f64, source: impl Into<String>) -> Self {
        Self {
            price,
            volume,
            sources: vec![source.into()],
        }
    }

    /// Compose market legs into one observation.
    ///
    /// Prices of `legs` multiply; provenance tags of `tags` are concatenated
    /// in the order given.
    pub fn chain(legs: &[&RawObservation], volume: f64, tags: &[&RawObservation]) -> Self {
        let price = legs.iter().map(|l| l.price).product();
        let sources = tags.iter().flat_map(|l| l.sources.iter().cloned()).collect();
        Self { price, volume, sources }
    }
}

/// A (base, quote) market pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub base: String,
    pub quote: String,
}

impl PairKey {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            base: self.quote.clone(),
            quote: self.base.clone(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.base, self.quote)
    }
}

/// One price/volume entry reported by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    pub price: f64,
    pub volume: f64,
    /// Overrides the exchange name in provenance strings (composite sources)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Rate {
    pub fn new(price: f64, volume: f64) -> Self {
        Self {
            price,
            volume,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Output of a single source fetch: base -> quote -> rate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFeed {
    #[serde(default)]
    pub rates: BTreeMap<String, BTreeMap<String, Rate>>,
    /// Raw upstream payload kept for debugging, never read by the core
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

impl SourceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rate(&mut self, base: impl Into<String>, quote: impl Into<String>, rate: Rate) {
        self.rates
            .entry(base.into())
            .or_default()
            .insert(quote.into(), rate);
    }

    pub fn with_rate(mut self, base: &str, quote: &str, price: f64, volume: f64) -> Self {
        self.add_rate(base, quote, Rate::new(price, volume));
        self
    }

    pub fn get(&self, base: &str, quote: &str) -> Option<&Rate> {
        self.rates.get(base).and_then(|quotes| quotes.get(quote))
    }

    /// Iterate all `(base, quote, rate)` triples in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Rate)> {
        self.rates.iter().flat_map(|(base, quotes)| {
            quotes
                .iter()
                .map(move |(quote, rate)| (base.as_str(), quote.as_str(), rate))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.rates.values().all(|quotes| quotes.is_empty())
    }

    pub fn rate_count(&self) -> usize {
        self.rates.values().map(|quotes| quotes.len()).sum()
    }

    /// Rename base and quote symbols; unmapped symbols are kept
    pub fn with_aliases(self, aliases: &BTreeMap<String, String>) -> Self {
        if aliases.is_empty() {
            return self;
        }
        let rename = |symbol: String| aliases.get(&symbol).cloned().unwrap_or(symbol);

        let mut rates: BTreeMap<String, BTreeMap<String, Rate>> = BTreeMap::new();
        for (base, quotes) in self.rates {
            let entry = rates.entry(rename(base)).or_default();
            for (quote, rate) in quotes {
                entry.insert(rename(quote), rate);
            }
        }
        Self {
            rates,
            response: self.response,
        }
    }

    /// Multiply every volume by `factor`
    pub fn scale_volumes(&mut self, factor: f64) {
        for quotes in self.rates.values_mut() {
            for rate in quotes.values_mut() {
                rate.volume *= factor;
            }
        }
    }
}

/// Which aggregate statistic feeds the target price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Median,
    Mean,
    Weighted,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Median => "median",
            Metric::Mean => "mean",
            Metric::Weighted => "weighted",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
