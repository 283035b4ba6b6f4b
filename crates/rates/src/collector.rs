//! Normalizes per-source rate maps into a symmetric rate graph

use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use pricefeed_core::{ExchangeConfig, Rate, SourceFeed};

use crate::graph::RateGraph;

/// Wildcard that selects every known source
pub const ALL_SOURCES: &str = "*";

/// Ingestion options of one source.
///
/// Symbol aliases are not part of it: they are applied once, when the
/// source's feed is fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOptions {
    pub enabled: bool,
    pub non_invertible_quotes: Vec<String>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            non_invertible_quotes: Vec::new(),
        }
    }
}

impl SourceOptions {
    fn is_invertible(&self, quote: &str) -> bool {
        !self.non_invertible_quotes.iter().any(|q| q == quote)
    }
}

impl From<&ExchangeConfig> for SourceOptions {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            enabled: config.enable,
            non_invertible_quotes: config.all_non_invertible_quotes(),
        }
    }
}

/// Builds a fresh rate graph from a snapshot of source feeds
#[derive(Debug, Clone, Default)]
pub struct RateCollector {
    seed_symbols: Vec<String>,
    options: HashMap<String, SourceOptions>,
}

impl RateCollector {
    pub fn new(seed_symbols: Vec<String>) -> Self {
        Self {
            seed_symbols,
            options: HashMap::new(),
        }
    }

    /// Collector with options taken from the configured exchanges
    pub fn from_exchanges(
        seed_symbols: Vec<String>,
        exchanges: &BTreeMap<String, ExchangeConfig>,
    ) -> Self {
        let options = exchanges
            .iter()
            .map(|(name, config)| (name.clone(), SourceOptions::from(config)))
            .collect();
        Self { seed_symbols, options }
    }

    pub fn with_source_options(mut self, source: impl Into<String>, options: SourceOptions) -> Self {
        self.options.insert(source.into(), options);
        self
    }

    fn options_for(&self, source: &str) -> SourceOptions {
        self.options.get(source).cloned().unwrap_or_default()
    }

    /// Resolve the requested source list, expanding the wildcard
    fn requested_sources(
        &self,
        feeds: &BTreeMap<String, SourceFeed>,
        requested: &[String],
    ) -> Vec<String> {
        if requested.iter().any(|s| s == ALL_SOURCES) {
            let mut all: Vec<String> = feeds.keys().cloned().collect();
            for name in self.options.keys() {
                if !all.contains(name) {
                    all.push(name.clone());
                }
            }
            all.sort();
            return all;
        }
        requested.to_vec()
    }

    /// Ingest the requested sources into a new seeded graph.
    ///
    /// Missing or disabled sources contribute nothing.
    pub fn collect(&self, feeds: &BTreeMap<String, SourceFeed>, requested: &[String]) -> RateGraph {
        let mut graph = RateGraph::seeded(&self.seed_symbols);

        for source in self.requested_sources(feeds, requested) {
            let options = self.options_for(&source);
            if !options.enabled {
                info!("Skip disabled source {}", source);
                continue;
            }
            let Some(feed) = feeds.get(&source) else {
                debug!("Source {} delivered no data this cycle", source);
                continue;
            };
            let added = self.ingest(&mut graph, &source, feed, &options);
            debug!("Collected {} observations from {}", added, source);
        }

        graph
    }

    fn ingest(
        &self,
        graph: &mut RateGraph,
        source: &str,
        feed: &SourceFeed,
        options: &SourceOptions,
    ) -> usize {
        let mut added = 0;

        for (base, quote, rate) in feed.iter() {
            if base.is_empty() || quote.is_empty() {
                continue;
            }
            // no trades, no liquidity
            if rate.volume == 0.0 {
                continue;
            }
            if !rate.price.is_finite() || rate.price <= 0.0 {
                debug!("Ignoring price {} for {}:{} from {}", rate.price, base, quote, source);
                continue;
            }

            graph.add_price(
                base,
                quote,
                rate.price,
                rate.volume,
                vec![source_description(source, base, quote, rate)],
            );
            added += 1;

            if rate.volume > 0.0 && options.is_invertible(quote) {
                graph.add_price(
                    quote,
                    base,
                    1.0 / rate.price,
                    rate.volume * rate.price,
                    vec![source_description(source, quote, base, rate)],
                );
                added += 1;
            }
        }

        added
    }
}

/// Provenance tag of a collected observation
pub fn source_description(source: &str, base: &str, quote: &str, rate: &Rate) -> String {
    format!(
        "{} - {}:{}",
        rate.source.as_deref().unwrap_or(source),
        base,
        quote
    )
}
