//! Read-only view of the chain the feeds are published to

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use pricefeed_core::{ConfigResult, MarketTicker, PairKey, PublishedFeed};

/// Chain queries the derivation cycle depends on
pub trait ChainView: Send + Sync {
    /// Backing asset of a synthetic asset; `None` for anything else
    fn backing_symbol(&self, symbol: &str) -> Option<String>;

    fn ticker(&self, base: &str, quote: &str) -> Option<MarketTicker>;

    /// Latest feed this producer published for `symbol`
    fn current_feed(&self, symbol: &str) -> Option<PublishedFeed>;

    fn producer_is_active(&self) -> bool;
}

/// Chain snapshot loaded from a YAML or JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticChain {
    #[serde(default = "default_true")]
    pub producer_active: bool,
    /// symbol -> backing symbol
    #[serde(default)]
    pub backing: BTreeMap<String, String>,
    /// "BASE:QUOTE" -> ticker
    #[serde(default)]
    pub tickers: BTreeMap<String, MarketTicker>,
    #[serde(default)]
    pub feeds: BTreeMap<String, PublishedFeed>,
}

fn default_true() -> bool {
    true
}

impl Default for StaticChain {
    fn default() -> Self {
        Self {
            producer_active: true,
            backing: BTreeMap::new(),
            tickers: BTreeMap::new(),
            feeds: BTreeMap::new(),
        }
    }
}

impl StaticChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn with_asset(mut self, symbol: &str, backing: &str) -> Self {
        self.backing.insert(symbol.to_string(), backing.to_string());
        self
    }

    pub fn with_ticker(mut self, base: &str, quote: &str, ticker: MarketTicker) -> Self {
        self.tickers.insert(PairKey::new(base, quote).to_string(), ticker);
        self
    }

    pub fn with_feed(mut self, symbol: &str, feed: PublishedFeed) -> Self {
        self.feeds.insert(symbol.to_string(), feed);
        self
    }

    pub fn with_producer_active(mut self, active: bool) -> Self {
        self.producer_active = active;
        self
    }
}

impl ChainView for StaticChain {
    fn backing_symbol(&self, symbol: &str) -> Option<String> {
        self.backing.get(symbol).cloned()
    }

    fn ticker(&self, base: &str, quote: &str) -> Option<MarketTicker> {
        self.tickers.get(&PairKey::new(base, quote).to_string()).copied()
    }

    fn current_feed(&self, symbol: &str) -> Option<PublishedFeed> {
        self.feeds.get(symbol).cloned()
    }

    fn producer_is_active(&self) -> bool {
        self.producer_active
    }
}
