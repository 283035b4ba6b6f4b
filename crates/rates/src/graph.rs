//! Rate graph for one derivation cycle
//!
//! Observations are kept per (base, quote) pair in discovery order.
//! Duplicates are expected: several sources may quote the same market.

use std::collections::BTreeMap;

use pricefeed_core::{PairKey, RawObservation};

/// Owned multi-source rate graph
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateGraph {
    pairs: BTreeMap<PairKey, Vec<RawObservation>>,
}

impl RateGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph with an empty bucket for every pair of configured symbols
    pub fn seeded<S: AsRef<str>>(symbols: &[S]) -> Self {
        let mut pairs = BTreeMap::new();
        for base in symbols {
            for quote in symbols {
                pairs.insert(PairKey::new(base.as_ref(), quote.as_ref()), Vec::new());
            }
        }
        Self { pairs }
    }

    /// Append an observation to the (base, quote) bucket
    pub fn add_observation(&mut self, base: &str, quote: &str, observation: RawObservation) {
        self.pairs
            .entry(PairKey::new(base, quote))
            .or_default()
            .push(observation);
    }

    pub fn add_price(
        &mut self,
        base: &str,
        quote: &str,
        price: f64,
        volume: f64,
        sources: Vec<String>,
    ) {
        self.add_observation(base, quote, RawObservation::new(price, volume, sources));
    }

    /// Append several observations to one bucket
    pub fn extend(
        &mut self,
        base: &str,
        quote: &str,
        observations: impl IntoIterator<Item = RawObservation>,
    ) {
        self.pairs
            .entry(PairKey::new(base, quote))
            .or_default()
            .extend(observations);
    }

    /// Observations for a pair; empty when the pair is unknown
    pub fn observations(&self, base: &str, quote: &str) -> &[RawObservation] {
        self.pairs
            .get(&PairKey::new(base, quote))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_observations(&self, base: &str, quote: &str) -> bool {
        !self.observations(base, quote).is_empty()
    }

    /// All buckets, including empty seeded ones
    pub fn pairs(&self) -> impl Iterator<Item = (&PairKey, &[RawObservation])> {
        self.pairs.iter().map(|(key, obs)| (key, obs.as_slice()))
    }

    /// Pairs holding a positive observation whose inverse bucket is empty.
    ///
    /// Quotes listed in `exempt` are skipped.
    pub fn missing_inverses(&self, exempt: &[String]) -> Vec<PairKey> {
        self.pairs
            .iter()
            .filter(|(key, obs)| {
                !exempt.contains(&key.quote)
                    && obs.iter().any(|o| o.price > 0.0 && o.volume > 0.0)
                    && !self.has_observations(&key.quote, &key.base)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn stats(&self) -> RateGraphStats {
        RateGraphStats {
            pair_count: self.pairs.len(),
            populated_pairs: self.pairs.values().filter(|o| !o.is_empty()).count(),
            observation_count: self.pairs.values().map(Vec::len).sum(),
        }
    }
}

/// Statistics about a rate graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateGraphStats {
    pub pair_count: usize,
    pub populated_pairs: usize,
    pub observation_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_graph_has_empty_buckets() {
        let graph = RateGraph::seeded(&["USD", "BTS", "CNY"]);

        let stats = graph.stats();
        assert_eq!(stats.pair_count, 9);
        assert_eq!(stats.populated_pairs, 0);
        assert!(graph.observations("USD", "BTS").is_empty());
        assert!(graph.observations("EUR", "BTS").is_empty());
    }

    #[test]
    fn test_insertion_order_and_duplicates_preserved() {
        let mut graph = RateGraph::new();
        graph.add_price("USD", "BTS", 0.02, 10.0, vec!["a".into()]);
        graph.add_price("USD", "BTS", 0.02, 10.0, vec!["a".into()]);
        graph.add_price("USD", "BTS", 0.03, 5.0, vec!["b".into()]);

        let obs = graph.observations("USD", "BTS");
        assert_eq!(obs.len(), 3);
        assert_eq!(obs[2].sources, vec!["b".to_string()]);
        assert_eq!(graph.stats().observation_count, 3);
    }

    #[test]
    fn test_missing_inverses() {
        let mut graph = RateGraph::new();
        graph.add_price("USD", "BTS", 0.02, 10.0, vec!["a".into()]);
        graph.add_price("BTC", "ALTCAP", 0.5, 1.0, vec!["cap".into()]);

        let missing = graph.missing_inverses(&["ALTCAP".to_string()]);
        assert_eq!(missing, vec![PairKey::new("USD", "BTS")]);

        graph.add_price("BTS", "USD", 50.0, 0.2, vec!["a".into()]);
        assert!(graph.missing_inverses(&["ALTCAP".to_string()]).is_empty());
    }
}
