//! Multi-hop path derivation
//!
//! Fills in the (target, backing) market by composing observations through
//! configured intermediate assets:
//! - 2 markets: target -> I -> backing
//! - 3 markets: target -> B -> A -> backing

use tracing::{debug, info};

use pricefeed_core::RawObservation;

use crate::graph::RateGraph;

/// Composes indirect rates through intermediate assets
#[derive(Debug, Clone, Default)]
pub struct PathDeriver {
    intermediates: Vec<String>,
}

impl PathDeriver {
    pub fn new(intermediates: Vec<String>) -> Self {
        Self { intermediates }
    }

    pub fn intermediates(&self) -> &[String] {
        &self.intermediates
    }

    /// Every 2-market composition for (target, backing), without touching the graph.
    ///
    /// One candidate per (target->I, I->backing) observation pair.
    pub fn two_hop_candidates(
        &self,
        graph: &RateGraph,
        target: &str,
        backing: &str,
    ) -> Vec<RawObservation> {
        let mut candidates = Vec::new();

        for inter in &self.intermediates {
            if inter == target {
                continue;
            }
            let first_legs = graph.observations(target, inter);
            let second_legs = graph.observations(inter, backing);
            if first_legs.is_empty() || second_legs.is_empty() {
                continue;
            }

            for first in first_legs {
                for second in second_legs.iter().filter(|o| o.volume > 0.0) {
                    candidates.push(RawObservation::chain(
                        &[first, second],
                        second.volume,
                        &[first, second],
                    ));
                }
            }
        }

        candidates
    }

    /// Every 3-market composition for (target, backing), without touching the graph.
    ///
    /// Tags are ordered backing leg, A leg, B leg.
    pub fn three_hop_candidates(
        &self,
        graph: &RateGraph,
        target: &str,
        backing: &str,
    ) -> Vec<RawObservation> {
        let mut candidates = Vec::new();

        for inter_a in &self.intermediates {
            for inter_b in &self.intermediates {
                if inter_a == target || inter_b == target || inter_a == inter_b {
                    continue;
                }
                let b_legs = graph.observations(target, inter_b);
                let a_legs = graph.observations(inter_b, inter_a);
                let backing_legs = graph.observations(inter_a, backing);
                if b_legs.is_empty() || a_legs.is_empty() || backing_legs.is_empty() {
                    continue;
                }

                debug!(
                    "derive_across_3markets - found {} -> {} -> {} -> {}",
                    target, inter_b, inter_a, backing
                );
                for a_leg in a_legs {
                    for b_leg in b_legs {
                        for backing_leg in backing_legs.iter().filter(|o| o.volume > 0.0) {
                            candidates.push(RawObservation::chain(
                                &[b_leg, a_leg, backing_leg],
                                backing_leg.volume,
                                &[backing_leg, a_leg, b_leg],
                            ));
                        }
                    }
                }
            }
        }

        candidates
    }

    /// Append 2-market compositions to the (target, backing) bucket
    pub fn derive_two_hop(&self, graph: &mut RateGraph, target: &str, backing: &str) -> usize {
        let candidates = self.two_hop_candidates(graph, target, backing);
        let count = candidates.len();
        graph.extend(target, backing, candidates);
        count
    }

    /// Append 3-market compositions to the (target, backing) bucket
    pub fn derive_three_hop(&self, graph: &mut RateGraph, target: &str, backing: &str) -> usize {
        let candidates = self.three_hop_candidates(graph, target, backing);
        let count = candidates.len();
        graph.extend(target, backing, candidates);
        count
    }

    /// Run the 2-market pass and, if enabled, the 3-market pass
    pub fn derive_paths(
        &self,
        graph: &mut RateGraph,
        target: &str,
        backing: &str,
        across_three_markets: bool,
    ) -> usize {
        let mut added = self.derive_two_hop(graph, target, backing);
        if across_three_markets {
            added += self.derive_three_hop(graph, target, backing);
        }
        info!(
            "Derived {} indirect rates for {}:{} ({} direct)",
            added,
            target,
            backing,
            graph.observations(target, backing).len() - added
        );
        added
    }
}
