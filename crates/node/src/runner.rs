//! One dry-run cycle: fetch, derive, plan

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::info;

use pricefeed_core::{FeedConfig, SourceFeed};
use pricefeed_engine::{
    plan, ChainView, ControllerStore, DerivationReport, FeedDeriver, JsonControllerStore,
    PublishOptions, PublishVerdict, StaticChain,
};
use pricefeed_rates::fetch_all;

use crate::settings::NodeSettings;

/// Everything a cycle produced, printed as JSON by the binary
#[derive(Debug, Clone, Serialize)]
pub struct CycleOutput {
    pub producer: String,
    pub generated_at: DateTime<Utc>,
    pub report: DerivationReport,
    pub plans: BTreeMap<String, PublishVerdict>,
}

/// Derive and plan from an already fetched snapshot
pub fn derive_cycle(
    config: &FeedConfig,
    feeds: &BTreeMap<String, SourceFeed>,
    chain: &dyn ChainView,
    store: &dyn ControllerStore,
    assets: &[String],
    options: &PublishOptions,
    now: DateTime<Utc>,
) -> CycleOutput {
    let report = FeedDeriver::new(config, chain, store).derive(feeds, assets, now);
    let plans = report
        .decisions
        .iter()
        .map(|(symbol, decision)| (symbol.clone(), plan(decision, options)))
        .collect();

    CycleOutput {
        producer: config.producer.clone(),
        generated_at: now,
        report,
        plans,
    }
}

pub async fn run_cycle(settings: &NodeSettings) -> Result<CycleOutput> {
    let config = FeedConfig::load(&settings.config_path).with_context(|| {
        format!("Failed to load feed config {}", settings.config_path.display())
    })?;
    let chain = StaticChain::load(&settings.chain_snapshot_path).with_context(|| {
        format!(
            "Failed to load chain snapshot {}",
            settings.chain_snapshot_path.display()
        )
    })?;
    let store = JsonControllerStore::new(&settings.state_dir)?;

    let start = Instant::now();
    let feeds = fetch_all(&config.exchanges, &settings.fetch_options()).await;
    info!("Fetched {} sources in {:?}", feeds.len(), start.elapsed());

    Ok(derive_cycle(
        &config,
        &feeds,
        &chain,
        &store,
        &settings.assets,
        &settings.publish_options(),
        Utc::now(),
    ))
}
