//! Rate source implementations and the concurrent fetcher
//!
//! Sources are isolated from each other: a failing source yields an empty
//! feed (or its cached feed of the day) and never aborts the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use pricefeed_core::{CompositeStrategy, ExchangeConfig, Rate, SourceError, SourceFeed, SourceKind};

use crate::aggregator::reduce_composite;

/// Base trait for rate sources
#[async_trait]
pub trait RateSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_rates(&self) -> anyhow::Result<SourceFeed>;
}

/// Rates written directly in the configuration
pub struct ManualSource {
    name: String,
    feed: SourceFeed,
}

impl ManualSource {
    pub fn new(name: impl Into<String>, rates: BTreeMap<String, BTreeMap<String, Rate>>) -> Self {
        Self {
            name: name.into(),
            feed: SourceFeed { rates, response: None },
        }
    }
}

#[async_trait]
impl RateSource for ManualSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self) -> anyhow::Result<SourceFeed> {
        Ok(self.feed.clone())
    }
}

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Genesis block timestamp, 2015-10-13T14:12:24Z
const HERTZ_REFERENCE_TIMESTAMP: i64 = 1_444_745_544;
const HERTZ_PERIOD_DAYS: f64 = 28.0;
/// Offset to the first Wednesday after genesis
const HERTZ_PHASE_DAYS: f64 = 0.908056;
const HERTZ_AMPLITUDE: f64 = 0.14;
const HERTZ_REFERENCE_VALUE: f64 = 1.0;

/// Algorithmic reference asset: USD value on a 28-day sine wave
pub struct HertzSource {
    name: String,
    clock: fn() -> DateTime<Utc>,
}

impl HertzSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// HERTZ value in USD at `at`
    pub fn value_at(at: DateTime<Utc>) -> f64 {
        let period = SECONDS_PER_DAY * HERTZ_PERIOD_DAYS;
        let phase = SECONDS_PER_DAY * HERTZ_PHASE_DAYS;
        let elapsed = at.timestamp() as f64 - (HERTZ_REFERENCE_TIMESTAMP as f64 + phase);
        let cycle = (elapsed / period).rem_euclid(1.0);
        let waveform = (cycle * std::f64::consts::TAU).sin();
        HERTZ_REFERENCE_VALUE + HERTZ_AMPLITUDE * HERTZ_REFERENCE_VALUE * waveform
    }
}

#[async_trait]
impl RateSource for HertzSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self) -> anyhow::Result<SourceFeed> {
        let value = Self::value_at((self.clock)());
        Ok(SourceFeed::new().with_rate("USD", "HERTZ", value, 1.0))
    }
}

/// Virtual source reducing several nested exchanges into one feed
pub struct CompositeSource {
    name: String,
    strategy: CompositeStrategy,
    order: Vec<String>,
    exchanges: BTreeMap<String, ExchangeConfig>,
    options: FetchOptions,
}

impl CompositeSource {
    pub fn new(
        name: impl Into<String>,
        strategy: CompositeStrategy,
        order: Vec<String>,
        exchanges: BTreeMap<String, ExchangeConfig>,
        options: FetchOptions,
    ) -> Self {
        Self {
            name: name.into(),
            strategy,
            order,
            exchanges,
            options,
        }
    }
}

#[async_trait]
impl RateSource for CompositeSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self) -> anyhow::Result<SourceFeed> {
        let feeds = fetch_all(&self.exchanges, &self.options).await;
        Ok(reduce_composite(self.strategy, &self.order, &feeds))
    }
}

/// Fetcher settings
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_workers: usize,
    /// Root of the per-source day cache; caching is off without it
    pub cache_dir: Option<PathBuf>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_workers: 8,
            cache_dir: None,
        }
    }
}

/// Instantiate the source described by an exchange entry
pub fn build_source(
    name: &str,
    config: &ExchangeConfig,
    options: &FetchOptions,
) -> Arc<dyn RateSource> {
    match &config.kind {
        SourceKind::Manual { feed } => Arc::new(ManualSource::new(name, feed.clone())),
        SourceKind::Hertz => Arc::new(HertzSource::new(name)),
        SourceKind::Composite {
            aggregation_type,
            order,
            exchanges,
        } => Arc::new(CompositeSource::new(
            name,
            *aggregation_type,
            order.clone(),
            exchanges.clone(),
            options.clone(),
        )),
    }
}

/// Fetch every enabled exchange on a bounded worker pool.
///
/// Failed sources fall back to their cache when allowed, otherwise to an
/// empty feed.
pub async fn fetch_all(
    exchanges: &BTreeMap<String, ExchangeConfig>,
    options: &FetchOptions,
) -> BTreeMap<String, SourceFeed> {
    let permits = Arc::new(Semaphore::new(options.max_workers.max(1)));
    let mut tasks = JoinSet::new();

    for (name, config) in exchanges {
        if !config.enable {
            debug!("Skipping disabled exchange {}", name);
            continue;
        }
        let source = build_source(name, config, options);
        let cache = match (&options.cache_dir, config.allow_cache) {
            (Some(dir), true) => Some(DayCache::new(dir, name)),
            (None, true) => {
                warn!("{} allows caching but no cache directory is set", name);
                None
            }
            (_, false) => None,
        };
        let fetcher = SourceFetcher {
            name: name.clone(),
            aliases: config.aliases.clone(),
            scale_volume_by: config.scale_volume_by,
            cache,
        };
        let permits = Arc::clone(&permits);

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let feed = fetcher.fetch(source.as_ref()).await;
            (fetcher.name, feed)
        });
    }

    let mut feeds = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, feed)) => {
                info!("Fetched {} rates from {}", feed.rate_count(), name);
                feeds.insert(name, feed);
            }
            Err(e) => error!("Source task failed: {}", e),
        }
    }
    feeds
}

struct SourceFetcher {
    name: String,
    aliases: BTreeMap<String, String>,
    scale_volume_by: f64,
    cache: Option<DayCache>,
}

impl SourceFetcher {
    async fn fetch(&self, source: &dyn RateSource) -> SourceFeed {
        match source.fetch_rates().await {
            Ok(feed) => {
                // aliased here so composites pair up their children's renamed symbols
                let mut feed = feed.with_aliases(&self.aliases);
                feed.scale_volumes(self.scale_volume_by);
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.store(&feed, Utc::now()).await {
                        warn!("{}", e);
                    }
                }
                feed
            }
            Err(e) => {
                let failure = SourceError::Fetch {
                    source_name: self.name.clone(),
                    reason: e.to_string(),
                };
                warn!("{}", failure);
                self.recover().await
            }
        }
    }

    async fn recover(&self) -> SourceFeed {
        let Some(cache) = &self.cache else {
            return SourceFeed::new();
        };
        info!("Trying to recover {} from cache", self.name);
        match cache.load(Utc::now()).await {
            Ok(Some(feed)) => feed,
            Ok(None) => SourceFeed::new(),
            Err(e) => {
                warn!("Unable to fetch live or cached data from {}: {}", self.name, e);
                SourceFeed::new()
            }
        }
    }
}

/// One JSON file per source and calendar day
#[derive(Debug, Clone)]
pub struct DayCache {
    dir: PathBuf,
    source: String,
}

impl DayCache {
    pub fn new(root: impl AsRef<Path>, source: &str) -> Self {
        Self {
            dir: root.as_ref().join(source),
            source: source.to_string(),
        }
    }

    pub fn path_for(&self, day: DateTime<Utc>) -> PathBuf {
        self.dir.join(format!("{}.json", day.format("%Y-%m-%d")))
    }

    fn error(&self, reason: impl ToString) -> SourceError {
        SourceError::Cache {
            source_name: self.source.clone(),
            reason: reason.to_string(),
        }
    }

    pub async fn store(&self, feed: &SourceFeed, day: DateTime<Utc>) -> Result<(), SourceError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.error(e))?;
        let json = serde_json::to_vec(feed).map_err(|e| self.error(e))?;
        tokio::fs::write(self.path_for(day), json)
            .await
            .map_err(|e| self.error(e))
    }

    pub async fn load(&self, day: DateTime<Utc>) -> Result<Option<SourceFeed>, SourceError> {
        let path = self.path_for(day);
        if !tokio::fs::try_exists(&path).await.map_err(|e| self.error(e))? {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path).await.map_err(|e| self.error(e))?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| self.error(e))
    }
}
