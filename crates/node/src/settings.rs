//! Runtime settings from `.env` and `PRICEFEED_*` variables

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use pricefeed_engine::PublishOptions;
use pricefeed_rates::FetchOptions;

pub const ENV_PREFIX: &str = "PRICEFEED";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeSettings {
    /// Feed configuration YAML
    pub config_path: PathBuf,
    /// Chain snapshot (YAML or JSON) standing in for a node connection
    pub chain_snapshot_path: PathBuf,
    /// Directory of persisted controller state
    pub state_dir: PathBuf,
    /// Source day cache; `{state_dir}/cache` when unset
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    pub max_workers: usize,
    /// Symbols to derive; empty means every configured asset
    pub assets: Vec<String>,
    pub log_json: bool,
    pub confirm_warning: bool,
    pub skip_critical: bool,
}

impl NodeSettings {
    /// Load from the process environment, after reading `.env`
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::load_from(None)
    }

    /// Load from an explicit variable map instead of the process environment
    pub fn load_from(vars: Option<HashMap<String, String>>) -> Result<Self> {
        let settings = Config::builder()
            .set_default("config_path", "config.yaml")?
            .set_default("chain_snapshot_path", "chain.yaml")?
            .set_default("state_dir", "./state")?
            .set_default("max_workers", 8)?
            .set_default("assets", Vec::<String>::new())?
            .set_default("log_json", false)?
            .set_default("confirm_warning", true)?
            .set_default("skip_critical", false)?
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("assets")
                    .source(vars),
            )
            .build()
            .context("Failed to build runtime settings")?;

        settings
            .try_deserialize()
            .context("Failed to deserialize runtime settings")
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            max_workers: self.max_workers,
            cache_dir: Some(self.cache_root()),
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.state_dir.join("cache"))
    }

    pub fn publish_options(&self) -> PublishOptions {
        PublishOptions {
            confirm_warning: self.confirm_warning,
            skip_critical: self.skip_critical,
        }
    }
}
