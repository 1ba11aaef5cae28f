// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::time::Duration;

use cid::Cid;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, DurationSeconds, serde_as};
use smart_default::SmartDefault;
use url::Url;

use super::client::Client;
use crate::extract::ExtractOptions;
use crate::networks::{ACTOR_BUNDLES, Upgrade, UpgradeSchedule};
use crate::utils::RetryArgs;

pub const NODE_API_ENV: &str = "NODE_API";
pub const NODE_TOKEN_ENV: &str = "NODE_TOKEN";
pub const STORE_PATH_ENV: &str = "STORE_PATH";
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault)]
#[serde(default)]
pub struct ExtractConfig {
    #[default(_code = "num_cpus::get()")]
    pub workers: usize,
    #[default(1024)]
    pub channel_capacity: usize,
    /// Blocks kept in the read cache in front of the data source.
    #[default(65_536)]
    pub cache_size: usize,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault)]
#[serde(default)]
pub struct RetryConfig {
    #[default(5)]
    pub max_retries: usize,
    /// Seconds between attempts.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[default(Duration::from_secs(1))]
    pub delay: Duration,
}

impl From<&RetryConfig> for RetryArgs {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delay: Some(config.delay),
        }
    }
}

/// A builtin actor bundle whose manifest is read from the data source.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleConfig {
    pub version: u64,
    #[serde_as(as = "DisplayFromStr")]
    pub manifest: Cid,
}

fn default_bundles() -> Vec<BundleConfig> {
    ACTOR_BUNDLES
        .iter()
        .map(|bundle| BundleConfig {
            version: bundle.version,
            manifest: bundle.manifest,
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub upgrades: Vec<Upgrade>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            upgrades: UpgradeSchedule::mainnet().upgrades().to_vec(),
        }
    }
}

impl NetworkConfig {
    pub fn schedule(&self) -> UpgradeSchedule {
        UpgradeSchedule::new(self.upgrades.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directives, e.g. `info,forest_indexer::extract=debug`
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, SmartDefault)]
#[serde(default)]
pub struct Config {
    pub client: Client,
    pub extract: ExtractConfig,
    pub retry: RetryConfig,
    #[default(_code = "default_bundles()")]
    pub bundles: Vec<BundleConfig>,
    pub network: NetworkConfig,
    pub log: LogConfig,
}

impl Config {
    /// Applies the environment on top of the file. `var` looks a variable up.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(api) = var(NODE_API_ENV) {
            self.client.node_api = Some(
                Url::parse(&api).map_err(|e| anyhow::anyhow!("invalid {NODE_API_ENV}: {e}"))?,
            );
        }
        if let Some(token) = var(NODE_TOKEN_ENV) {
            self.client.node_token = Some(token);
        }
        if let Some(path) = var(STORE_PATH_ENV) {
            self.client.store_path = Some(path.into());
        }
        if let Some(filter) = var(LOG_LEVEL_ENV) {
            self.log.filter = Some(filter);
        }
        Ok(())
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            workers: self.extract.workers,
            channel_capacity: self.extract.channel_capacity,
            ..Default::default()
        }
    }
}
