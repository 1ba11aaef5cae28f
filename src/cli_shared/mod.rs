// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod cli;
pub mod logger;

use std::path::Path;

use anyhow::Context as _;

use crate::cli_shared::cli::Config;
use crate::utils::io::{read_file_to_string, read_toml};

/// Reads the configuration file, if any, and applies the environment on top.
pub fn read_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => read_toml(&read_file_to_string(path)?)
            .with_context(|| format!("invalid configuration in {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env(|name| std::env::var(name).ok())?;
    Ok(config)
}
