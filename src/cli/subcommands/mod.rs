// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod replay_cmd;
mod walk_cmd;

use std::path::PathBuf;

use clap::Parser;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

pub use self::replay_cmd::ReplayCommand;
pub use self::walk_cmd::WalkCommand;
use crate::cli_shared::cli::Config;

/// Extracts actor state changes from a Filecoin chain.
#[derive(Debug, Parser)]
#[command(name = "forest-indexer", version, about)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Subcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Diff every tipset pair between two heights and write a container per pair
    Walk(WalkCommand),
    /// Turn a container into relational rows
    Replay(ReplayCommand),
}

impl Subcommand {
    /// Checks the arguments clap cannot check on its own.
    pub fn validate(&self) -> Result<(), clap::Error> {
        match self {
            Self::Walk(cmd) => cmd.validate(),
            Self::Replay(_) => Ok(()),
        }
    }

    pub fn run(self, config: &Config, handle: &Handle, token: &CancellationToken) -> anyhow::Result<()> {
        match self {
            Self::Walk(cmd) => cmd.run(config, handle, token),
            Self::Replay(cmd) => cmd.run(),
        }
    }
}
