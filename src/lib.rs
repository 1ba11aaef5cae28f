// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod actors;
mod adt;
mod blocks;
mod chain;
mod cli;
mod cli_shared;
mod container;
mod data_source;
mod db;
mod error;
mod extract;
mod networks;
mod shim;
mod statediff;
#[cfg(test)]
mod test_utils;
mod transform;
mod utils;

pub use cli::main::main as indexer_main;
pub use error::Error;
