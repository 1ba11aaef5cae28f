// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::ffi::OsString;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use super::subcommands::Cli;
use crate::cli_shared::{logger, read_config};
use crate::error::Error;

pub const EXIT_RUNTIME_ERROR: u8 = 1;
pub const EXIT_USAGE_ERROR: u8 = 2;
pub const EXIT_CANCELLED: u8 = 130;

fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|e| e.downcast_ref::<Error>())
        .any(Error::is_cancelled)
}

/// Runs the indexer. The commands block on chain reads, so they run on the
/// calling thread while a tokio runtime serves the node client and Ctrl-C.
pub fn main<ArgT>(args: impl IntoIterator<Item = ArgT>) -> ExitCode
where
    ArgT: Into<OsString> + Clone,
{
    let Cli { config, cmd } = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(EXIT_USAGE_ERROR));
        }
    };
    if let Err(e) = cmd.validate() {
        let _ = e.print();
        return ExitCode::from(EXIT_USAGE_ERROR);
    }
    let config = match read_config(config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_USAGE_ERROR);
        }
    };
    logger::setup_logger(config.log.filter.as_deref());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("cannot start the runtime: {e}");
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };
    let token = CancellationToken::new();
    runtime.spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                token.cancel();
            }
        }
    });

    let result = cmd.run(&config, runtime.handle(), &token);
    runtime.shutdown_background();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if token.is_cancelled() || is_cancelled(&e) => {
            error!("cancelled: {e:#}");
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}
