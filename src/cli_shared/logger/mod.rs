// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::io::IsTerminal as _;

use tracing_subscriber::{EnvFilter, prelude::*};

/// Logs to stderr, so `replay` can write rows to stdout.
///
/// `filter` holds `EnvFilter` directives; without them the defaults of
/// [`default_env_filter`] apply.
pub fn setup_logger(filter: Option<&str>) {
    let layer = tracing_subscriber::fmt::Layer::new()
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .with_filter(get_env_filter(filter));
    // a subscriber may already be installed, e.g. by a test harness
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

fn get_env_filter(directives: Option<&str>) -> EnvFilter {
    match directives {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            eprintln!("ignoring invalid log filter {directives:?}: {e}");
            default_env_filter()
        }),
        None => default_env_filter(),
    }
}

/// Note that [`tracing_subscriber::filter::Builder`] only allows a single default directive,
/// whereas we want to provide multiple.
fn default_env_filter() -> EnvFilter {
    let default_directives = [
        "info",
        "hyper=warn",
        "hyper_util=warn",
        "jsonrpsee=warn",
        "jsonrpsee_http_client=warn",
        "tower=warn",
    ];
    EnvFilter::new(default_directives.join(","))
}
