// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod cid;
pub mod encoding;
pub mod io;
pub mod multihash;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Error;

/// Keep running `op` until it succeeds, fails with an error that is not
/// retriable, or the retry limit in `args` is reached.
/// Waiting between attempts is interrupted by `cancel`.
#[tracing::instrument(skip_all)]
pub fn retry<T>(
    args: RetryArgs,
    cancel: &CancellationToken,
    mut op: impl FnMut() -> Result<T, Error>,
) -> Result<T, Error> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(ok) => return Ok(ok),
            Err(err) if err.is_retriable() && attempt < args.max_retries => {
                attempt += 1;
                warn!(attempt, "retrying operation after {err}");
            }
            Err(err) => return Err(err),
        }
        if let Some(delay) = args.delay {
            std::thread::sleep(delay);
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
    }
}

#[derive(Debug, Clone, Copy, smart_default::SmartDefault)]
pub struct RetryArgs {
    #[default(5)]
    pub max_retries: usize,
    #[default(Some(Duration::from_millis(200)))]
    pub delay: Option<Duration>,
}
