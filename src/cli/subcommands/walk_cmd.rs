// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write as _};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::error::ErrorKind;
use fvm_ipld_blockstore::Blockstore;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actors::{ActorFamily, ActorRegistry};
use crate::blocks::Tipset;
use crate::cli_shared::cli::{BundleConfig, Config, NODE_API_ENV, STORE_PATH_ENV};
use crate::container::Extraction;
use crate::data_source::{CarDataSource, DataSource, RpcDataSource};
use crate::error::Error;
use crate::extract::{ExtractOptions, Extractor};
use crate::networks::actor_version;
use crate::shim::clock::ChainEpoch;
use crate::utils::{RetryArgs, retry};

pub const ERRORS_FILE_NAME: &str = "errors.ndjson";

#[derive(Debug, clap::Args)]
pub struct WalkCommand {
    /// Height of the first executed tipset
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    pub from: ChainEpoch,
    /// Height of the last current tipset
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..))]
    pub to: ChainEpoch,
    /// Actor families to extract besides raw actor changes, e.g. `miner,power`.
    /// All of them when omitted
    #[arg(long, value_delimiter = ',')]
    pub tasks: Vec<ActorFamily>,
    /// Directory receiving one container CAR per tipset pair
    #[arg(long)]
    pub out: PathBuf,
}

impl WalkCommand {
    pub fn validate(&self) -> Result<(), clap::Error> {
        if self.from > self.to {
            return Err(clap::Error::raw(
                ErrorKind::ValueValidation,
                format!(
                    "--from ({}) must not be above --to ({})\n",
                    self.from, self.to
                ),
            ));
        }
        Ok(())
    }

    fn options(&self, config: &Config) -> ExtractOptions {
        let mut options = config.extract_options();
        if !self.tasks.is_empty() {
            options.tasks = self.tasks.iter().copied().collect();
        }
        options
    }

    pub fn run(self, config: &Config, handle: &Handle, token: &CancellationToken) -> anyhow::Result<()> {
        let upgrades = config.network.schedule();
        let cache_size = config.extract.cache_size;
        let summary = if let Some(url) = &config.client.node_api {
            info!(%url, "walking a node");
            let source = RpcDataSource::new(
                url,
                config.client.node_token.as_deref(),
                handle.clone(),
                cache_size,
                upgrades,
            )?;
            self.walk_source(&source, config, token)?
        } else if let Some(path) = &config.client.store_path {
            info!(path = %path.display(), "walking a snapshot");
            let source = CarDataSource::open(path, cache_size, upgrades)?;
            self.walk_source(&source, config, token)?
        } else {
            anyhow::bail!("no chain data: set {NODE_API_ENV} or {STORE_PATH_ENV}");
        };
        info!(
            written = summary.written.len(),
            failed = summary.failed,
            "walk finished"
        );
        Ok(())
    }

    fn walk_source<DS: DataSource>(
        &self,
        source: &DS,
        config: &Config,
        token: &CancellationToken,
    ) -> anyhow::Result<WalkSummary> {
        let registry = registry(source.store(), &config.bundles);
        walk(
            source,
            &registry,
            self.options(config),
            RetryArgs::from(&config.retry),
            self.from..=self.to,
            &self.out,
            token,
        )
    }
}

/// Legacy actor codes plus the code CIDs of every configured bundle whose
/// manifest the store holds.
pub fn registry<BS: Blockstore>(store: &BS, bundles: &[BundleConfig]) -> ActorRegistry {
    let mut registry = ActorRegistry::legacy();
    for bundle in bundles {
        match store.has(&bundle.manifest) {
            Ok(true) => {
                if let Err(e) = registry.register_manifest(store, bundle.version, &bundle.manifest) {
                    warn!(version = bundle.version, "skipping actor bundle: {e:#}");
                }
            }
            Ok(false) => warn!(
                version = bundle.version,
                manifest = %bundle.manifest,
                "configured actor bundle not in store, its actors will be diffed as raw"
            ),
            Err(e) => warn!(version = bundle.version, "cannot read actor bundle: {e:#}"),
        }
    }
    registry
}

/// One line of `errors.ndjson`.
#[derive(Debug, Serialize)]
struct ErrorRecord {
    tipset: String,
    height: ChainEpoch,
    executed_height: ChainEpoch,
    actor: Option<String>,
    kind: &'static str,
    message: String,
}

#[derive(Debug, Default)]
pub struct WalkSummary {
    pub written: Vec<PathBuf>,
    pub failed: usize,
}

/// Appends error records, creating the file on the first one.
struct ErrorLog {
    path: PathBuf,
    file: Option<BufWriter<File>>,
}

impl ErrorLog {
    fn record(&mut self, current: &Tipset, executed: &Tipset, err: &Error) -> anyhow::Result<()> {
        let file = match &mut self.file {
            Some(file) => file,
            None => self.file.insert(BufWriter::new(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .with_context(|| format!("cannot open {}", self.path.display()))?,
            )),
        };
        let record = ErrorRecord {
            tipset: current.key().to_string(),
            height: current.epoch(),
            executed_height: executed.epoch(),
            actor: err.actor().map(|a| a.to_string()),
            kind: err.kind(),
            message: err.to_string(),
        };
        serde_json::to_writer(&mut *file, &record)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

/// Tipsets from the one at or before `range.start()` to the one at or before
/// `range.end()`, oldest first.
fn load_tipsets<DS: DataSource>(
    source: &DS,
    range: &RangeInclusive<ChainEpoch>,
    retry_args: RetryArgs,
    token: &CancellationToken,
) -> Result<Vec<Tipset>, Error> {
    let mut tipsets = vec![retry(retry_args, token, || {
        source.tipset_by_height(*range.end())
    })?];
    while let Some(last) = tipsets.last().filter(|t| t.epoch() > *range.start()) {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let parents = last.parents();
        if parents.cids().is_empty() {
            break;
        }
        tipsets.push(retry(retry_args, token, || source.tipset(&parents))?);
    }
    tipsets.reverse();
    Ok(tipsets)
}

/// Diffs every adjacent tipset pair in `range`. Each pair produces a
/// container CAR in `out`, or an error record when its extraction fails.
/// A walk starting at genesis also extracts the genesis state.
pub fn walk<DS: DataSource>(
    source: &DS,
    registry: &ActorRegistry,
    options: ExtractOptions,
    retry_args: RetryArgs,
    range: RangeInclusive<ChainEpoch>,
    out: &Path,
    token: &CancellationToken,
) -> anyhow::Result<WalkSummary> {
    fs::create_dir_all(out).with_context(|| format!("cannot create {}", out.display()))?;
    let extractor = Extractor::new(source.store(), registry, options)?;
    let network = retry(retry_args, token, || source.network_name())?;
    let tipsets = load_tipsets(source, &range, retry_args, token)?;
    info!(%network, from = range.start(), to = range.end(), pairs = tipsets.len().saturating_sub(1), "walking");

    let mut summary = WalkSummary::default();
    let mut errors = ErrorLog {
        path: out.join(ERRORS_FILE_NAME),
        file: None,
    };
    let genesis = tipsets.first().filter(|t| t.epoch() == 0);
    let pairs = genesis
        .map(|genesis| (genesis, genesis))
        .into_iter()
        .chain(tipsets.windows(2).map(|pair| (&pair[1], &pair[0])));

    for (current, executed) in pairs {
        let result = retry(retry_args, token, || {
            if current == executed {
                extractor.extract_genesis(current, token)
            } else {
                extractor.extract(current, executed, token)
            }
        })
        .and_then(|changes| {
            let network_version = retry(retry_args, token, || source.network_version(executed.key()))?;
            let actor_version = actor_version(network_version).ok_or_else(|| {
                Error::InvariantViolated(format!(
                    "no actor version for network version {network_version}"
                ))
            })?;
            Ok(Extraction {
                network: network.clone(),
                network_version,
                actor_version,
                changes: vec![changes],
            })
        });
        match result {
            Ok(extraction) => {
                let path = out.join(format!("{}_{}.car", current.epoch(), executed.epoch()));
                let file = File::create(&path)
                    .with_context(|| format!("cannot create {}", path.display()))?;
                let mut writer = BufWriter::new(file);
                let root = extraction.write_car(&mut writer)?;
                writer.flush()?;
                debug!(%root, path = %path.display(), "wrote extraction");
                summary.written.push(path);
            }
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => {
                warn!(
                    current = current.epoch(),
                    executed = executed.epoch(),
                    kind = e.kind(),
                    "skipping tipset pair: {e}"
                );
                errors.record(current, executed, &e)?;
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}
