// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeSet;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use smart_default::SmartDefault;
use strum::IntoEnumIterator as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActorStateChanges, StateDiffResult};
use crate::actors::{
    self, ActorFamily, ActorInput, ActorRegistry, ActorSide, NEWEST_ACTOR_VERSION,
};
use crate::adt::ChangeKind;
use crate::blocks::Tipset;
use crate::db::CancellableStore;
use crate::error::Error;
use crate::shim::address::Address;
use crate::shim::state_tree::ActorState;
use crate::statediff::{ActorChange, diff_state_trees_opt};

#[derive(Debug, Clone, SmartDefault)]
pub struct ExtractOptions {
    /// Size of the worker pool.
    #[default(_code = "num_cpus::get()")]
    pub workers: usize,
    /// Results in flight between the workers and the collator.
    #[default(1024)]
    pub channel_capacity: usize,
    /// Families to run besides the raw differ.
    #[default(_code = "ActorFamily::iter().collect()")]
    pub tasks: BTreeSet<ActorFamily>,
}

/// Results of the differs that ran for one changed actor.
struct ActorDiff {
    address: Address,
    results: Vec<StateDiffResult>,
}

/// Runs the differs over tipset pairs, on a dedicated worker pool.
pub struct Extractor<'a, BS: ?Sized> {
    store: &'a BS,
    registry: &'a ActorRegistry,
    pool: rayon::ThreadPool,
    options: ExtractOptions,
}

impl<'a, BS: Blockstore + Sync + ?Sized> Extractor<'a, BS> {
    pub fn new(
        store: &'a BS,
        registry: &'a ActorRegistry,
        options: ExtractOptions,
    ) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.workers.max(1))
            .thread_name(|i| format!("extract-{i}"))
            .build()?;
        Ok(Self {
            store,
            registry,
            pool,
            options,
        })
    }

    /// Diffs the state `executed` ran on against the state `current` reports
    /// as its parent state.
    pub fn extract(
        &self,
        current: &Tipset,
        executed: &Tipset,
        token: &CancellationToken,
    ) -> Result<ActorStateChanges, Error> {
        info!(
            current = current.epoch(),
            executed = executed.epoch(),
            "extracting actor state changes"
        );
        let mut changes = ActorStateChanges::new(current.clone(), executed.clone());
        self.run(
            Some(executed.parent_state()),
            current.parent_state(),
            token,
            &mut changes,
        )?;
        Ok(changes)
    }

    /// Reports every actor of the genesis state as added.
    pub fn extract_genesis(
        &self,
        genesis: &Tipset,
        token: &CancellationToken,
    ) -> Result<ActorStateChanges, Error> {
        info!(epoch = genesis.epoch(), "extracting genesis state");
        let mut changes = ActorStateChanges::new(genesis.clone(), genesis.clone());
        self.run(None, genesis.parent_state(), token, &mut changes)?;
        Ok(changes)
    }

    fn run(
        &self,
        executed: Option<&Cid>,
        current: &Cid,
        token: &CancellationToken,
        out: &mut ActorStateChanges,
    ) -> Result<(), Error> {
        // cancelled on the first failing task, or when the caller cancels
        let token = token.child_token();
        let store = CancellableStore::new(self.store, token.clone());
        let changed = diff_state_trees_opt(&store, executed, current)?;
        if changed.is_empty() {
            return Ok(());
        }

        let (tx, rx) = flume::bounded::<Result<ActorDiff, Error>>(self.options.channel_capacity.max(1));
        let mut first_error: Option<Error> = None;
        let mut collate = |result: Result<ActorDiff, Error>| match result {
            Ok(diff) => {
                for result in diff.results {
                    if let Err(e) = out.insert(diff.address, result) {
                        token.cancel();
                        first_error.get_or_insert(e);
                    }
                }
            }
            // tasks that observed the cancellation only echo it
            Err(e) if e.is_cancelled() => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                token.cancel();
                if first_error.as_ref().is_none_or(Error::is_cancelled) {
                    first_error = Some(e);
                }
            }
        };

        self.pool.in_place_scope(|scope| {
            for change in changed.values() {
                let tx = tx.clone();
                let store = &store;
                let token = &token;
                scope.spawn(move |_| {
                    let result = if token.is_cancelled() {
                        Err(Error::Cancelled)
                    } else {
                        self.diff_actor(store, change)
                    };
                    if result.as_ref().is_err_and(|e| !e.is_cancelled()) {
                        token.cancel();
                    }
                    // the collator outlives every task
                    let _ = tx.send(result);
                });
            }
            drop(tx);
            for result in rx.iter() {
                collate(result);
            }
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The side of an actor handed to a family differ, or `None` when the
    /// actor is absent there or has a code of another family.
    fn side(&self, family: ActorFamily, state: Option<&ActorState>) -> Option<ActorSide> {
        let state = state?;
        let (builtin, version) = self.registry.lookup(&state.code)?;
        (ActorFamily::of(builtin) == Some(family)).then(|| ActorSide {
            version,
            state: state.clone(),
        })
    }

    fn diff_actor<S: Blockstore + Sync>(
        &self,
        store: &S,
        change: &ActorChange,
    ) -> Result<ActorDiff, Error> {
        let address = change.address;
        debug!(%address, kind = %change.kind, "diffing actor");
        let mut results = vec![StateDiffResult::Raw(
            actors::raw::diff(store, change).map_err(|e| e.for_actor(address))?,
        )];

        let Some(code) = change.code() else {
            return Err(Error::Unreachable(format!("actor {address} has no side")));
        };
        let Some((builtin, version)) = self.registry.lookup(&code) else {
            debug!(%address, %code, "no differ for actor code");
            return Ok(ActorDiff { address, results });
        };
        let Some(family) = ActorFamily::of(builtin) else {
            return Ok(ActorDiff { address, results });
        };
        if !self.options.tasks.contains(&family) {
            return Ok(ActorDiff { address, results });
        }
        if version > NEWEST_ACTOR_VERSION {
            let err = Error::UnsupportedActorVersion {
                code,
                op: "actor diff",
            };
            warn!(%address, %family, version, "skipping actor: {err}");
            return Ok(ActorDiff { address, results });
        }

        let executed = self.side(family, change.executed.as_ref());
        let current = self.side(family, change.current.as_ref());
        let kind = match (&executed, &current) {
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Removed,
            (Some(_), Some(_)) => change.kind,
            (None, None) => return Ok(ActorDiff { address, results }),
        };
        let input = ActorInput {
            address,
            kind,
            executed,
            current,
        };
        let result = match family {
            ActorFamily::Init => actors::init::diff(store, &input).map(StateDiffResult::Init),
            ActorFamily::Market => actors::market::diff(store, &input).map(StateDiffResult::Market),
            ActorFamily::Miner => actors::miner::diff(store, &input).map(StateDiffResult::Miner),
            ActorFamily::Power => actors::power::diff(store, &input).map(StateDiffResult::Power),
            ActorFamily::Verifreg => {
                actors::verifreg::diff(store, &input).map(StateDiffResult::Verifreg)
            }
            ActorFamily::Datacap => {
                actors::datacap::diff(store, &input).map(StateDiffResult::Datacap)
            }
        }
        .map_err(|e| e.for_actor(address))?;
        results.push(result);
        Ok(ActorDiff { address, results })
    }
}
