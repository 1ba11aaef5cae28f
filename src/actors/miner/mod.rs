// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Storage miner differ: info, sectors, pre-commits and sector status.

mod sector_status;
mod state;

use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};

pub use self::sector_status::MinerSectorStatusChange;
use self::state::MinerState;
#[cfg(test)]
pub(crate) use self::state::testing;
use super::{ActorInput, SubChange, checked, sort_changes, uint_key_of};
use crate::adt::{ChangeKind, diff_array_opt, diff_map_opt, uint_key};
use crate::error::Error;
use crate::utils::encoding::{DeferredCbor, load_raw};

/// The miner info changed. Carries the info the miner has after the change,
/// or the last known one when the miner was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerInfoChange {
    pub info: DeferredCbor,
    pub change: ChangeKind,
}

/// A change to an on-chain sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerSectorChange {
    pub change: ChangeKind,
    pub sector: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

/// A change to a pre-committed sector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinerPreCommitChange {
    pub change: ChangeKind,
    pub sector: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

impl SubChange for MinerSectorChange {
    fn key(&self) -> Vec<u8> {
        uint_key(self.sector)
    }
}

impl SubChange for MinerPreCommitChange {
    fn key(&self) -> Vec<u8> {
        uint_key(self.sector)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinerStateDiff {
    pub info: Option<MinerInfoChange>,
    pub sectors: Vec<MinerSectorChange>,
    pub pre_commits: Vec<MinerPreCommitChange>,
    pub sector_status: Option<MinerSectorStatusChange>,
}

impl MinerStateDiff {
    pub fn is_empty(&self) -> bool {
        self.info.is_none()
            && self.sectors.is_empty()
            && self.pre_commits.is_empty()
            && self.sector_status.is_none()
    }
}

fn diff_info<BS: Blockstore + ?Sized>(
    store: &BS,
    executed: Option<&MinerState>,
    current: Option<&MinerState>,
) -> Result<Option<MinerInfoChange>, Error> {
    let (change, cid) = match (executed, current) {
        (Some(e), Some(c)) if e.info() == c.info() => return Ok(None),
        (Some(_), Some(c)) => (ChangeKind::Modified, c.info()),
        (None, Some(c)) => (ChangeKind::Added, c.info()),
        (Some(e), None) => (ChangeKind::Removed, e.info()),
        (None, None) => return Ok(None),
    };
    Ok(Some(MinerInfoChange {
        info: DeferredCbor::new(load_raw(store, cid)?),
        change,
    }))
}

fn diff_sectors<BS: Blockstore + ?Sized>(
    store: &BS,
    executed: Option<&MinerState>,
    current: Option<&MinerState>,
) -> Result<Vec<MinerSectorChange>, Error> {
    let changes = diff_array_opt(
        store,
        executed.map(MinerState::sectors),
        current.map(MinerState::sectors),
    )?;
    let mut sectors = changes
        .into_iter()
        .map(|m| {
            let (change, previous, current) = checked(m.kind, m.previous, m.current)?;
            Ok(MinerSectorChange {
                change,
                sector: m.index,
                current,
                previous,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    sort_changes(&mut sectors);
    Ok(sectors)
}

fn diff_pre_commits<BS: Blockstore + ?Sized>(
    store: &BS,
    executed: Option<&MinerState>,
    current: Option<&MinerState>,
) -> Result<Vec<MinerPreCommitChange>, Error> {
    let changes = diff_map_opt(
        store,
        executed.map(MinerState::pre_commits),
        current.map(MinerState::pre_commits),
    )?;
    let Some(origin) = current.or(executed).map(|s| s.pre_commits().cid) else {
        return Ok(vec![]);
    };
    let mut pre_commits = changes
        .into_iter()
        .map(|m| {
            let sector = uint_key_of(&origin, &m.key)?;
            let (change, previous, current) = checked(m.kind, m.previous, m.current)?;
            Ok(MinerPreCommitChange {
                change,
                sector,
                current,
                previous,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    sort_changes(&mut pre_commits);
    Ok(pre_commits)
}

pub fn diff<BS: Blockstore + Sync + ?Sized>(
    store: &BS,
    input: &ActorInput,
) -> Result<MinerStateDiff, Error> {
    if input.head_unchanged() {
        return Ok(MinerStateDiff::default());
    }
    let (executed, current) = input.load_states(store, MinerState::load)?;
    let (executed, current) = (executed.as_ref(), current.as_ref());

    let ((info, sectors), (pre_commits, sector_status)) = rayon::join(
        || {
            rayon::join(
                || diff_info(store, executed, current),
                || diff_sectors(store, executed, current),
            )
        },
        || {
            rayon::join(
                || diff_pre_commits(store, executed, current),
                || sector_status::diff(store, executed, current),
            )
        },
    );
    Ok(MinerStateDiff {
        info: info?,
        sectors: sectors?,
        pre_commits: pre_commits?,
        sector_status: sector_status?,
    })
}
