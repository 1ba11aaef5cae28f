// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Sector status transitions derived from the partitions of both sides.

use cid::Cid;
use fil_actors_shared::fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::state::{MinerState, PartitionStatus};
use crate::adt::for_each_element;
use crate::error::Error;

/// Sectors that changed status between the two sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MinerSectorStatusChange {
    pub faulted: BitField,
    pub removed: BitField,
    pub recovered: BitField,
    pub recovering: BitField,
}

impl MinerSectorStatusChange {
    pub fn is_empty(&self) -> bool {
        self.faulted.is_empty()
            && self.removed.is_empty()
            && self.recovered.is_empty()
            && self.recovering.is_empty()
    }
}

/// Union of the status bitfields of a set of partitions.
#[derive(Debug, Clone, Default)]
struct PartitionSets {
    faults: BitField,
    recoveries: BitField,
    terminated: BitField,
}

impl PartitionSets {
    fn merge(self, other: Self) -> Self {
        Self {
            faults: &self.faults | &other.faults,
            recoveries: &self.recoveries | &other.recoveries,
            terminated: &self.terminated | &other.terminated,
        }
    }

    fn add(&mut self, partition: PartitionStatus) {
        self.faults = &self.faults | &partition.faults;
        self.recoveries = &self.recoveries | &partition.recoveries;
        self.terminated = &self.terminated | &partition.terminated;
    }

    /// Reads every partition of the given deadlines.
    fn collect<BS: Blockstore + Sync + ?Sized>(
        store: &BS,
        state: &MinerState,
        deadlines: &[Cid],
    ) -> Result<Self, Error> {
        deadlines
            .par_iter()
            .map(|deadline| {
                let partitions = state.partitions(store, deadline)?;
                let mut sets = Self::default();
                for_each_element(store, &partitions, |_, partition| {
                    sets.add(state.partition_status(&partitions.cid, partition)?);
                    Ok(())
                })?;
                Ok(sets)
            })
            .try_reduce(Self::default, |a, b| Ok(a.merge(b)))
    }
}

/// Deadlines whose CID differs between the sides, per side. A missing side
/// contributes no deadlines.
fn changed_deadlines<BS: Blockstore + ?Sized>(
    store: &BS,
    executed: Option<&MinerState>,
    current: Option<&MinerState>,
) -> Result<(Vec<Cid>, Vec<Cid>), Error> {
    let executed = executed.map(|s| s.deadline_cids(store)).transpose()?;
    let current = current.map(|s| s.deadline_cids(store)).transpose()?;
    Ok(match (executed, current) {
        (Some(e), Some(c)) => {
            if e.len() != c.len() {
                return Err(Error::InvariantViolated(format!(
                    "miner deadline count changed from {} to {}",
                    e.len(),
                    c.len()
                )));
            }
            e.into_iter().zip(c).filter(|(e, c)| e != c).unzip()
        }
        (e, c) => (e.unwrap_or_default(), c.unwrap_or_default()),
    })
}

pub(super) fn diff<BS: Blockstore + Sync + ?Sized>(
    store: &BS,
    executed: Option<&MinerState>,
    current: Option<&MinerState>,
) -> Result<Option<MinerSectorStatusChange>, Error> {
    let (executed_deadlines, current_deadlines) = changed_deadlines(store, executed, current)?;
    if executed_deadlines.is_empty() && current_deadlines.is_empty() {
        return Ok(None);
    }
    let (prev, curr) = rayon::join(
        || match executed {
            Some(state) => PartitionSets::collect(store, state, &executed_deadlines),
            None => Ok(PartitionSets::default()),
        },
        || match current {
            Some(state) => PartitionSets::collect(store, state, &current_deadlines),
            None => Ok(PartitionSets::default()),
        },
    );
    let (prev, curr) = (prev?, curr?);

    let change = MinerSectorStatusChange {
        faulted: &curr.faults - &prev.faults,
        removed: &curr.terminated - &prev.terminated,
        recovered: &(&prev.faults - &curr.faults) - &curr.terminated,
        recovering: &curr.recoveries - &prev.recoveries,
    };
    Ok((!change.is_empty()).then_some(change))
}
