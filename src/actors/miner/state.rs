// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fil_actors_shared::fvm_ipld_bitfield::BitField;
use fvm_ipld_blockstore::Blockstore;
use ipld_core::ipld::Ipld;
use spire_enum::prelude::delegated_enum;

use crate::actors::{ActorSide, StateFields};
use crate::adt::{AmtRoot, HamtOptions, HamtRoot};
use crate::error::Error;
use crate::utils::encoding::{from_ipld, ipld_kind, load_block};

const PRECOMMIT_BIT_WIDTH: u32 = 5;
const SECTORS_AMT_BIT_WIDTH: u32 = 5;
const DEADLINE_PARTITIONS_AMT_BIT_WIDTH: u32 = 3;

/// First version whose miner state decodes with `fil_actor_miner_state`.
const FIRST_TYPED_VERSION: u64 = 8;

/// Decodes `$decode` as the `$ty` of the miner state of `$version` and
/// evaluates `$body` on it.
macro_rules! typed_miner {
    ($version:expr, $ty:ident, $decode:expr, |$s:ident| $body:expr) => {
        typed_miner!(@versions [8 9 10 11 12 13 14 15 16] $version, $ty, $decode, |$s| $body)
    };
    (@versions [$($v:literal)+] $version:expr, $ty:ident, $decode:expr, |$s:ident| $body:expr) => {
        pastey::paste! {
            match $version {
                $($v => {
                    let $s: fil_actor_miner_state::[<v $v>]::$ty = $decode;
                    Ok($body)
                })+
                other => Err(Error::Unreachable(format!(
                    "miner v{other} has no {} layout",
                    stringify!($ty)
                ))),
            }
        }
    };
}

/// Field positions of the v0 to v7 miner layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct LegacyLayout {
    pre_committed_sectors: usize,
    sectors: usize,
    deadlines: usize,
    pub faults: usize,
    pub recoveries: usize,
    pub terminated: usize,
}

impl LegacyLayout {
    pub fn of(version: u64) -> Self {
        if version == 0 {
            Self {
                pre_committed_sectors: 5,
                sectors: 8,
                deadlines: 11,
                faults: 1,
                recoveries: 2,
                terminated: 3,
            }
        } else {
            // fee debt was added after the locked funds, and unproven
            // sectors after the partition's sectors
            Self {
                pre_committed_sectors: 6,
                sectors: 9,
                deadlines: 12,
                faults: 2,
                recoveries: 3,
                terminated: 4,
            }
        }
    }
}

struct LegacyMiner {
    info: Cid,
    pre_committed_sectors: Cid,
    sectors: Cid,
    deadlines: Cid,
}

#[delegated_enum]
enum MinerHead {
    Legacy(LegacyMiner),
    V8(fil_actor_miner_state::v8::State),
    V9(fil_actor_miner_state::v9::State),
    V10(fil_actor_miner_state::v10::State),
    V11(fil_actor_miner_state::v11::State),
    V12(fil_actor_miner_state::v12::State),
    V13(fil_actor_miner_state::v13::State),
    V14(fil_actor_miner_state::v14::State),
    V15(fil_actor_miner_state::v15::State),
    V16(fil_actor_miner_state::v16::State),
}

impl MinerHead {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        Ok(match side.version {
            0..=7 => {
                let layout = LegacyLayout::of(side.version);
                let fields = side.fields(store)?;
                Self::Legacy(LegacyMiner {
                    info: fields.link(0, "info")?,
                    pre_committed_sectors: fields
                        .link(layout.pre_committed_sectors, "pre_committed_sectors")?,
                    sectors: fields.link(layout.sectors, "sectors")?,
                    deadlines: fields.link(layout.deadlines, "deadlines")?,
                })
            }
            8 => Self::V8(side.decode(store)?),
            9 => Self::V9(side.decode(store)?),
            10 => Self::V10(side.decode(store)?),
            11 => Self::V11(side.decode(store)?),
            12 => Self::V12(side.decode(store)?),
            13 => Self::V13(side.decode(store)?),
            14 => Self::V14(side.decode(store)?),
            15 => Self::V15(side.decode(store)?),
            16 => Self::V16(side.decode(store)?),
            _ => return Err(side.unsupported("decode miner state")),
        })
    }

    /// `(info, pre_committed_sectors, sectors, deadlines)`
    fn roots(&self) -> (Cid, Cid, Cid, Cid) {
        delegate_miner_head!(self => |s| (s.info, s.pre_committed_sectors, s.sectors, s.deadlines))
    }
}

/// Status bitfields of one partition.
#[derive(Debug, Clone, Default)]
pub(super) struct PartitionStatus {
    pub faults: BitField,
    pub recoveries: BitField,
    pub terminated: BitField,
}

/// The miner collections that are diffed, and the deadlines the sector
/// status is derived from.
#[derive(Debug, Clone)]
pub(super) struct MinerState {
    pub version: u64,
    pub info: Cid,
    pub pre_commits: HamtRoot,
    pub sectors: AmtRoot,
    pub deadlines: Cid,
}

impl MinerState {
    pub fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        let version = side.version;
        let (info, pre_commits, sectors, deadlines) = MinerHead::load(store, side)?.roots();
        Ok(Self {
            version,
            info,
            pre_commits: HamtOptions::new(PRECOMMIT_BIT_WIDTH).root(pre_commits),
            sectors: if version < 3 {
                AmtRoot::legacy(sectors)
            } else {
                AmtRoot::new(sectors, SECTORS_AMT_BIT_WIDTH)
            },
            deadlines,
        })
    }

    pub fn info(&self) -> &Cid {
        &self.info
    }

    pub fn pre_commits(&self) -> &HamtRoot {
        &self.pre_commits
    }

    pub fn sectors(&self) -> &AmtRoot {
        &self.sectors
    }

    fn typed(&self) -> bool {
        self.version >= FIRST_TYPED_VERSION
    }

    /// CIDs of the deadlines, in deadline order.
    pub fn deadline_cids<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<Vec<Cid>, Error> {
        if !self.typed() {
            return StateFields::load(store, &self.deadlines)?.links(0, "due");
        }
        typed_miner!(self.version, Deadlines, load_block(store, &self.deadlines)?, |d| d.due)
    }

    /// Partitions AMT of one deadline.
    pub fn partitions<BS: Blockstore + ?Sized>(
        &self,
        store: &BS,
        deadline: &Cid,
    ) -> Result<AmtRoot, Error> {
        let partitions = if self.typed() {
            typed_miner!(self.version, Deadline, load_block(store, deadline)?, |d| d.partitions)?
        } else {
            StateFields::load(store, deadline)?.link(0, "partitions")?
        };
        Ok(if self.version < 3 {
            AmtRoot::legacy(partitions)
        } else {
            AmtRoot::new(partitions, DEADLINE_PARTITIONS_AMT_BIT_WIDTH)
        })
    }

    /// Status bitfields of a partition read from the AMT rooted at `origin`.
    pub fn partition_status(&self, origin: &Cid, partition: &Ipld) -> Result<PartitionStatus, Error> {
        if self.typed() {
            return typed_miner!(self.version, Partition, from_ipld(origin, partition)?, |p| {
                PartitionStatus {
                    faults: p.faults,
                    recoveries: p.recoveries,
                    terminated: p.terminated,
                }
            });
        }
        let layout = LegacyLayout::of(self.version);
        let Ipld::List(fields) = partition else {
            return Err(Error::malformed(
                *origin,
                format!("partition must be a list, found {}", ipld_kind(partition)),
            ));
        };
        let bitfield = |index: usize, name: &str| -> Result<BitField, Error> {
            let field = fields.get(index).ok_or_else(|| {
                Error::malformed(*origin, format!("partition has no {name} at field {index}"))
            })?;
            from_ipld(origin, field)
        };
        Ok(PartitionStatus {
            faults: bitfield(layout.faults, "faults")?,
            recoveries: bitfield(layout.recoveries, "recoveries")?,
            terminated: bitfield(layout.terminated, "terminated")?,
        })
    }
}
