// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};
use spire_enum::prelude::delegated_enum;

use super::{ActorInput, ActorSide, SubChange, address_key, sort_changes};
use crate::adt::{ChangeKind, HamtOptions, HamtRoot, diff_map_opt};
use crate::error::Error;
use crate::shim::address::Address;
use crate::utils::encoding::DeferredCbor;

const CLAIMS_BIT_WIDTH: u32 = 5;

/// A change to the power claimed by one miner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerClaimChange {
    pub miner: Address,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

impl SubChange for PowerClaimChange {
    fn key(&self) -> Vec<u8> {
        self.miner.to_bytes()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PowerStateDiff {
    pub claims: Vec<PowerClaimChange>,
}

impl PowerStateDiff {
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

struct LegacyPower {
    claims: Cid,
}

#[delegated_enum]
enum PowerHead {
    Legacy(LegacyPower),
    V8(fil_actor_power_state::v8::State),
    V9(fil_actor_power_state::v9::State),
    V10(fil_actor_power_state::v10::State),
    V11(fil_actor_power_state::v11::State),
    V12(fil_actor_power_state::v12::State),
    V13(fil_actor_power_state::v13::State),
    V14(fil_actor_power_state::v14::State),
    V15(fil_actor_power_state::v15::State),
    V16(fil_actor_power_state::v16::State),
}

impl PowerHead {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        Ok(match side.version {
            0..=7 => {
                // Version 2 dropped `last_processed_cron_epoch`, moving the claims up.
                let index = if side.version == 0 { 14 } else { 13 };
                Self::Legacy(LegacyPower {
                    claims: side.fields(store)?.link(index, "claims")?,
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
            _ => return Err(side.unsupported("decode power state")),
        })
    }

    fn claims(&self) -> Cid {
        delegate_power_head!(self => |s| s.claims)
    }
}

struct PowerState {
    claims: HamtRoot,
}

impl PowerState {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        let claims = PowerHead::load(store, side)?.claims();
        Ok(Self {
            claims: HamtOptions::new(CLAIMS_BIT_WIDTH).root(claims),
        })
    }

    fn claims(&self) -> &HamtRoot {
        &self.claims
    }
}

pub fn diff<BS: Blockstore + ?Sized>(store: &BS, input: &ActorInput) -> Result<PowerStateDiff, Error> {
    if input.head_unchanged() {
        return Ok(PowerStateDiff::default());
    }
    let (executed, current) = input.load_states(store, PowerState::load)?;
    let changes = diff_map_opt(
        store,
        executed.as_ref().map(PowerState::claims),
        current.as_ref().map(PowerState::claims),
    )?;
    let origin = current
        .as_ref()
        .or(executed.as_ref())
        .map(|s| s.claims.cid)
        .unwrap_or_default();
    let mut claims = changes
        .into_iter()
        .map(|m| {
            m.kind.check(m.previous.as_ref(), m.current.as_ref())?;
            Ok(PowerClaimChange {
                miner: address_key(&origin, &m.key)?,
                change: m.kind,
                current: m.current,
                previous: m.previous,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    sort_changes(&mut claims);
    Ok(PowerStateDiff { claims })
}

#[cfg(test)]
mod tests {
    use ipld_core::ipld::Ipld;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actors::testing::{filler, input, side, zero};
    use crate::db::MemoryDB;
    use crate::test_utils::hamt_of;

    /// A power state whose only meaningful field is `claims`.
    fn power_state(store: &MemoryDB, version: u64, claims: &[(u64, u64)]) -> ActorSide {
        let root = Ipld::Link(hamt_of(
            store,
            CLAIMS_BIT_WIDTH,
            claims.iter().map(|(id, power)| (Address::new_id(*id).to_bytes(), *power)),
        ));
        let fields = match version {
            0 => (0..16)
                .map(|i| if i == 14 { root.clone() } else { Ipld::Integer(0) })
                .collect::<Vec<_>>(),
            1..=7 => (0..15)
                .map(|i| if i == 13 { root.clone() } else { Ipld::Integer(0) })
                .collect(),
            _ => {
                // raw byte, quality adjusted and pledge totals
                let mut fields = vec![zero(); 8];
                // smoothed quality adjusted power estimate
                fields.push(Ipld::List(vec![zero(), zero()]));
                fields.extend([Ipld::Integer(2), Ipld::Integer(1), filler(store)]);
                fields.extend([Ipld::Integer(0), root, Ipld::Null]);
                fields
            }
        };
        side(store, version, "storagepower", &fields)
    }

    #[test]
    fn claims_per_layout() {
        for version in [0, 2, 8, 12] {
            let store = MemoryDB::default();
            let executed = power_state(&store, version, &[(1000, 32), (1001, 64)]);
            let current = power_state(&store, version, &[(1000, 32), (1001, 0), (1002, 1)]);
            let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
            let summary = diff
                .claims
                .iter()
                .map(|c| (c.miner, c.change))
                .collect::<Vec<_>>();
            assert_eq!(
                summary,
                vec![
                    (Address::new_id(1001), ChangeKind::Modified),
                    (Address::new_id(1002), ChangeKind::Added),
                ]
            );
        }
    }

    #[test]
    fn removed_actor_removes_claims() {
        let store = MemoryDB::default();
        let executed = power_state(&store, 9, &[(1000, 32)]);
        let diff = diff(&store, &input(Some(executed), None)).unwrap();
        assert_eq!(diff.claims.len(), 1);
        assert_eq!(diff.claims[0].change, ChangeKind::Removed);
        assert!(diff.claims[0].current.is_none());
    }
}
