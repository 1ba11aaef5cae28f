// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};
use spire_enum::prelude::delegated_enum;

use super::{ActorInput, ActorSide, SubChange, nested_key, sort_changes, uint_key_of};
use crate::adt::{ChangeKind, HamtOptions, HamtRoot, diff_map_opt, diff_nested_opt, uint_key};
use crate::error::Error;
use crate::utils::encoding::DeferredCbor;

/// A change to the datacap balance of a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCapBalanceChange {
    pub change: ChangeKind,
    /// Actor ID of the balance holder.
    pub client: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

/// A change to what `operator` may spend on behalf of `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCapAllowanceChange {
    pub owner: u64,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    pub operator: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

impl SubChange for DataCapBalanceChange {
    fn key(&self) -> Vec<u8> {
        uint_key(self.client)
    }
}

impl SubChange for DataCapAllowanceChange {
    fn key(&self) -> Vec<u8> {
        nested_key(&uint_key(self.owner), &uint_key(self.operator))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataCapStateDiff {
    pub balances: Vec<DataCapBalanceChange>,
    pub allowances: Vec<DataCapAllowanceChange>,
}

impl DataCapStateDiff {
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.allowances.is_empty()
    }
}

/// Datacap heads; the actor first appeared in version 9.
#[delegated_enum]
enum DataCapHead {
    V9(fil_actor_datacap_state::v9::State),
    V10(fil_actor_datacap_state::v10::State),
    V11(fil_actor_datacap_state::v11::State),
    V12(fil_actor_datacap_state::v12::State),
    V13(fil_actor_datacap_state::v13::State),
    V14(fil_actor_datacap_state::v14::State),
    V15(fil_actor_datacap_state::v15::State),
    V16(fil_actor_datacap_state::v16::State),
}

impl DataCapHead {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        Ok(match side.version {
            9 => Self::V9(side.decode(store)?),
            10 => Self::V10(side.decode(store)?),
            11 => Self::V11(side.decode(store)?),
            12 => Self::V12(side.decode(store)?),
            13 => Self::V13(side.decode(store)?),
            14 => Self::V14(side.decode(store)?),
            15 => Self::V15(side.decode(store)?),
            16 => Self::V16(side.decode(store)?),
            _ => return Err(side.unsupported("decode datacap state")),
        })
    }

    /// `(balances, allowances, hamt_bit_width)` of the datacap token.
    fn token(&self) -> (Cid, Cid, u32) {
        delegate_data_cap_head!(self => |s| (
            s.token.balances,
            s.token.allowances,
            s.token.hamt_bit_width
        ))
    }
}

struct DataCapState {
    balances: HamtRoot,
    allowances: HamtRoot,
    /// Options of the per-owner allowance maps.
    inner: HamtOptions,
}

impl DataCapState {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        let (balances, allowances, bit_width) = DataCapHead::load(store, side)?.token();
        let options = HamtOptions::new(bit_width);
        Ok(Self {
            balances: options.root(balances),
            allowances: options.root(allowances),
            inner: options,
        })
    }

    fn balances(&self) -> &HamtRoot {
        &self.balances
    }

    fn allowances(&self) -> &HamtRoot {
        &self.allowances
    }
}

pub fn diff<BS: Blockstore + Sync + ?Sized>(
    store: &BS,
    input: &ActorInput,
) -> Result<DataCapStateDiff, Error> {
    if input.head_unchanged() {
        return Ok(DataCapStateDiff::default());
    }
    let (executed, current) = input.load_states(store, DataCapState::load)?;
    let (executed, current) = (executed.as_ref(), current.as_ref());
    let Some(reference) = current.or(executed) else {
        return Ok(DataCapStateDiff::default());
    };
    let origin = reference.balances.cid;
    if let (Some(e), Some(c)) = (executed, current) {
        if e.inner != c.inner {
            return Err(Error::InvariantViolated(format!(
                "datacap allowance maps changed bit width from {} to {}",
                e.inner.bit_width, c.inner.bit_width
            )));
        }
    }

    let (balances, allowances) = rayon::join(
        || -> Result<_, Error> {
            let changes = diff_map_opt(
                store,
                executed.map(DataCapState::balances),
                current.map(DataCapState::balances),
            )?;
            changes
                .into_iter()
                .map(|m| {
                    m.kind.check(m.previous.as_ref(), m.current.as_ref())?;
                    Ok(DataCapBalanceChange {
                        change: m.kind,
                        client: uint_key_of(&origin, &m.key)?,
                        current: m.current,
                        previous: m.previous,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()
        },
        || -> Result<_, Error> {
            let changes = diff_nested_opt(
                store,
                executed.map(DataCapState::allowances),
                current.map(DataCapState::allowances),
                reference.inner,
            )?;
            changes
                .into_iter()
                .map(|m| {
                    m.kind.check(m.previous.as_ref(), m.current.as_ref())?;
                    Ok(DataCapAllowanceChange {
                        owner: uint_key_of(&origin, &m.outer_key)?,
                        change: m.kind,
                        current: m.current,
                        operator: uint_key_of(&origin, &m.inner_key)?,
                        previous: m.previous,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()
        },
    );
    let mut diff = DataCapStateDiff {
        balances: balances?,
        allowances: allowances?,
    };
    sort_changes(&mut diff.balances);
    sort_changes(&mut diff.allowances);
    Ok(diff)
}
