// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};
use spire_enum::prelude::delegated_enum;

use super::{ActorInput, ActorSide, SubChange, address_key, sort_changes};
use crate::adt::{ChangeKind, HamtOptions, HamtRoot, diff_map_opt, get_entry};
use crate::error::Error;
use crate::shim::address::Address;
use crate::utils::encoding::{DeferredCbor, load_block};

const ADDRESS_MAP_BIT_WIDTH: u32 = 5;

/// Address of the init actor.
pub const INIT_ACTOR_ADDR: Address = Address::new_id(1);

/// A change to the mapping from robust addresses to actor IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitAddressChange {
    pub change: ChangeKind,
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

impl SubChange for InitAddressChange {
    fn key(&self) -> Vec<u8> {
        self.address.to_bytes()
    }
}

impl InitAddressChange {
    /// The actor ID currently assigned to the address.
    pub fn current_id(&self) -> Result<Option<u64>, Error> {
        let origin = cid::Cid::default();
        self.current.as_ref().map(|v| v.decode_as(&origin)).transpose()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitStateDiff {
    pub addresses: Vec<InitAddressChange>,
}

impl InitStateDiff {
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

struct LegacyInit {
    address_map: Cid,
}

#[delegated_enum]
enum InitHead {
    Legacy(LegacyInit),
    V8(fil_actor_init_state::v8::State),
    V9(fil_actor_init_state::v9::State),
    V10(fil_actor_init_state::v10::State),
    V11(fil_actor_init_state::v11::State),
    V12(fil_actor_init_state::v12::State),
    V13(fil_actor_init_state::v13::State),
    V14(fil_actor_init_state::v14::State),
    V15(fil_actor_init_state::v15::State),
    V16(fil_actor_init_state::v16::State),
}

impl InitHead {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        Ok(match side.version {
            0..=7 => Self::Legacy(LegacyInit {
                address_map: side.fields(store)?.link(0, "address_map")?,
            }),
            8 => Self::V8(side.decode(store)?),
            9 => Self::V9(side.decode(store)?),
            10 => Self::V10(side.decode(store)?),
            11 => Self::V11(side.decode(store)?),
            12 => Self::V12(side.decode(store)?),
            13 => Self::V13(side.decode(store)?),
            14 => Self::V14(side.decode(store)?),
            15 => Self::V15(side.decode(store)?),
            16 => Self::V16(side.decode(store)?),
            _ => return Err(side.unsupported("decode init state")),
        })
    }

    fn address_map(&self) -> Cid {
        delegate_init_head!(self => |s| s.address_map)
    }
}

struct InitState {
    address_map: HamtRoot,
}

impl InitState {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        let address_map = InitHead::load(store, side)?.address_map();
        Ok(Self {
            address_map: HamtOptions::new(ADDRESS_MAP_BIT_WIDTH).root(address_map),
        })
    }

    fn address_map(&self) -> &HamtRoot {
        &self.address_map
    }
}

/// Init state whose code is not at hand. `[address_map, next_id,
/// network_name]` is the layout of every version, so the newest one reads
/// them all.
type AnyInitState = fil_actor_init_state::v16::State;

/// Actor ID the init actor whose head is `head` assigned to `address`.
pub fn resolve_address<BS: Blockstore + ?Sized>(
    store: &BS,
    head: &Cid,
    address: &Address,
) -> Result<Option<u64>, Error> {
    let state: AnyInitState = load_block(store, head)?;
    let address_map = HamtOptions::new(ADDRESS_MAP_BIT_WIDTH).root(state.address_map);
    get_entry(store, &address_map, &address.to_bytes())?
        .map(|id| id.decode_as(&address_map.cid))
        .transpose()
}

/// Name of the network, as recorded by the init actor at genesis.
pub fn network_name<BS: Blockstore + ?Sized>(store: &BS, head: &Cid) -> Result<String, Error> {
    let state: AnyInitState = load_block(store, head)?;
    Ok(state.network_name)
}

pub fn diff<BS: Blockstore + ?Sized>(store: &BS, input: &ActorInput) -> Result<InitStateDiff, Error> {
    if input.head_unchanged() {
        return Ok(InitStateDiff::default());
    }
    let (executed, current) = input.load_states(store, InitState::load)?;
    let changes = diff_map_opt(
        store,
        executed.as_ref().map(InitState::address_map),
        current.as_ref().map(InitState::address_map),
    )?;
    let origin = current
        .as_ref()
        .or(executed.as_ref())
        .map(|s| s.address_map.cid)
        .unwrap_or_default();
    let mut addresses = changes
        .into_iter()
        .map(|m| {
            m.kind.check(m.previous.as_ref(), m.current.as_ref())?;
            Ok(InitAddressChange {
                change: m.kind,
                address: address_key(&origin, &m.key)?,
                current: m.current,
                previous: m.previous,
            })
        })
        .collect::<Result<Vec<_>, Error>>()?;
    sort_changes(&mut addresses);
    Ok(InitStateDiff { addresses })
}
