// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Where chain data comes from: a local CAR snapshot or a Lotus-compatible
//! node over JSON-RPC.

mod car;
mod rpc;

pub use car::CarDataSource;
pub use rpc::RpcDataSource;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

use crate::actors::init::{self, INIT_ACTOR_ADDR};
use crate::adt::get_entry;
use crate::blocks::{Tipset, TipsetKey};
use crate::error::Error;
use crate::networks::UpgradeSchedule;
use crate::shim::address::{Address, Protocol};
use crate::shim::clock::ChainEpoch;
use crate::shim::econ::TokenAmount;
use crate::shim::state_tree::{ActorState, StateTreeRoot};
use crate::utils::encoding::load_raw;

/// Chain access the extraction needs. Every call blocks until the data is
/// available; implementations backed by a network bridge to their runtime.
pub trait DataSource: Send + Sync {
    type Store: Blockstore + Send + Sync;

    fn store(&self) -> &Self::Store;

    fn upgrades(&self) -> &UpgradeSchedule;

    fn head(&self) -> Result<Tipset, Error>;

    /// The tipset at `height`, or the last one before it when `height` is a
    /// null round.
    fn tipset_by_height(&self, height: ChainEpoch) -> Result<Tipset, Error>;

    fn network_name(&self) -> Result<String, Error>;

    fn network_version(&self, key: &TipsetKey) -> Result<u32, Error> {
        let tipset = self.tipset(key)?;
        Ok(self.upgrades().network_version(tipset.epoch()))
    }

    fn tipset(&self, key: &TipsetKey) -> Result<Tipset, Error> {
        Tipset::load(self.store(), key)
    }

    fn chain_read_obj(&self, cid: &Cid) -> Result<Vec<u8>, Error> {
        load_raw(self.store(), cid)
    }

    /// The actor at `address` in the state `key` ran on.
    fn actor(&self, address: &Address, key: &TipsetKey) -> Result<Option<ActorState>, Error> {
        let tipset = self.tipset(key)?;
        lookup_actor(self.store(), tipset.parent_state(), address)
    }

    /// Base fee of the tipset following `tipset`.
    fn compute_base_fee(&self, tipset: &Tipset) -> Result<TokenAmount, Error> {
        crate::chain::compute_base_fee(self.store(), tipset, self.upgrades().smoke_height())
    }
}

/// Reads an actor from the state tree under `state_root`. Addresses other
/// than IDs are resolved through the init actor first.
pub fn lookup_actor<BS: Blockstore + ?Sized>(
    store: &BS,
    state_root: &Cid,
    address: &Address,
) -> Result<Option<ActorState>, Error> {
    let actors = StateTreeRoot::load(store, state_root)?.actors();
    let get = |address: &Address| {
        get_entry(store, &actors, &address.to_bytes())?
            .map(|actor| actor.decode_as::<ActorState>(&actors.cid))
            .transpose()
    };
    if address.protocol() == Protocol::ID {
        return get(address);
    }
    let Some(init_actor) = get(&INIT_ACTOR_ADDR)? else {
        return Err(Error::InvariantViolated(format!(
            "state {state_root} has no init actor"
        )));
    };
    match init::resolve_address(store, &init_actor.state, address)? {
        Some(id) => get(&Address::new_id(id)),
        None => Ok(None),
    }
}
