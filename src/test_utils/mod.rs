// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Fixture builders shared by unit tests. Collections are written with
//! `fvm_ipld_hamt` and `fvm_ipld_amt`, in both the current and the pre-v3
//! layouts.

use cid::Cid;
use fvm_ipld_amt::{Amt, Amtv0};
use fvm_ipld_encoding::de::DeserializeOwned;
use fvm_ipld_hamt::{BytesKey, Hamt, Hamtv0};
use serde::Serialize;

use crate::blocks::Tipset;
use crate::db::{CborStoreExt as _, MemoryDB};
use crate::shim::address::Address;
use crate::shim::clock::ChainEpoch;
use crate::shim::state_tree::{ActorState, STATE_TREE_BIT_WIDTH, StateRoot};

pub fn hamt_of<V>(
    store: &MemoryDB,
    bit_width: u32,
    entries: impl IntoIterator<Item = (Vec<u8>, V)>,
) -> Cid
where
    V: Serialize + DeserializeOwned + PartialEq,
{
    let mut hamt = Hamt::<_, V>::new_with_bit_width(store, bit_width);
    for (key, value) in entries {
        hamt.set(BytesKey(key), value).unwrap();
    }
    hamt.flush().unwrap()
}

/// Like [`hamt_of`], with pointers in the map encoding used before actors v3.
pub fn legacy_hamt_of<V>(
    store: &MemoryDB,
    bit_width: u32,
    entries: impl IntoIterator<Item = (Vec<u8>, V)>,
) -> Cid
where
    V: Serialize + DeserializeOwned + PartialEq,
{
    let mut hamt = Hamtv0::<_, V>::new_with_bit_width(store, bit_width);
    for (key, value) in entries {
        hamt.set(BytesKey(key), value).unwrap();
    }
    hamt.flush().unwrap()
}

pub fn amt_of<V>(
    store: &MemoryDB,
    bit_width: u32,
    entries: impl IntoIterator<Item = (u64, V)>,
) -> Cid
where
    V: Serialize + DeserializeOwned,
{
    let mut amt = Amt::<V, _>::new_with_bit_width(store, bit_width);
    for (index, value) in entries {
        amt.set(index, value).unwrap();
    }
    amt.flush().unwrap()
}

pub fn legacy_amt_of<V>(store: &MemoryDB, entries: impl IntoIterator<Item = (u64, V)>) -> Cid
where
    V: Serialize + DeserializeOwned,
{
    let mut amt = Amtv0::<V, _>::new(store);
    for (index, value) in entries {
        amt.set(index, value).unwrap();
    }
    amt.flush().unwrap()
}

/// A state tree holding `actors`. Version 0 trees are the bare actors HAMT.
pub fn state_tree(
    store: &MemoryDB,
    version: u64,
    actors: &[(Address, ActorState)],
) -> Cid {
    let hamt = hamt_of(
        store,
        STATE_TREE_BIT_WIDTH,
        actors.iter().map(|(a, s)| (a.to_bytes(), s.clone())),
    );
    if version == 0 {
        return hamt;
    }
    let info = store.put_cbor_default(&()).unwrap();
    store
        .put_cbor_default(&StateRoot {
            version,
            actors: hamt,
            info,
        })
        .unwrap()
}

/// A single-block tipset at `epoch` whose parent state is `state_root`.
pub fn tipset(store: &MemoryDB, epoch: ChainEpoch, parents: &Tipset, state_root: Cid) -> Tipset {
    let header = crate::blocks::testing::header(epoch, parents.key().cids().to_vec(), state_root, 1);
    store.put_cbor_default(&header).unwrap();
    Tipset::new(vec![header]).unwrap()
}

/// A genesis tipset whose parent state is `state_root`.
pub fn genesis(store: &MemoryDB, state_root: Cid) -> Tipset {
    let header = crate::blocks::testing::header(0, vec![], state_root, 0);
    store.put_cbor_default(&header).unwrap();
    Tipset::new(vec![header]).unwrap()
}
