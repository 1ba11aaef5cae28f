// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The output container: an IPLD DAG holding the actor state changes of one
//! or more tipset pairs, written as a single-root CAR.
//!
//! Every sub-collection is a HAMT keyed the way the chain keys it. Families
//! that did not change leave their field out, so an extraction without any
//! change is a single block.


use std::io::{Read, Write};

use anyhow::Context as _;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_hamt::{BytesKey, Hamt};
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actors::datacap::DataCapStateDiff;
use crate::actors::init::InitStateDiff;
use crate::actors::market::MarketStateDiff;
use crate::actors::miner::{MinerInfoChange, MinerSectorStatusChange, MinerStateDiff};
use crate::actors::power::PowerStateDiff;
use crate::actors::raw::RawActorChange;
use crate::actors::verifreg::VerifregStateDiff;
use crate::actors::{SubChange, address_key, sort_changes};
use crate::adt::BlockReader;
use crate::blocks::Tipset;
use crate::db::car::{read_car, write_dag};
use crate::db::{CborStoreExt as _, MemoryDB};
use crate::error::Error;
use crate::extract::ActorStateChanges;
use crate::shim::address::Address;
use crate::utils::encoding::{from_ipld, load_block};

/// Bit width of every HAMT written to the container.
pub const CONTAINER_BIT_WIDTH: u32 = 5;

fn store_error(err: impl Into<anyhow::Error>) -> Error {
    Error::from_store(err.into())
}

fn put<BS: Blockstore, T: Serialize>(store: &BS, value: &T) -> Result<Cid, Error> {
    store.put_cbor_default(value).map_err(Error::from_store)
}

/// Writes `entries` to a new container HAMT, or nothing when there are none.
fn put_map<BS, V>(
    store: &BS,
    entries: impl IntoIterator<Item = (Vec<u8>, V)>,
) -> Result<Option<Cid>, Error>
where
    BS: Blockstore,
    V: Serialize + serde::de::DeserializeOwned + PartialEq,
{
    let mut entries = entries.into_iter().peekable();
    if entries.peek().is_none() {
        return Ok(None);
    }
    let mut hamt = Hamt::<_, V>::new_with_bit_width(store, CONTAINER_BIT_WIDTH);
    for (key, value) in entries {
        hamt.set(BytesKey(key), value).map_err(store_error)?;
    }
    hamt.flush().map(Some).map_err(store_error)
}

fn put_changes<BS: Blockstore, T: SubChange>(
    store: &BS,
    changes: &[T],
) -> Result<Option<Cid>, Error> {
    put_map(store, changes.iter().map(|c| (c.key(), c.clone())))
}

fn load_map<BS, V>(store: &BS, cid: &Cid) -> Result<Vec<(Vec<u8>, V)>, Error>
where
    BS: Blockstore + ?Sized,
    V: serde::de::DeserializeOwned,
{
    let reader = BlockReader::new(store);
    let mut entries = vec![];
    Hamt::<_, Ipld>::load_with_bit_width(cid, &reader, CONTAINER_BIT_WIDTH)
        .and_then(|hamt| {
            hamt.for_each_cacheless(|key, value| {
                entries.push((key.0.clone(), from_ipld(cid, value)?));
                Ok(())
            })
        })
        .map_err(|err| reader.hamt_error(cid, err))?;
    Ok(entries)
}

fn load_changes<BS: Blockstore + ?Sized, T: SubChange>(
    store: &BS,
    cid: Option<&Cid>,
) -> Result<Vec<T>, Error> {
    let Some(cid) = cid else {
        return Ok(vec![]);
    };
    let mut changes = load_map::<_, T>(store, cid)?
        .into_iter()
        .map(|(key, change)| {
            if change.key() != key {
                return Err(Error::malformed(
                    *cid,
                    format!("change filed under foreign key 0x{}", hex::encode(&key)),
                ));
            }
            Ok(change)
        })
        .collect::<Result<Vec<_>, _>>()?;
    sort_changes(&mut changes);
    Ok(changes)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MinerStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    info: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sectors: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pre_commits: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sector_status: Option<Cid>,
}

impl MinerStateChange {
    fn put<BS: Blockstore>(store: &BS, diff: &MinerStateDiff) -> Result<Self, Error> {
        Ok(Self {
            info: diff.info.as_ref().map(|info| put(store, info)).transpose()?,
            sectors: put_changes(store, &diff.sectors)?,
            pre_commits: put_changes(store, &diff.pre_commits)?,
            sector_status: diff
                .sector_status
                .as_ref()
                .map(|status| put(store, status))
                .transpose()?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<MinerStateDiff, Error> {
        Ok(MinerStateDiff {
            info: self
                .info
                .map(|cid| load_block::<_, MinerInfoChange>(store, &cid))
                .transpose()?,
            sectors: load_changes(store, self.sectors.as_ref())?,
            pre_commits: load_changes(store, self.pre_commits.as_ref())?,
            sector_status: self
                .sector_status
                .map(|cid| load_block::<_, MinerSectorStatusChange>(store, &cid))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct MarketStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deals: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proposals: Option<Cid>,
}

impl MarketStateChange {
    fn put<BS: Blockstore>(store: &BS, diff: &MarketStateDiff) -> Result<Self, Error> {
        Ok(Self {
            deals: put_changes(store, &diff.deals)?,
            proposals: put_changes(store, &diff.proposals)?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<MarketStateDiff, Error> {
        Ok(MarketStateDiff {
            deals: load_changes(store, self.deals.as_ref())?,
            proposals: load_changes(store, self.proposals.as_ref())?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PowerStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claims: Option<Cid>,
}

impl PowerStateChange {
    fn put<BS: Blockstore>(store: &BS, diff: &PowerStateDiff) -> Result<Self, Error> {
        Ok(Self {
            claims: put_changes(store, &diff.claims)?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<PowerStateDiff, Error> {
        Ok(PowerStateDiff {
            claims: load_changes(store, self.claims.as_ref())?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct InitStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    addresses: Option<Cid>,
}

impl InitStateChange {
    fn put<BS: Blockstore>(store: &BS, diff: &InitStateDiff) -> Result<Self, Error> {
        Ok(Self {
            addresses: put_changes(store, &diff.addresses)?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<InitStateDiff, Error> {
        Ok(InitStateDiff {
            addresses: load_changes(store, self.addresses.as_ref())?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct VerifregStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    claims: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    clients: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verifiers: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allocations: Option<Cid>,
}

impl VerifregStateChange {
    fn put<BS: Blockstore>(store: &BS, diff: &VerifregStateDiff) -> Result<Self, Error> {
        Ok(Self {
            claims: put_changes(store, &diff.claims)?,
            clients: put_changes(store, &diff.clients)?,
            verifiers: put_changes(store, &diff.verifiers)?,
            allocations: put_changes(store, &diff.allocations)?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<VerifregStateDiff, Error> {
        Ok(VerifregStateDiff {
            verifiers: load_changes(store, self.verifiers.as_ref())?,
            clients: load_changes(store, self.clients.as_ref())?,
            claims: load_changes(store, self.claims.as_ref())?,
            allocations: load_changes(store, self.allocations.as_ref())?,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct DataCapStateChange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    balances: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allowances: Option<Cid>,
}

impl DataCapStateChange {
    fn put<BS: Blockstore>(store: &BS, diff: &DataCapStateDiff) -> Result<Self, Error> {
        Ok(Self {
            balances: put_changes(store, &diff.balances)?,
            allowances: put_changes(store, &diff.allowances)?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<DataCapStateDiff, Error> {
        Ok(DataCapStateDiff {
            balances: load_changes(store, self.balances.as_ref())?,
            allowances: load_changes(store, self.allowances.as_ref())?,
        })
    }
}

/// The changes of one tipset pair. Field order is the canonical DAG-CBOR
/// order of the keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ActorRoot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    init: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    power: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    market: Option<Cid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    miners: Option<Cid>,
    current: Tipset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    datacap: Option<Cid>,
    executed: Tipset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verifreg: Option<Cid>,
}

fn put_singleton<BS: Blockstore, D, C: Serialize>(
    store: &BS,
    diff: Option<&D>,
    build: impl FnOnce(&BS, &D) -> Result<C, Error>,
) -> Result<Option<Cid>, Error> {
    diff.map(|diff| put(store, &build(store, diff)?)).transpose()
}

fn load_singleton<BS: Blockstore + ?Sized, C: serde::de::DeserializeOwned, D>(
    store: &BS,
    cid: Option<&Cid>,
    load: impl FnOnce(&C, &BS) -> Result<D, Error>,
) -> Result<Option<D>, Error> {
    cid.map(|cid| load(&load_block::<_, C>(store, cid)?, store))
        .transpose()
}

impl ActorRoot {
    fn put<BS: Blockstore>(store: &BS, changes: &ActorStateChanges) -> Result<Self, Error> {
        let raw = put_map(
            store,
            changes
                .raw
                .iter()
                .map(|(address, change)| (address.to_bytes(), change.clone())),
        )?;
        let miners = put_map(
            store,
            changes
                .miners
                .iter()
                .map(|(address, diff)| Ok((address.to_bytes(), MinerStateChange::put(store, diff)?)))
                .collect::<Result<Vec<_>, Error>>()?,
        )?;
        Ok(Self {
            raw,
            init: put_singleton(store, changes.init.as_ref(), InitStateChange::put)?,
            power: put_singleton(store, changes.power.as_ref(), PowerStateChange::put)?,
            market: put_singleton(store, changes.market.as_ref(), MarketStateChange::put)?,
            miners,
            current: changes.current.clone(),
            datacap: put_singleton(store, changes.datacap.as_ref(), DataCapStateChange::put)?,
            executed: changes.executed.clone(),
            verifreg: put_singleton(store, changes.verifreg.as_ref(), VerifregStateChange::put)?,
        })
    }

    fn load<BS: Blockstore + ?Sized>(self, store: &BS) -> Result<ActorStateChanges, Error> {
        let mut changes = ActorStateChanges::new(self.current, self.executed);
        if let Some(cid) = &self.raw {
            for (key, change) in load_map::<_, RawActorChange>(store, cid)? {
                changes.raw.insert(address_key(cid, &key)?, change);
            }
        }
        if let Some(cid) = &self.miners {
            for (key, miner) in load_map::<_, MinerStateChange>(store, cid)? {
                let address: Address = address_key(cid, &key)?;
                changes.miners.insert(address, miner.load(store)?);
            }
        }
        changes.init = load_singleton(store, self.init.as_ref(), InitStateChange::load)?;
        changes.power = load_singleton(store, self.power.as_ref(), PowerStateChange::load)?;
        changes.market = load_singleton(store, self.market.as_ref(), MarketStateChange::load)?;
        changes.verifreg =
            load_singleton(store, self.verifreg.as_ref(), VerifregStateChange::load)?;
        changes.datacap = load_singleton(store, self.datacap.as_ref(), DataCapStateChange::load)?;
        Ok(changes)
    }
}

/// Root block of the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StateExtraction {
    roots: Vec<ActorRoot>,
    network: String,
    /// Messages are not extracted; always null.
    messages: Option<Cid>,
    actor_version: u64,
    network_version: u32,
}

/// The actor state changes of consecutive tipset pairs of one network,
/// as stored in a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub network: String,
    pub network_version: u32,
    pub actor_version: u64,
    pub changes: Vec<ActorStateChanges>,
}

impl Extraction {
    /// Puts every block of the container into `store` and returns the root.
    pub fn put<BS: Blockstore>(&self, store: &BS) -> Result<Cid, Error> {
        let roots = self
            .changes
            .iter()
            .map(|changes| ActorRoot::put(store, changes))
            .collect::<Result<Vec<_>, _>>()?;
        let root = put(
            store,
            &StateExtraction {
                roots,
                network: self.network.clone(),
                messages: None,
                actor_version: self.actor_version,
                network_version: self.network_version,
            },
        )?;
        debug!(%root, pairs = self.changes.len(), "stored container");
        Ok(root)
    }

    /// Reads the container under `root` back.
    pub fn load<BS: Blockstore + ?Sized>(store: &BS, root: &Cid) -> Result<Self, Error> {
        let StateExtraction {
            roots,
            network,
            messages: _,
            actor_version,
            network_version,
        } = load_block(store, root)?;
        Ok(Self {
            network,
            network_version,
            actor_version,
            changes: roots
                .into_iter()
                .map(|root| root.load(store))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Writes the container as a CAR and returns its root.
    pub fn write_car(&self, writer: impl Write) -> anyhow::Result<Cid> {
        let store = MemoryDB::default();
        let root = self.put(&store)?;
        write_dag(writer, &store, root).context("failed to write container CAR")?;
        Ok(root)
    }

    pub fn read_car(reader: impl Read) -> anyhow::Result<Self> {
        let (root, store) = read_car(reader)?;
        Extraction::load(&store, &root).with_context(|| format!("failed to read container {root}"))
    }
}
