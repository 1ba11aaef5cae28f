// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-family actor state differs.
//!
//! Each family decodes the actor head of both sides with the state type of
//! its actor version, diffs the sub-collections it points at with
//! [`crate::adt`], and wraps every generic modification into a typed change.
//! Heads from version 8 on are `fil_actor_*_state` types behind a
//! per-family enum; the v0 to v7 layouts are read by field position.

pub mod datacap;
pub mod init;
pub mod market;
pub mod miner;
pub mod power;
pub mod raw;
pub mod registry;
pub mod verifreg;

pub use registry::{ActorRegistry, BuiltinActor};

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use ipld_core::ipld::Ipld;

use crate::adt::{ChangeKind, parse_uint_key};
use crate::error::Error;
use crate::shim::address::Address;
use crate::shim::state_tree::ActorState;
use crate::utils::encoding::{DeferredCbor, ipld_kind, load_block, load_fields};

/// Newest actor version whose state layouts are known.
pub const NEWEST_ACTOR_VERSION: u64 = 16;

/// Actor families with a dedicated differ. Every changed actor is also
/// recorded by the raw differ, which is not a family of its own.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "lowercase")]
pub enum ActorFamily {
    Init,
    Market,
    Miner,
    Power,
    Verifreg,
    Datacap,
}

impl ActorFamily {
    pub fn of(builtin: BuiltinActor) -> Option<Self> {
        match builtin {
            BuiltinActor::Init => Some(Self::Init),
            BuiltinActor::Market => Some(Self::Market),
            BuiltinActor::Miner => Some(Self::Miner),
            BuiltinActor::Power => Some(Self::Power),
            BuiltinActor::VerifiedRegistry => Some(Self::Verifreg),
            BuiltinActor::DataCap => Some(Self::Datacap),
            _ => None,
        }
    }
}

/// One side of a changed actor, with its code resolved to an actor version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorSide {
    pub version: u64,
    pub state: ActorState,
}

impl ActorSide {
    /// Decodes the head with the state type of a specific actor version.
    pub fn decode<BS, T>(&self, store: &BS) -> Result<T, Error>
    where
        BS: Blockstore + ?Sized,
        T: serde::de::DeserializeOwned,
    {
        load_block(store, &self.state.state)
    }

    /// Positional view of the head, for the layouts that predate the typed
    /// actor states.
    pub fn fields<BS: Blockstore + ?Sized>(&self, store: &BS) -> Result<StateFields, Error> {
        StateFields::load(store, &self.state.state)
    }

    pub fn unsupported(&self, op: &'static str) -> Error {
        Error::UnsupportedActorVersion {
            code: self.state.code,
            op,
        }
    }
}

/// A changed actor as handed to a family differ. A missing side means the
/// actor does not exist there, or belonged to another family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInput {
    pub address: Address,
    pub kind: ChangeKind,
    pub executed: Option<ActorSide>,
    pub current: Option<ActorSide>,
}

impl ActorInput {
    /// Both sides point at the same head with the same code.
    pub fn head_unchanged(&self) -> bool {
        match (&self.executed, &self.current) {
            (Some(e), Some(c)) => e.state.state == c.state.state && e.state.code == c.state.code,
            _ => false,
        }
    }

    /// Loads the typed view of each present side.
    pub fn load_states<BS, S>(
        &self,
        store: &BS,
        load: impl Fn(&BS, &ActorSide) -> Result<S, Error>,
    ) -> Result<(Option<S>, Option<S>), Error>
    where
        BS: Blockstore + ?Sized,
    {
        let executed = self.executed.as_ref().map(|s| load(store, s)).transpose()?;
        let current = self.current.as_ref().map(|s| load(store, s)).transpose()?;
        Ok((executed, current))
    }
}

/// The fields of an actor state encoded as a CBOR tuple. Only used for the
/// v0 to v7 layouts.
#[derive(Debug, Clone)]
pub struct StateFields {
    origin: Cid,
    fields: Vec<Ipld>,
}

impl StateFields {
    pub fn load<BS: Blockstore + ?Sized>(store: &BS, head: &Cid) -> Result<Self, Error> {
        Ok(Self {
            origin: *head,
            fields: load_fields(store, head)?,
        })
    }

    fn field(&self, index: usize, name: &str) -> Result<&Ipld, Error> {
        self.fields.get(index).ok_or_else(|| {
            Error::malformed(
                self.origin,
                format!("{name} is field {index} but the state has {}", self.fields.len()),
            )
        })
    }

    fn unexpected(&self, name: &str, expected: &str, found: &Ipld) -> Error {
        Error::malformed(
            self.origin,
            format!("{name} must be a {expected}, found {}", ipld_kind(found)),
        )
    }

    pub fn link(&self, index: usize, name: &str) -> Result<Cid, Error> {
        match self.field(index, name)? {
            Ipld::Link(cid) => Ok(*cid),
            other => Err(self.unexpected(name, "link", other)),
        }
    }

    /// An array of links, as the miner deadlines are.
    pub fn links(&self, index: usize, name: &str) -> Result<Vec<Cid>, Error> {
        match self.field(index, name)? {
            Ipld::List(items) => items
                .iter()
                .map(|item| match item {
                    Ipld::Link(cid) => Ok(*cid),
                    other => Err(self.unexpected(name, "list of links", other)),
                })
                .collect(),
            other => Err(self.unexpected(name, "list", other)),
        }
    }
}

/// Decodes a HAMT key holding an address.
pub fn address_key(origin: &Cid, key: &[u8]) -> Result<Address, Error> {
    Address::from_bytes(key).map_err(|e| Error::malformed(*origin, format!("invalid address key: {e}")))
}

/// Decodes a HAMT key holding an actor ID or another unsigned integer.
pub fn uint_key_of(origin: &Cid, key: &[u8]) -> Result<u64, Error> {
    parse_uint_key(key)
        .ok_or_else(|| Error::malformed(*origin, format!("invalid integer key 0x{}", hex::encode(key))))
}

/// Key of an entry of a map of maps in the output container. The outer key
/// is length-prefixed so distinct pairs never collide.
pub fn nested_key(outer: &[u8], inner: &[u8]) -> Vec<u8> {
    let mut key = crate::adt::uint_key(outer.len() as u64);
    key.extend_from_slice(outer);
    key.extend_from_slice(inner);
    key
}

/// Checks a decoded change before it is wrapped.
pub fn checked(
    kind: ChangeKind,
    previous: Option<DeferredCbor>,
    current: Option<DeferredCbor>,
) -> Result<(ChangeKind, Option<DeferredCbor>, Option<DeferredCbor>), Error> {
    kind.check(previous.as_ref(), current.as_ref())?;
    Ok((kind, previous, current))
}

/// Sub-change types stored in per-collection HAMTs of the output container.
pub trait SubChange:
    serde::Serialize + serde::de::DeserializeOwned + Clone + PartialEq + std::fmt::Debug
{
    /// Key of the change in the output container: the key the chain uses.
    fn key(&self) -> Vec<u8>;
}

/// Sorts changes by their container key, the order every differ returns.
pub fn sort_changes<T: SubChange>(changes: &mut [T]) {
    changes.sort_by_cached_key(|c| c.key());
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builders for actor states used by the family tests.

    use super::*;
    use crate::db::{CborStoreExt as _, MemoryDB};
    use crate::shim::econ::TokenAmount;
    use crate::utils::cid::CidCborExt as _;

    /// Stores a tuple-encoded actor state and returns the side pointing at it.
    pub fn side<S: serde::Serialize>(store: &MemoryDB, version: u64, name: &str, state: &S) -> ActorSide {
        let head = store.put_cbor_default(state).unwrap();
        let code = Cid::identity_raw(format!("fil/{version}/{name}").as_bytes());
        ActorSide {
            version,
            state: ActorState::new(code, head, TokenAmount::from_atto(0), 0),
        }
    }

    /// Link to an empty block, for state fields a test never follows.
    pub fn filler(store: &MemoryDB) -> Ipld {
        Ipld::Link(store.put_cbor_default(&Vec::<u64>::new()).unwrap())
    }

    /// A zero token amount, big integer or power as actor states encode it.
    pub fn zero() -> Ipld {
        Ipld::Bytes(vec![])
    }

    pub fn input(executed: Option<ActorSide>, current: Option<ActorSide>) -> ActorInput {
        let kind = match (&executed, &current) {
            (None, _) => ChangeKind::Added,
            (_, None) => ChangeKind::Removed,
            _ => ChangeKind::Modified,
        };
        ActorInput {
            address: Address::new_id(1000),
            kind,
            executed,
            current,
        }
    }
}
