// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple as _;
use serde::{Deserializer, Serializer};

use crate::adt::{HamtOptions, HamtRoot};
use crate::error::Error;
use crate::shim::{address::Address, econ::TokenAmount};
use crate::utils::encoding::load_raw;

/// Bit width of the actors HAMT, fixed for every state tree version.
pub const STATE_TREE_BIT_WIDTH: u32 = 5;

/// State root information. Contains information about the version of the state tree,
/// the root of the tree, and a link to the information about the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize_tuple, Deserialize_tuple)]
pub struct StateRoot {
    /// State tree version
    pub version: u64,
    /// Actors tree. The structure depends on the state root version.
    pub actors: Cid,
    /// Info. The structure depends on the state root version.
    pub info: Cid,
}

/// The top of a state tree, in whichever layout it was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTreeRoot {
    /// Version 0 trees are the bare actors HAMT.
    Legacy { actors: Cid },
    /// Version 1 and later wrap the actors HAMT in a [`StateRoot`].
    Versioned { version: u64, actors: Cid, info: Cid },
}

impl StateTreeRoot {
    /// Tries the [`StateRoot`] layout first and falls back to treating
    /// `root` as a legacy bare HAMT.
    pub fn load<BS: Blockstore + ?Sized>(store: &BS, root: &Cid) -> Result<Self, Error> {
        let bytes = load_raw(store, root)?;
        Ok(match fvm_ipld_encoding::from_slice::<StateRoot>(&bytes) {
            Ok(StateRoot {
                version,
                actors,
                info,
            }) => Self::Versioned {
                version,
                actors,
                info,
            },
            Err(_) => Self::Legacy { actors: *root },
        })
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Legacy { .. } => 0,
            Self::Versioned { version, .. } => *version,
        }
    }

    /// The actors HAMT: address bytes to [`ActorState`].
    pub fn actors(&self) -> HamtRoot {
        let cid = match self {
            Self::Legacy { actors } | Self::Versioned { actors, .. } => *actors,
        };
        HamtOptions::new(STATE_TREE_BIT_WIDTH).root(cid)
    }
}

/// Actor record in the state tree.
///
/// Encoded as `[code, head, nonce, balance]`, with a trailing
/// delegated address from state tree version 5 on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorState {
    /// Link to code for the actor.
    pub code: Cid,
    /// Link to the state of the actor.
    pub state: Cid,
    /// Sequence of the actor.
    pub sequence: u64,
    /// Tokens available to the actor.
    pub balance: TokenAmount,
    /// The actor's "delegated" address, if assigned.
    pub delegated_address: Option<Address>,
}

impl ActorState {
    pub fn new(code: Cid, state: Cid, balance: TokenAmount, sequence: u64) -> Self {
        Self {
            code,
            state,
            sequence,
            balance,
            delegated_address: None,
        }
    }
}

impl serde::Serialize for ActorState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.delegated_address.is_some() { 5 } else { 4 };
        let mut tuple = serializer.serialize_tuple(len)?;
        tuple.serialize_element(&self.code)?;
        tuple.serialize_element(&self.state)?;
        tuple.serialize_element(&self.sequence)?;
        tuple.serialize_element(&self.balance)?;
        if let Some(address) = &self.delegated_address {
            tuple.serialize_element(address)?;
        }
        tuple.end()
    }
}

impl<'de> serde::Deserialize<'de> for ActorState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ActorStateVisitor;

        impl<'de> Visitor<'de> for ActorStateVisitor {
            type Value = ActorState;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an actor tuple of 4 or 5 elements")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ActorState, A::Error> {
                let code = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let state = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let sequence = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let balance = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                let delegated_address = seq.next_element::<Option<Address>>()?.flatten();
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(6, &self));
                }
                Ok(ActorState {
                    code,
                    state,
                    sequence,
                    balance,
                    delegated_address,
                })
            }
        }

        deserializer.deserialize_seq(ActorStateVisitor)
    }
}
