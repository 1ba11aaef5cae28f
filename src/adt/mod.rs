// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Structural diffs of the two persistent on-chain collections: HAMT maps and
//! AMT arrays.
//!
//! Values are never decoded here. Every modification carries the CBOR bytes of
//! the entries it compares, and subtrees behind equal CIDs are skipped without
//! being read.

mod amt;
mod hamt;
mod nested;
mod store;
#[cfg(test)]
mod tests;

pub use amt::{AmtRoot, AmtVersion, diff as diff_array, diff_opt as diff_array_opt, for_each as for_each_element};
pub use hamt::{
    HamtOptions, HamtRoot, diff as diff_map, diff_opt as diff_map_opt, for_each as for_each_entry,
    get as get_entry,
};
pub use nested::{NestedMapModification, diff_nested_opt};
pub use store::BlockReader;

use fvm_ipld_encoding::repr::{Deserialize_repr, Serialize_repr};

use crate::error::Error;
use crate::utils::encoding::DeferredCbor;

/// What happened to a single entry between two snapshots.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize_repr,
    Deserialize_repr,
    strum::Display,
    strum::EnumString,
)]
#[repr(u8)]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Added = 0,
    Removed = 1,
    Modified = 2,
    Unknown = 3,
}

impl ChangeKind {
    /// Checks that the presence of both sides agrees with the kind.
    pub fn check(
        self,
        previous: Option<&DeferredCbor>,
        current: Option<&DeferredCbor>,
    ) -> Result<(), Error> {
        let consistent = match self {
            Self::Added => previous.is_none() && current.is_some(),
            Self::Removed => previous.is_some() && current.is_none(),
            Self::Modified => matches!((previous, current), (Some(p), Some(c)) if p != c),
            Self::Unknown => false,
        };
        if consistent {
            Ok(())
        } else {
            Err(Error::InvariantViolated(format!(
                "{self} entry with previous present: {}, current present: {}",
                previous.is_some(),
                current.is_some()
            )))
        }
    }

    /// Derives the kind from the two sides of an entry. Returns [`None`] when
    /// the entry did not change.
    pub fn between(previous: Option<&DeferredCbor>, current: Option<&DeferredCbor>) -> Option<Self> {
        match (previous, current) {
            (None, None) => None,
            (None, Some(_)) => Some(Self::Added),
            (Some(_), None) => Some(Self::Removed),
            (Some(p), Some(c)) if p == c => None,
            (Some(_), Some(_)) => Some(Self::Modified),
        }
    }
}

/// A changed HAMT entry. `key` is the key exactly as stored on-chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapModification {
    pub key: Vec<u8>,
    pub kind: ChangeKind,
    pub previous: Option<DeferredCbor>,
    pub current: Option<DeferredCbor>,
}

impl MapModification {
    pub fn added(key: Vec<u8>, current: DeferredCbor) -> Self {
        Self {
            key,
            kind: ChangeKind::Added,
            previous: None,
            current: Some(current),
        }
    }

    pub fn removed(key: Vec<u8>, previous: DeferredCbor) -> Self {
        Self {
            key,
            kind: ChangeKind::Removed,
            previous: Some(previous),
            current: None,
        }
    }

    pub fn modified(key: Vec<u8>, previous: DeferredCbor, current: DeferredCbor) -> Self {
        Self {
            key,
            kind: ChangeKind::Modified,
            previous: Some(previous),
            current: Some(current),
        }
    }
}

/// A changed AMT element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayModification {
    pub index: u64,
    pub kind: ChangeKind,
    pub previous: Option<DeferredCbor>,
    pub current: Option<DeferredCbor>,
}

impl ArrayModification {
    pub fn added(index: u64, current: DeferredCbor) -> Self {
        Self {
            index,
            kind: ChangeKind::Added,
            previous: None,
            current: Some(current),
        }
    }

    pub fn removed(index: u64, previous: DeferredCbor) -> Self {
        Self {
            index,
            kind: ChangeKind::Removed,
            previous: Some(previous),
            current: None,
        }
    }

    pub fn modified(index: u64, previous: DeferredCbor, current: DeferredCbor) -> Self {
        Self {
            index,
            kind: ChangeKind::Modified,
            previous: Some(previous),
            current: Some(current),
        }
    }
}

/// Decodes a HAMT key holding an unsigned varint, as used for actor IDs,
/// sector numbers and allocation IDs.
pub fn parse_uint_key(key: &[u8]) -> Option<u64> {
    use integer_encoding::VarInt as _;
    match u64::decode_var(key) {
        Some((value, read)) if read == key.len() => Some(value),
        _ => None,
    }
}

pub fn uint_key(value: u64) -> Vec<u8> {
    use integer_encoding::VarInt as _;
    value.encode_var_vec()
}
