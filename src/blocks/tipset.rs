// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::tuple::*;
use itertools::Itertools as _;
use serde::{Deserialize, Serialize};

use super::{Error, RawBlockHeader};
use crate::shim::{clock::ChainEpoch, econ::TokenAmount};
use crate::utils::encoding::load_block;

/// The CIDs of the blocks of a tipset, in canonical block order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipsetKey(Vec<Cid>);

impl TipsetKey {
    pub fn new(cids: Vec<Cid>) -> Self {
        Self(cids)
    }

    pub fn cids(&self) -> &[Cid] {
        &self.0
    }
}

impl fmt::Display for TipsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().join(","))
    }
}

/// An immutable set of blocks at the same height with the same parent set.
///
/// Encoded as `[cids, blocks, height]`, the form the container embeds.
#[derive(Clone, Debug, PartialEq, Serialize_tuple)]
pub struct Tipset {
    key: TipsetKey,
    headers: Vec<RawBlockHeader>,
    height: ChainEpoch,
}

impl<'de> Deserialize<'de> for Tipset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (_, headers, _): (TipsetKey, Vec<RawBlockHeader>, ChainEpoch) =
            Deserialize::deserialize(deserializer)?;
        Tipset::new(headers).map_err(serde::de::Error::custom)
    }
}

impl Tipset {
    /// Builds a tipset from its headers, sorting them into canonical order.
    pub fn new(headers: Vec<RawBlockHeader>) -> Result<Self, Error> {
        let first = headers.first().ok_or(Error::NoBlocks)?;
        for header in &headers[1..] {
            if header.epoch != first.epoch {
                return Err(Error::InvalidTipset("epochs are not equal".into()));
            }
            if header.parents != first.parents {
                return Err(Error::InvalidTipset("parent cids are not equal".into()));
            }
            if header.state_root != first.state_root {
                return Err(Error::InvalidTipset("state_roots are not equal".into()));
            }
        }
        let height = first.epoch;
        let mut blocks = headers
            .into_iter()
            .map(|header| {
                let (cid, _) = header
                    .car_block()
                    .map_err(|e| Error::InvalidTipset(e.to_string()))?;
                Ok((cid, header))
            })
            .collect::<Result<Vec<_>, Error>>()?;
        blocks.sort_by_cached_key(|(cid, header)| header.tipset_sort_key(cid));
        let (cids, headers): (Vec<_>, Vec<_>) = blocks.into_iter().unzip();
        Ok(Self {
            key: TipsetKey(cids),
            headers,
            height,
        })
    }

    /// Loads the headers named by `key` from the store.
    pub fn load<BS: Blockstore + ?Sized>(
        store: &BS,
        key: &TipsetKey,
    ) -> Result<Self, crate::error::Error> {
        let headers = key
            .cids()
            .iter()
            .map(|cid| load_block::<_, RawBlockHeader>(store, cid))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(headers).map_err(|e| {
            crate::error::Error::malformed(key.cids().first().copied().unwrap_or_default(), e)
        })
    }

    pub fn key(&self) -> &TipsetKey {
        &self.key
    }

    pub fn epoch(&self) -> ChainEpoch {
        self.height
    }

    pub fn block_headers(&self) -> &[RawBlockHeader] {
        &self.headers
    }

    fn min_ticket_block(&self) -> &RawBlockHeader {
        // `new` rejects empty tipsets
        #[allow(clippy::indexing_slicing)]
        &self.headers[0]
    }

    pub fn parents(&self) -> TipsetKey {
        TipsetKey(self.min_ticket_block().parents.clone())
    }

    /// State root of the parent tipset, after executing its messages.
    pub fn parent_state(&self) -> &Cid {
        &self.min_ticket_block().state_root
    }

    pub fn parent_base_fee(&self) -> &TokenAmount {
        &self.min_ticket_block().parent_base_fee
    }
}
