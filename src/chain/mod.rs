// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Chain helpers the data sources need besides state: block messages and
//! the base fee of the next tipset.

use ahash::HashSet;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared4::bigint::{BigInt, Integer as _};
use ipld_core::ipld::Ipld;

use crate::adt::{AmtRoot, for_each_element};
use crate::blocks::{RawBlockHeader, Tipset};
use crate::error::Error;
use crate::shim::{clock::ChainEpoch, econ::TokenAmount};
use crate::utils::encoding::{ipld_kind, load_fields};

pub const BLOCK_GAS_LIMIT: i64 = 10_000_000_000;
pub const BLOCK_GAS_TARGET: i64 = BLOCK_GAS_LIMIT / 2;
pub const BASE_FEE_MAX_CHANGE_DENOM: i64 = 8; // 12.5%;
pub const INITIAL_BASE_FEE: i64 = 100000000; // Genesis base fee
pub const MINIMUM_BASE_FEE: i64 = 100;
const PACKING_EFFICIENCY_NUM: i64 = 4;
const PACKING_EFFICIENCY_DENOM: i64 = 5;

pub fn compute_next_base_fee(
    base_fee: &TokenAmount,
    gas_limit_used: i64,
    no_of_blocks: usize,
    epoch: ChainEpoch,
    smoke_height: ChainEpoch,
) -> TokenAmount {
    let no_of_blocks = i64::try_from(no_of_blocks.max(1)).unwrap_or(i64::MAX);
    let mut delta = if epoch > smoke_height {
        gas_limit_used / no_of_blocks
    } else {
        PACKING_EFFICIENCY_DENOM * gas_limit_used / (no_of_blocks * PACKING_EFFICIENCY_NUM)
    };
    delta -= BLOCK_GAS_TARGET;
    // cap change at 12.5% (BaseFeeMaxChangeDenom) by capping delta
    delta = delta.clamp(-BLOCK_GAS_TARGET, BLOCK_GAS_TARGET);

    let change = (base_fee.atto() * BigInt::from(delta))
        .div_floor(&BigInt::from(BLOCK_GAS_TARGET))
        .div_floor(&BigInt::from(BASE_FEE_MAX_CHANGE_DENOM));
    let next_base_fee = base_fee.atto() + change;
    TokenAmount::from_atto(next_base_fee.max(BigInt::from(MINIMUM_BASE_FEE)))
}

/// CIDs of the BLS and secp messages included in a block.
pub fn block_message_cids<BS: Blockstore + ?Sized>(
    store: &BS,
    header: &RawBlockHeader,
) -> Result<Vec<Cid>, Error> {
    let meta = load_fields(store, &header.messages)?;
    let mut cids = vec![];
    for (index, root) in meta.iter().enumerate().take(2) {
        let Ipld::Link(root) = root else {
            return Err(Error::malformed(
                header.messages,
                format!("message root {index} must be a link, found {}", ipld_kind(root)),
            ));
        };
        let root = AmtRoot::legacy(*root);
        for_each_element(store, &root, |_, value| match value {
            Ipld::Link(cid) => {
                cids.push(*cid);
                Ok(())
            }
            other => Err(Error::malformed(
                root.cid,
                format!("message entry must be a link, found {}", ipld_kind(other)),
            )),
        })?;
    }
    Ok(cids)
}

/// Gas limit of a message, signed or not.
fn gas_limit<BS: Blockstore + ?Sized>(store: &BS, cid: &Cid) -> Result<i64, Error> {
    let fields = load_fields(store, cid)?;
    let message = match fields.first() {
        // `[message, signature]`
        Some(Ipld::List(message)) => message,
        _ => &fields,
    };
    match message.get(5) {
        Some(Ipld::Integer(limit)) => i64::try_from(*limit)
            .map_err(|_| Error::malformed(*cid, format!("gas limit {limit} out of range"))),
        _ => Err(Error::malformed(*cid, "message has no gas limit")),
    }
}

/// Base fee of the tipset following `tipset`, from the gas limits of the
/// unique messages it includes.
pub fn compute_base_fee<BS: Blockstore + ?Sized>(
    store: &BS,
    tipset: &Tipset,
    smoke_height: ChainEpoch,
) -> Result<TokenAmount, Error> {
    let mut seen = HashSet::default();
    let mut total_limit = 0i64;
    for header in tipset.block_headers() {
        for cid in block_message_cids(store, header)? {
            if seen.insert(cid) {
                total_limit = total_limit.saturating_add(gas_limit(store, &cid)?);
            }
        }
    }
    Ok(compute_next_base_fee(
        tipset.parent_base_fee(),
        total_limit,
        tipset.block_headers().len(),
        tipset.epoch(),
        smoke_height,
    ))
}
