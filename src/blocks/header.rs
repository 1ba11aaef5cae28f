// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::strict_bytes;
use fvm_ipld_encoding::tuple::*;
use ipld_core::ipld::Ipld;

use crate::shim::{address::Address, clock::ChainEpoch, econ::TokenAmount};
use crate::utils::multihash::prelude::*;

/// A block header as it is stored on chain. Proofs and signatures are kept
/// undecoded: the indexer only needs them to re-encode the header exactly.
#[derive(Deserialize_tuple, Serialize_tuple, Clone, PartialEq, Debug)]
pub struct RawBlockHeader {
    /// The address of the miner actor that mined this block
    pub miner_address: Address,
    pub ticket: Option<Ipld>,
    pub election_proof: Option<Ipld>,
    pub beacon_entries: Vec<Ipld>,
    pub winning_post_proof: Vec<Ipld>,
    /// The set of parents this block was based on.
    pub parents: Vec<Cid>,
    /// The aggregate chain weight of the parent set
    #[serde(with = "strict_bytes")]
    pub weight: Vec<u8>,
    pub epoch: ChainEpoch,
    /// The CID of the parent state root after calculating parent tipset.
    pub state_root: Cid,
    /// The CID of the root of an array of `MessageReceipts`
    pub message_receipts: Cid,
    /// The CID of the Merkle links for `bls_messages` and `secp_messages`
    pub messages: Cid,
    pub bls_aggregate: Option<Ipld>,
    /// Block creation time, in seconds since the Unix epoch
    pub timestamp: u64,
    pub signature: Option<Ipld>,
    pub fork_signal: u64,
    /// The base fee of the parent block
    pub parent_base_fee: TokenAmount,
}

impl RawBlockHeader {
    pub fn car_block(&self) -> anyhow::Result<(Cid, Vec<u8>)> {
        let data = fvm_ipld_encoding::to_vec(self)?;
        let cid = Cid::new_v1(
            fvm_ipld_encoding::DAG_CBOR,
            MultihashCode::Blake2b256.digest(&data),
        );
        Ok((cid, data))
    }

    /// Blocks of a tipset are ordered by the hash of their ticket, ties
    /// broken by CID bytes.
    pub(super) fn tipset_sort_key(&self, cid: &Cid) -> (Vec<u8>, Vec<u8>) {
        let ticket_hash = match &self.ticket {
            Some(Ipld::List(fields)) => match fields.first() {
                Some(Ipld::Bytes(vrfproof)) => {
                    MultihashCode::Blake2b256.digest(vrfproof).digest().to_vec()
                }
                _ => vec![],
            },
            _ => vec![],
        };
        (ticket_hash, cid.to_bytes())
    }
}
