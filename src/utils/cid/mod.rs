// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_encoding::{DAG_CBOR, Error, IPLD_RAW};

use crate::utils::multihash::prelude::*;

/// Extension methods for constructing `dag-cbor` [Cid]
pub trait CidCborExt {
    /// Default CID builder for Filecoin
    ///
    /// - The default codec is [`fvm_ipld_encoding::DAG_CBOR`]
    /// - The default hash function is 256 bit BLAKE2b
    ///
    /// This matches [`abi.CidBuilder`](https://github.com/filecoin-project/go-state-types/blob/master/abi/cid.go#L49) in go
    fn from_cbor_blake2b256<S: serde::ser::Serialize>(obj: &S) -> Result<Cid, Error> {
        let bytes = fvm_ipld_encoding::to_vec(obj)?;
        Ok(Cid::new_v1(
            DAG_CBOR,
            MultihashCode::Blake2b256.digest(&bytes),
        ))
    }

    /// Raw CID whose multihash inlines `bytes`, as used by legacy builtin actor codes.
    fn identity_raw(bytes: &[u8]) -> Cid {
        Cid::new_v1(IPLD_RAW, MultihashCode::Identity.digest(bytes))
    }
}

impl CidCborExt for Cid {}
