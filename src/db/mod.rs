// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod cache;
pub mod car;
mod memory;

pub use cache::CachingBlockstore;
pub use memory::MemoryDB;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::DAG_CBOR;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::utils::multihash::prelude::*;

/// Extension methods for inserting CBOR blocks with the default Filecoin hash.
pub trait CborStoreExt: Blockstore {
    /// Encodes `obj` as DAG-CBOR, stores it under a BLAKE2b-256 CID and returns the CID.
    fn put_cbor_default<S: Serialize>(&self, obj: &S) -> anyhow::Result<Cid> {
        let bytes = fvm_ipld_encoding::to_vec(obj)?;
        let cid = Cid::new_v1(DAG_CBOR, MultihashCode::Blake2b256.digest(&bytes));
        self.put_keyed(&cid, &bytes)?;
        Ok(cid)
    }
}

impl<T: Blockstore + ?Sized> CborStoreExt for T {}

/// A read-through view of a store that refuses to serve blocks once `token`
/// is cancelled. Every diff task reads through one of these, so cancellation
/// is observed at the next store read.
pub struct CancellableStore<'a, BS: ?Sized> {
    inner: &'a BS,
    token: CancellationToken,
}

impl<'a, BS: ?Sized> CancellableStore<'a, BS> {
    pub fn new(inner: &'a BS, token: CancellationToken) -> Self {
        Self { inner, token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl<BS: Blockstore + ?Sized> Blockstore for CancellableStore<'_, BS> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled.into());
        }
        self.inner.get(k)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.inner.put_keyed(k, block)
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        self.inner.has(k)
    }
}
