// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;
use std::sync::Arc;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use hashlink::LruCache;
use parking_lot::Mutex;

/// Bounded LRU cache of block bytes in front of a slower store.
///
/// The lock is never held while the inner store is read.
pub struct CachingBlockstore<BS> {
    inner: BS,
    cache: Mutex<LruCache<Cid, Arc<[u8]>>>,
}

impl<BS> CachingBlockstore<BS> {
    pub fn new(inner: BS, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity.get())),
        }
    }

    pub fn inner(&self) -> &BS {
        &self.inner
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl<BS: Blockstore> Blockstore for CachingBlockstore<BS> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        if let Some(hit) = self.cache.lock().get(k) {
            return Ok(Some(hit.to_vec()));
        }
        let block = self.inner.get(k)?;
        if let Some(data) = &block {
            self.cache.lock().insert(*k, Arc::from(data.as_slice()));
        }
        Ok(block)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.inner.put_keyed(k, block)
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        if self.cache.lock().contains_key(k) {
            return Ok(true);
        }
        self.inner.has(k)
    }
}
