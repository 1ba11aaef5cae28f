// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::cell::RefCell;
use std::fmt::Display;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;

use crate::error::Error;

/// Read-only view of a store for the `fvm_ipld_hamt` and `fvm_ipld_amt`
/// readers.
///
/// Those crates flatten store failures into their own error types, so the
/// first missing block or store error seen here is kept and reported in place
/// of theirs. Cancellation of a [`crate::db::CancellableStore`] thus survives
/// the round trip.
pub struct BlockReader<'a, BS: ?Sized> {
    inner: &'a BS,
    failure: RefCell<Option<Error>>,
}

impl<'a, BS: Blockstore + ?Sized> BlockReader<'a, BS> {
    pub fn new(inner: &'a BS) -> Self {
        Self {
            inner,
            failure: RefCell::new(None),
        }
    }

    fn record(&self, err: Error) {
        self.failure.borrow_mut().get_or_insert(err);
    }

    /// Converts an error of a collection read rooted at `origin`. Errors
    /// raised by a visitor pass through unchanged.
    pub fn hamt_error(&self, origin: &Cid, err: fvm_ipld_hamt::Error) -> Error {
        match err {
            fvm_ipld_hamt::Error::Dynamic(err) => self.dynamic_error(origin, err),
            other => self.error(origin, other),
        }
    }

    /// See [`Self::hamt_error`].
    pub fn amt_error(&self, origin: &Cid, err: fvm_ipld_amt::Error) -> Error {
        match err {
            fvm_ipld_amt::Error::Dynamic(err) => self.dynamic_error(origin, err),
            other => self.error(origin, other),
        }
    }

    pub fn dynamic_error(&self, origin: &Cid, err: anyhow::Error) -> Error {
        match err.downcast::<Error>() {
            Ok(err) => err,
            Err(err) => self.error(origin, format!("{err:#}")),
        }
    }

    fn error(&self, origin: &Cid, err: impl Display) -> Error {
        self.failure
            .borrow_mut()
            .take()
            .unwrap_or_else(|| Error::malformed(*origin, err))
    }
}

impl<BS: Blockstore + ?Sized> Blockstore for BlockReader<'_, BS> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        match self.inner.get(k) {
            Ok(Some(block)) => Ok(Some(block)),
            Ok(None) => {
                self.record(Error::StoreMissingBlock(*k));
                Ok(None)
            }
            Err(err) => {
                let err = Error::from_store(err);
                let message = err.to_string();
                self.record(err);
                Err(anyhow::anyhow!(message))
            }
        }
    }

    fn put_keyed(&self, k: &Cid, _block: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("refusing to write {k} through a read-only view")
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        self.inner.has(k)
    }
}
