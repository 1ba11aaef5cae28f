// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use rayon::prelude::*;

use super::hamt::{HamtOptions, HamtRoot, diff_opt};
use super::{ChangeKind, MapModification};
use crate::error::Error;
use crate::utils::encoding::DeferredCbor;

/// A changed entry of a map of maps, keyed by both levels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestedMapModification {
    pub outer_key: Vec<u8>,
    pub inner_key: Vec<u8>,
    pub kind: ChangeKind,
    pub previous: Option<DeferredCbor>,
    pub current: Option<DeferredCbor>,
}

impl NestedMapModification {
    fn new(outer_key: &[u8], inner: MapModification) -> Self {
        Self {
            outer_key: outer_key.to_vec(),
            inner_key: inner.key,
            kind: inner.kind,
            previous: inner.previous,
            current: inner.current,
        }
    }
}

/// Diffs a HAMT whose values are roots of further HAMTs built with `inner`.
///
/// Inner maps are diffed in parallel. An outer entry reported as modified
/// must yield at least one inner change, since its value is the inner root.
pub fn diff_nested_opt<BS: Blockstore + Sync + ?Sized>(
    store: &BS,
    prev: Option<&HamtRoot>,
    curr: Option<&HamtRoot>,
    inner: HamtOptions,
) -> Result<Vec<NestedMapModification>, Error> {
    let outer = diff_opt(store, prev, curr)?;
    let per_outer = outer
        .par_iter()
        .map(|change| {
            let origin = prev.or(curr).map(|r| r.cid).unwrap_or_default();
            let root = |value: Option<&DeferredCbor>| -> Result<Option<HamtRoot>, Error> {
                value
                    .map(|v| v.decode_as::<Cid>(&origin).map(|cid| inner.root(cid)))
                    .transpose()
            };
            let inner_prev = root(change.previous.as_ref())?;
            let inner_curr = root(change.current.as_ref())?;
            let changes = diff_opt(store, inner_prev.as_ref(), inner_curr.as_ref())?;
            if change.kind == ChangeKind::Modified && changes.is_empty() {
                return Err(Error::InvariantViolated(format!(
                    "outer key 0x{} changed but its inner map did not",
                    hex::encode(&change.key)
                )));
            }
            Ok(changes
                .into_iter()
                .map(|inner| NestedMapModification::new(&change.key, inner))
                .collect::<Vec<_>>())
        })
        .collect::<Result<Vec<_>, Error>>()?;
    Ok(per_outer.into_iter().flatten().collect())
}
