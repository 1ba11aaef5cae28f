// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod hamt_tests;

use std::collections::BTreeMap;

use quickcheck::Arbitrary;

use super::ChangeKind;
use crate::utils::encoding::DeferredCbor;

fn cbor(value: &str) -> DeferredCbor {
    DeferredCbor::encode(&value).unwrap()
}

/// Expected `(key, kind, previous, current)` tuples, sorted by key.
fn model_diff<K: Ord + Clone>(
    prev: &BTreeMap<K, String>,
    curr: &BTreeMap<K, String>,
) -> Vec<(K, ChangeKind, Option<DeferredCbor>, Option<DeferredCbor>)> {
    let mut keys = prev.keys().chain(curr.keys()).cloned().collect::<Vec<_>>();
    keys.sort();
    keys.dedup();
    keys.into_iter()
        .filter_map(|k| {
            let p = prev.get(&k).map(|v| cbor(v));
            let c = curr.get(&k).map(|v| cbor(v));
            ChangeKind::between(p.as_ref(), c.as_ref()).map(|kind| (k, kind, p, c))
        })
        .collect()
}

/// Applies `edits` on top of `base`. `None` deletes the key.
fn apply_edits<K: Ord + Clone>(
    base: &BTreeMap<K, String>,
    edits: &[(K, Option<u8>)],
) -> BTreeMap<K, String> {
    let mut out = base.clone();
    for (k, v) in edits {
        match v {
            Some(v) => out.insert(k.clone(), format!("v{v}")),
            None => out.remove(k),
        };
    }
    out
}

#[derive(Debug, Clone, Copy)]
struct HamtBitWidth(u32);

impl Arbitrary for HamtBitWidth {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self(*g.choose(&[1, 2, 3, 5, 8]).unwrap())
    }
}

#[derive(Debug, Clone, Copy)]
struct AmtBitWidth(u32);

impl Arbitrary for AmtBitWidth {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self(*g.choose(&[1, 2, 3, 5, 6]).unwrap())
    }
}
