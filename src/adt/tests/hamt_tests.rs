// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use cid::Cid;
use ipld_core::ipld::Ipld;
use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;

use super::*;
use crate::adt::{
    HamtOptions, MapModification, diff_map, diff_map_opt, for_each_entry, get_entry, uint_key,
};
use crate::db::{CborStoreExt as _, MemoryDB};
use crate::test_utils::{hamt_of, legacy_hamt_of};
use crate::utils::encoding::load_block;
use crate::utils::multihash::prelude::*;

fn build(store: &MemoryDB, bit_width: u32, entries: &BTreeMap<u16, String>) -> crate::adt::HamtRoot {
    let cid = hamt_of(
        store,
        bit_width,
        entries.iter().map(|(k, v)| (uint_key(u64::from(*k)), v.clone())),
    );
    HamtOptions::new(bit_width).root(cid)
}

fn sorted(mut changes: Vec<MapModification>) -> Vec<(Vec<u8>, ChangeKind, Option<DeferredCbor>, Option<DeferredCbor>)> {
    changes.sort_by(|a, b| a.key.cmp(&b.key));
    changes
        .into_iter()
        .map(|m| (m.key, m.kind, m.previous, m.current))
        .collect()
}

fn expected(
    prev: &BTreeMap<u16, String>,
    curr: &BTreeMap<u16, String>,
) -> Vec<(Vec<u8>, ChangeKind, Option<DeferredCbor>, Option<DeferredCbor>)> {
    let prev: BTreeMap<Vec<u8>, String> =
        prev.iter().map(|(k, v)| (uint_key(u64::from(*k)), v.clone())).collect();
    let curr: BTreeMap<Vec<u8>, String> =
        curr.iter().map(|(k, v)| (uint_key(u64::from(*k)), v.clone())).collect();
    model_diff(&prev, &curr)
}

#[quickcheck]
fn diff_matches_model(
    base: BTreeMap<u16, u8>,
    edits: Vec<(u16, Option<u8>)>,
    HamtBitWidth(bit_width): HamtBitWidth,
) {
    let store = MemoryDB::default();
    let base: BTreeMap<u16, String> = base.into_iter().map(|(k, v)| (k, format!("v{v}"))).collect();
    let curr = apply_edits(&base, &edits);
    let prev_root = build(&store, bit_width, &base);
    let curr_root = build(&store, bit_width, &curr);
    assert_eq!(
        sorted(diff_map(&store, &prev_root, &curr_root).unwrap()),
        expected(&base, &curr)
    );
}

#[quickcheck]
fn diff_across_bit_widths(base: BTreeMap<u16, u8>, edits: Vec<(u16, Option<u8>)>) {
    let store = MemoryDB::default();
    let base: BTreeMap<u16, String> = base.into_iter().map(|(k, v)| (k, format!("v{v}"))).collect();
    let curr = apply_edits(&base, &edits);
    let prev_root = build(&store, 5, &base);
    let curr_root = build(&store, 3, &curr);
    assert_eq!(
        sorted(diff_map(&store, &prev_root, &curr_root).unwrap()),
        expected(&base, &curr)
    );
}

#[test]
fn equal_roots_read_nothing() {
    let store = MemoryDB::default();
    let entries: BTreeMap<u16, String> = (0..100).map(|k| (k, format!("v{k}"))).collect();
    let root = build(&store, 5, &entries);
    // Diffing a root with itself must not touch the store.
    let empty = MemoryDB::default();
    assert!(diff_map(&empty, &root, &root).unwrap().is_empty());
}

#[test]
fn missing_side_yields_every_entry() {
    let store = MemoryDB::default();
    let entries: BTreeMap<u16, String> = (0..40).map(|k| (k, format!("v{k}"))).collect();
    let root = build(&store, 5, &entries);

    let added = diff_map_opt(&store, None, Some(&root)).unwrap();
    assert_eq!(added.len(), 40);
    assert!(added.iter().all(|m| m.kind == ChangeKind::Added && m.previous.is_none()));

    let removed = diff_map_opt(&store, Some(&root), None).unwrap();
    assert_eq!(sorted(removed), expected(&entries, &BTreeMap::new()));

    assert!(diff_map_opt(&store, None, None).unwrap().is_empty());
}

#[test]
fn lookup_and_iteration() {
    let store = MemoryDB::default();
    let entries: BTreeMap<u16, String> = (0..300).map(|k| (k, format!("v{k}"))).collect();
    let root = build(&store, 5, &entries);

    assert_eq!(get_entry(&store, &root, &uint_key(7)).unwrap(), Some(cbor("v7")));
    assert_eq!(get_entry(&store, &root, &uint_key(300)).unwrap(), None);

    let mut seen = BTreeMap::new();
    for_each_entry(&store, &root, |k, v| {
        seen.insert(k.to_vec(), DeferredCbor::from_ipld(&root.cid, v)?);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen.len(), 300);
    assert_eq!(seen.get(&uint_key(299)), Some(&cbor("v299")));
}

#[test]
fn missing_child_is_reported() {
    let full = MemoryDB::default();
    let entries: BTreeMap<u16, String> = (0..500).map(|k| (k, format!("v{k}"))).collect();
    let prev = build(&full, 5, &entries);
    let mut edited = entries.clone();
    edited.insert(1, "changed".into());
    let curr = build(&full, 5, &edited);

    // only the two roots are available
    let partial = MemoryDB::default();
    for cid in [prev.cid, curr.cid] {
        use fvm_ipld_blockstore::Blockstore as _;
        partial.put_keyed(&cid, &full.get(&cid).unwrap().unwrap()).unwrap();
    }
    assert!(matches!(
        diff_map(&partial, &prev, &curr),
        Err(crate::error::Error::StoreMissingBlock(_))
    ));
}

fn build_legacy(
    store: &MemoryDB,
    bit_width: u32,
    entries: &BTreeMap<u16, String>,
) -> crate::adt::HamtRoot {
    let cid = legacy_hamt_of(
        store,
        bit_width,
        entries.iter().map(|(k, v)| (uint_key(u64::from(*k)), v.clone())),
    );
    HamtOptions::new(bit_width).root(cid)
}

/// Slot of `key` in the root node: the leading `bit_width` bits of its hash.
fn root_slot(key: &[u8], bit_width: u32) -> u32 {
    let digest = MultihashCode::Sha2_256.digest(key);
    u32::from(digest.digest()[0] >> (8 - bit_width))
}

/// A single-node HAMT in the pre-v3 encoding, written by hand: each pointer
/// is a one-entry map keyed "1" around its bucket.
fn hand_built_legacy(store: &MemoryDB, entries: &[(u64, &str)]) -> crate::adt::HamtRoot {
    let sorted_entries: BTreeMap<Vec<u8>, &str> =
        entries.iter().map(|(k, v)| (uint_key(*k), *v)).collect();
    let mut buckets: BTreeMap<u32, Vec<Ipld>> = BTreeMap::new();
    for (key, value) in sorted_entries {
        buckets.entry(root_slot(&key, 5)).or_default().push(Ipld::List(vec![
            Ipld::Bytes(key),
            Ipld::String(value.to_string()),
        ]));
    }
    let bitmap = buckets.keys().fold(0u32, |acc, slot| acc | (1 << slot));
    let bitfield = bitmap
        .to_be_bytes()
        .into_iter()
        .skip_while(|b| *b == 0)
        .collect::<Vec<_>>();
    let pointers = buckets
        .into_values()
        .map(|kvs| Ipld::Map(BTreeMap::from([("1".to_string(), Ipld::List(kvs))])))
        .collect();
    let cid = store
        .put_cbor_default(&Ipld::List(vec![Ipld::Bytes(bitfield), Ipld::List(pointers)]))
        .unwrap();
    HamtOptions::new(5).root(cid)
}

fn has_map_pointers(store: &MemoryDB, cid: &Cid) -> bool {
    let Ipld::List(fields) = load_block::<_, Ipld>(store, cid).unwrap() else {
        panic!("HAMT node must be a list");
    };
    matches!(&fields[1], Ipld::List(pointers) if pointers.iter().all(|p| matches!(p, Ipld::Map(_))))
}

#[test]
fn hand_built_legacy_node() {
    let store = MemoryDB::default();
    let items = [(1, "a"), (2, "b"), (70, "c"), (1000, "d")];
    let root = hand_built_legacy(&store, &items);
    assert!(has_map_pointers(&store, &root.cid));

    for (key, value) in items {
        assert_eq!(get_entry(&store, &root, &uint_key(key)).unwrap(), Some(cbor(value)));
    }
    assert_eq!(get_entry(&store, &root, &uint_key(3)).unwrap(), None);

    let mut seen = BTreeMap::new();
    for_each_entry(&store, &root, |k, v| {
        seen.insert(k.to_vec(), DeferredCbor::from_ipld(&root.cid, v)?);
        Ok(())
    })
    .unwrap();
    assert_eq!(seen.len(), items.len());

    // the same entries written in the current encoding
    let entries: BTreeMap<u16, String> = items
        .iter()
        .map(|(k, v)| (*k as u16, v.to_string()))
        .collect();
    let mut edited = entries.clone();
    edited.insert(2, "B".into());
    edited.remove(&70);
    edited.insert(5, "e".into());
    let current = build(&store, 5, &edited);
    assert_eq!(
        sorted(diff_map(&store, &root, &current).unwrap()),
        expected(&entries, &edited)
    );
}

#[quickcheck]
fn legacy_diff_matches_model(base: BTreeMap<u16, u8>, edits: Vec<(u16, Option<u8>)>) {
    let store = MemoryDB::default();
    let base: BTreeMap<u16, String> = base.into_iter().map(|(k, v)| (k, format!("v{v}"))).collect();
    let curr = apply_edits(&base, &edits);
    let prev_root = build_legacy(&store, 5, &base);
    let curr_root = build_legacy(&store, 5, &curr);
    assert_eq!(
        sorted(diff_map(&store, &prev_root, &curr_root).unwrap()),
        expected(&base, &curr)
    );
}

#[test]
fn legacy_lookup_through_links() {
    let store = MemoryDB::default();
    let entries: BTreeMap<u16, String> = (0..500).map(|k| (k, format!("v{k}"))).collect();
    let root = build_legacy(&store, 5, &entries);
    assert!(has_map_pointers(&store, &root.cid));

    assert_eq!(get_entry(&store, &root, &uint_key(321)).unwrap(), Some(cbor("v321")));
    assert_eq!(get_entry(&store, &root, &uint_key(500)).unwrap(), None);

    let mut count = 0;
    for_each_entry(&store, &root, |_, _| {
        count += 1;
        Ok(())
    })
    .unwrap();
    assert_eq!(count, 500);
}

#[test]
fn diff_across_the_v3_migration() {
    let store = MemoryDB::default();
    let before: BTreeMap<u16, String> = (0..400).map(|k| (k, format!("v{k}"))).collect();
    let mut after = before.clone();
    after.insert(7, "seven".into());
    after.remove(&250);
    after.insert(900, "new".into());

    let legacy = build_legacy(&store, 5, &before);
    let migrated = build(&store, 5, &before);
    assert_ne!(legacy.cid, migrated.cid);
    // a re-encoded map with the same entries has no changes
    assert!(diff_map(&store, &legacy, &migrated).unwrap().is_empty());

    let current = build(&store, 5, &after);
    assert_eq!(
        sorted(diff_map(&store, &legacy, &current).unwrap()),
        expected(&before, &after)
    );
    assert_eq!(
        sorted(diff_map(&store, &current, &legacy).unwrap()),
        expected(&after, &before)
    );
}
