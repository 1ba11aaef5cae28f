// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_hamt::{BytesKey, Hamt, Hamtv0};
use ipld_core::ipld::Ipld;

use super::MapModification;
use super::store::BlockReader;
use crate::error::Error;
use crate::utils::encoding::{DeferredCbor, ipld_kind, load_block};

/// How a HAMT instance was built. Keys are always hashed with SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HamtOptions {
    pub bit_width: u32,
}

impl HamtOptions {
    pub const fn new(bit_width: u32) -> Self {
        Self { bit_width }
    }

    pub const fn root(self, cid: Cid) -> HamtRoot {
        HamtRoot {
            cid,
            bit_width: self.bit_width,
        }
    }
}

/// A HAMT root together with the options needed to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HamtRoot {
    pub cid: Cid,
    pub bit_width: u32,
}

impl HamtRoot {
    pub fn options(&self) -> HamtOptions {
        HamtOptions::new(self.bit_width)
    }
}

/// Pointer to a bucket of key-value pairs or a link to another child node.
#[derive(Debug)]
enum Pointer {
    Link(Cid),
    Bucket(Vec<(Vec<u8>, Ipld)>),
}

/// Node in HAMT tree which contains bitfield of set indexes and pointers to nodes.
///
/// Only the diff walks nodes itself, to skip subtrees behind equal links.
/// Entries are otherwise read through `fvm_ipld_hamt`.
#[derive(Debug)]
struct Node {
    cid: Cid,
    /// Big-endian bitfield, leading zero bytes stripped.
    bitfield: Vec<u8>,
    pointers: Vec<Pointer>,
    /// Pointers use the map encoding of HAMTs written before actors v3.
    legacy: bool,
}

impl Node {
    fn load<BS: Blockstore + ?Sized>(store: &BS, cid: &Cid) -> Result<Self, Error> {
        let ipld: Ipld = load_block(store, cid)?;
        Self::from_ipld(*cid, ipld).map_err(|reason| Error::malformed(*cid, reason))
    }

    fn from_ipld(cid: Cid, ipld: Ipld) -> Result<Self, String> {
        let Ipld::List(fields) = ipld else {
            return Err(format!("HAMT node must be a list, found {}", ipld_kind(&ipld)));
        };
        let [Ipld::Bytes(bitfield), Ipld::List(pointers)] = <[Ipld; 2]>::try_from(fields)
            .map_err(|fields| format!("HAMT node must have 2 fields, found {}", fields.len()))?
        else {
            return Err("HAMT node must be [bitfield, pointers]".into());
        };
        let legacy = pointers.iter().any(|p| matches!(p, Ipld::Map(_)));
        let pointers = pointers
            .into_iter()
            .map(Pointer::from_ipld)
            .collect::<Result<Vec<_>, _>>()?;
        let node = Node {
            cid,
            bitfield,
            pointers,
            legacy,
        };
        let set = node.bitfield.iter().map(|b| b.count_ones() as usize).sum::<usize>();
        if set != node.pointers.len() {
            return Err(format!(
                "bitfield has {set} bits set but node has {} pointers",
                node.pointers.len()
            ));
        }
        Ok(node)
    }

    fn test_bit(&self, i: u32) -> bool {
        let byte = (i / 8) as usize;
        match self.bitfield.len().checked_sub(byte + 1) {
            Some(pos) => (self.bitfield[pos] >> (i % 8)) & 1 == 1,
            None => false,
        }
    }

    /// Pointers laid out by slot, [`None`] where the bitfield is unset.
    fn slots(&self, bit_width: u32) -> Result<Vec<Option<&Pointer>>, Error> {
        if bit_width == 0 || bit_width > 8 {
            return Err(Error::malformed(
                self.cid,
                format!("unsupported HAMT bit width {bit_width}"),
            ));
        }
        let mut pointers = self.pointers.iter();
        let slots = (0..1u32 << bit_width)
            .map(|i| if self.test_bit(i) { pointers.next() } else { None })
            .collect();
        if pointers.next().is_some() {
            return Err(Error::malformed(
                self.cid,
                format!("bitfield is wider than bit width {bit_width}"),
            ));
        }
        Ok(slots)
    }
}

impl Pointer {
    fn from_ipld(ipld: Ipld) -> Result<Self, String> {
        match ipld {
            Ipld::Link(cid) => Ok(Self::Link(cid)),
            Ipld::List(kvs) => kvs
                .into_iter()
                .map(|kv| match kv {
                    Ipld::List(pair) => match <[Ipld; 2]>::try_from(pair) {
                        Ok([Ipld::Bytes(key), value]) => Ok((key, value)),
                        _ => Err("bucket entry must be [key bytes, value]".to_string()),
                    },
                    other => Err(format!("bucket entry must be a list, found {}", ipld_kind(&other))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Bucket),
            // Legacy nodes wrap the pointer in a single-entry map, keyed "0"
            // for links and "1" for buckets.
            Ipld::Map(map) => match map.into_iter().next() {
                Some((_, inner @ (Ipld::Link(_) | Ipld::List(_)))) => Self::from_ipld(inner),
                Some((_, other)) => Err(format!(
                    "legacy pointer must hold a link or a list, found {}",
                    ipld_kind(&other)
                )),
                None => Err("legacy pointer must not be empty".into()),
            },
            other => Err(format!("unexpected HAMT pointer {}", ipld_kind(&other))),
        }
    }
}

/// A (sub)tree as `fvm_ipld_hamt` reads it.
#[derive(Debug, Clone, Copy)]
struct Tree {
    cid: Cid,
    bit_width: u32,
    legacy: bool,
}

impl Tree {
    fn for_each<BS, F>(self, store: &BS, mut f: F) -> Result<(), Error>
    where
        BS: Blockstore + ?Sized,
        F: FnMut(&[u8], &Ipld) -> Result<(), Error>,
    {
        let reader = BlockReader::new(store);
        let visit = |k: &BytesKey, v: &Ipld| f(k.0.as_slice(), v).map_err(anyhow::Error::from);
        let result = if self.legacy {
            Hamtv0::<_, Ipld>::load_with_bit_width(&self.cid, &reader, self.bit_width)
                .and_then(|hamt| hamt.for_each_cacheless(visit))
        } else {
            Hamt::<_, Ipld>::load_with_bit_width(&self.cid, &reader, self.bit_width)
                .and_then(|hamt| hamt.for_each_cacheless(visit))
        };
        result.map_err(|err| reader.hamt_error(&self.cid, err))
    }

    fn get<BS: Blockstore + ?Sized>(self, store: &BS, key: &[u8]) -> Result<Option<Ipld>, Error> {
        let reader = BlockReader::new(store);
        let key = BytesKey(key.to_vec());
        let result = if self.legacy {
            Hamtv0::<_, Ipld>::load_with_bit_width(&self.cid, &reader, self.bit_width)
                .and_then(|hamt| Ok(hamt.get(&key)?.cloned()))
        } else {
            Hamt::<_, Ipld>::load_with_bit_width(&self.cid, &reader, self.bit_width)
                .and_then(|hamt| Ok(hamt.get(&key)?.cloned()))
        };
        result.map_err(|err| reader.hamt_error(&self.cid, err))
    }
}

fn tree_of<BS: Blockstore + ?Sized>(store: &BS, root: &HamtRoot) -> Result<Tree, Error> {
    let node = Node::load(store, &root.cid)?;
    Ok(Tree {
        cid: root.cid,
        bit_width: root.bit_width,
        legacy: node.legacy,
    })
}

/// Visits every entry of the HAMT.
pub fn for_each<BS, F>(store: &BS, root: &HamtRoot, f: F) -> Result<(), Error>
where
    BS: Blockstore + ?Sized,
    F: FnMut(&[u8], &Ipld) -> Result<(), Error>,
{
    tree_of(store, root)?.for_each(store, f)
}

/// Looks up a single key.
pub fn get<BS: Blockstore + ?Sized>(
    store: &BS,
    root: &HamtRoot,
    key: &[u8],
) -> Result<Option<DeferredCbor>, Error> {
    tree_of(store, root)?
        .get(store, key)?
        .map(|value| DeferredCbor::from_ipld(&root.cid, &value))
        .transpose()
}

/// Diffs two HAMTs. The order of the result is unspecified.
pub fn diff<BS: Blockstore + ?Sized>(
    store: &BS,
    prev: &HamtRoot,
    curr: &HamtRoot,
) -> Result<Vec<MapModification>, Error> {
    if prev.cid == curr.cid {
        return Ok(vec![]);
    }
    let mut out = vec![];
    if prev.options() != curr.options() {
        // Slots do not line up, compare key by key.
        diff_leaves(collect(store, prev)?, collect(store, curr)?, &mut out);
    } else {
        let prev_node = Node::load(store, &prev.cid)?;
        let curr_node = Node::load(store, &curr.cid)?;
        let bit_width = prev.bit_width;
        let (prev_legacy, curr_legacy) = (prev_node.legacy, curr_node.legacy);
        Differ {
            store,
            bit_width,
            prev_legacy,
            curr_legacy,
        }
        .diff_nodes(&prev_node, &curr_node, &mut out)?;
    }
    Ok(out)
}

/// Like [`diff`], with a missing side standing for an actor that does not
/// exist there: every entry of the other side is added or removed.
pub fn diff_opt<BS: Blockstore + ?Sized>(
    store: &BS,
    prev: Option<&HamtRoot>,
    curr: Option<&HamtRoot>,
) -> Result<Vec<MapModification>, Error> {
    match (prev, curr) {
        (Some(prev), Some(curr)) => diff(store, prev, curr),
        (None, Some(curr)) => {
            let mut out = vec![];
            for_each(store, curr, |k, v| {
                out.push(MapModification::added(k.to_vec(), DeferredCbor::from_ipld(&curr.cid, v)?));
                Ok(())
            })?;
            Ok(out)
        }
        (Some(prev), None) => {
            let mut out = vec![];
            for_each(store, prev, |k, v| {
                out.push(MapModification::removed(k.to_vec(), DeferredCbor::from_ipld(&prev.cid, v)?));
                Ok(())
            })?;
            Ok(out)
        }
        (None, None) => Ok(vec![]),
    }
}

struct Differ<'s, BS: ?Sized> {
    store: &'s BS,
    bit_width: u32,
    /// The two sides may differ across the actors v3 migration.
    prev_legacy: bool,
    curr_legacy: bool,
}

impl<BS: Blockstore + ?Sized> Differ<'_, BS> {
    fn diff_nodes(
        &self,
        prev: &Node,
        curr: &Node,
        out: &mut Vec<MapModification>,
    ) -> Result<(), Error> {
        let prev_slots = prev.slots(self.bit_width)?;
        let curr_slots = curr.slots(self.bit_width)?;
        for (p, c) in prev_slots.into_iter().zip(curr_slots) {
            match (p, c) {
                (None, None) => {}
                (Some(Pointer::Link(a)), Some(Pointer::Link(b))) => {
                    if a != b {
                        let prev_child = Node::load(self.store, a)?;
                        let curr_child = Node::load(self.store, b)?;
                        self.diff_nodes(&prev_child, &curr_child, out)?;
                    }
                }
                (Some(p), None) => self.walk(p, &prev.cid, self.prev_legacy, &mut |k, v| {
                    out.push(MapModification::removed(k.to_vec(), v));
                    Ok(())
                })?,
                (None, Some(c)) => self.walk(c, &curr.cid, self.curr_legacy, &mut |k, v| {
                    out.push(MapModification::added(k.to_vec(), v));
                    Ok(())
                })?,
                // a bucket on either side is small, compare the leaves by key
                (Some(p), Some(c)) => {
                    let prev_leaves = self.leaves(p, &prev.cid, self.prev_legacy)?;
                    let curr_leaves = self.leaves(c, &curr.cid, self.curr_legacy)?;
                    diff_leaves(prev_leaves, curr_leaves, out);
                }
            }
        }
        Ok(())
    }

    fn walk(
        &self,
        pointer: &Pointer,
        parent: &Cid,
        legacy: bool,
        f: &mut dyn FnMut(&[u8], DeferredCbor) -> Result<(), Error>,
    ) -> Result<(), Error> {
        match pointer {
            Pointer::Link(cid) => {
                let subtree = Tree {
                    cid: *cid,
                    bit_width: self.bit_width,
                    legacy,
                };
                subtree.for_each(self.store, |k, v| f(k, DeferredCbor::from_ipld(cid, v)?))
            }
            Pointer::Bucket(kvs) => kvs
                .iter()
                .try_for_each(|(k, v)| f(k, DeferredCbor::from_ipld(parent, v)?)),
        }
    }

    fn leaves(
        &self,
        pointer: &Pointer,
        parent: &Cid,
        legacy: bool,
    ) -> Result<BTreeMap<Vec<u8>, DeferredCbor>, Error> {
        let mut leaves = BTreeMap::new();
        self.walk(pointer, parent, legacy, &mut |k, v| {
            leaves.insert(k.to_vec(), v);
            Ok(())
        })?;
        Ok(leaves)
    }
}

fn collect<BS: Blockstore + ?Sized>(
    store: &BS,
    root: &HamtRoot,
) -> Result<BTreeMap<Vec<u8>, DeferredCbor>, Error> {
    let mut entries = BTreeMap::new();
    for_each(store, root, |k, v| {
        entries.insert(k.to_vec(), DeferredCbor::from_ipld(&root.cid, v)?);
        Ok(())
    })?;
    Ok(entries)
}

fn diff_leaves(
    prev: BTreeMap<Vec<u8>, DeferredCbor>,
    mut curr: BTreeMap<Vec<u8>, DeferredCbor>,
    out: &mut Vec<MapModification>,
) {
    for (key, p) in prev {
        match curr.remove(&key) {
            None => out.push(MapModification::removed(key, p)),
            Some(c) if c != p => out.push(MapModification::modified(key, p, c)),
            Some(_) => {}
        }
    }
    out.extend(
        curr.into_iter()
            .map(|(key, c)| MapModification::added(key, c)),
    );
}
