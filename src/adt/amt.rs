// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use cid::Cid;
use fvm_ipld_amt::{Amt, Amtv0};
use fvm_ipld_blockstore::Blockstore;
use ipld_core::ipld::Ipld;

use super::store::BlockReader;
use super::{ArrayModification, ChangeKind};
use crate::error::Error;
use crate::utils::encoding::{DeferredCbor, ipld_kind, load_block};

/// Bit width of every legacy AMT, which does not record it in the root.
pub const LEGACY_BIT_WIDTH: u32 = 3;

const MAX_BIT_WIDTH: u32 = 18;

/// Root layout of an AMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmtVersion {
    /// `[height, count, node]`
    V0,
    /// `[bit_width, height, count, node]`
    V3,
}

/// An AMT root together with the layout needed to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmtRoot {
    pub cid: Cid,
    pub version: AmtVersion,
    pub bit_width: u32,
}

impl AmtRoot {
    pub const fn legacy(cid: Cid) -> Self {
        Self {
            cid,
            version: AmtVersion::V0,
            bit_width: LEGACY_BIT_WIDTH,
        }
    }

    pub const fn new(cid: Cid, bit_width: u32) -> Self {
        Self {
            cid,
            version: AmtVersion::V3,
            bit_width,
        }
    }
}

/// Shape of an AMT as declared by its root block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    bit_width: u32,
    height: u32,
}

impl Header {
    /// Reads the root block and checks it against the expected layout.
    ///
    /// Every index of the tree must fit in 64 bits, otherwise node offsets
    /// would overflow while walking it.
    fn load<BS: Blockstore + ?Sized>(store: &BS, root: &AmtRoot) -> Result<Self, Error> {
        let malformed = |reason: String| Error::malformed(root.cid, reason);
        let fields = match load_block::<_, Ipld>(store, &root.cid)? {
            Ipld::List(fields) => fields,
            other => {
                return Err(malformed(format!(
                    "AMT root must be a list, found {}",
                    ipld_kind(&other)
                )));
            }
        };
        let (bit_width, height) = match (root.version, fields.as_slice()) {
            (AmtVersion::V3, [bit_width, height, _count, _node]) => {
                (as_u32(bit_width), as_u32(height))
            }
            (AmtVersion::V0, [height, _count, _node]) => (Some(LEGACY_BIT_WIDTH), as_u32(height)),
            (version, fields) => {
                return Err(malformed(format!(
                    "unexpected {version:?} AMT root layout with {} fields",
                    fields.len()
                )));
            }
        };
        let (Some(bit_width), Some(height)) = (bit_width, height) else {
            return Err(malformed("AMT bit width and height must be integers".into()));
        };
        if bit_width != root.bit_width {
            return Err(malformed(format!(
                "AMT has bit width {bit_width}, expected {}",
                root.bit_width
            )));
        }
        let index_bits = u64::from(bit_width) * (u64::from(height) + 1);
        if bit_width == 0 || bit_width > MAX_BIT_WIDTH || index_bits > u64::from(u64::BITS) {
            return Err(malformed(format!(
                "unsupported AMT shape: bit width {bit_width}, height {height}"
            )));
        }
        Ok(Self { bit_width, height })
    }
}

fn as_u32(ipld: &Ipld) -> Option<u32> {
    match ipld {
        Ipld::Integer(i) => u32::try_from(*i).ok(),
        _ => None,
    }
}

/// Visits every element of the AMT in index order.
pub fn for_each<BS, F>(store: &BS, root: &AmtRoot, mut f: F) -> Result<(), Error>
where
    BS: Blockstore + ?Sized,
    F: FnMut(u64, &Ipld) -> Result<(), Error>,
{
    Header::load(store, root)?;
    let reader = BlockReader::new(store);
    let visit = |i: u64, v: &Ipld| f(i, v).map_err(anyhow::Error::from);
    let result = match root.version {
        AmtVersion::V0 => Amtv0::<Ipld, _>::load(&root.cid, &reader)
            .and_then(|amt| amt.for_each_cacheless(visit)),
        AmtVersion::V3 => Amt::<Ipld, _>::load(&root.cid, &reader)
            .and_then(|amt| amt.for_each_cacheless(visit)),
    };
    result.map_err(|err| reader.amt_error(&root.cid, err))
}

/// Diffs two AMTs. The order of the result is unspecified.
pub fn diff<BS: Blockstore + ?Sized>(
    store: &BS,
    prev: &AmtRoot,
    curr: &AmtRoot,
) -> Result<Vec<ArrayModification>, Error> {
    if prev.cid == curr.cid {
        return Ok(vec![]);
    }
    let prev_header = Header::load(store, prev)?;
    let curr_header = Header::load(store, curr)?;
    // `fvm_ipld_amt::diff` reads a single layout and bit width, and misses the
    // shorter tree when the taller one has no first child. Everything else is
    // compared element by element.
    let aligned = prev.version == AmtVersion::V3
        && curr.version == AmtVersion::V3
        && prev_header == curr_header;
    if aligned {
        diff_aligned(store, prev, curr)
    } else {
        diff_by_scan(store, prev, curr)
    }
}

fn diff_aligned<BS: Blockstore + ?Sized>(
    store: &BS,
    prev: &AmtRoot,
    curr: &AmtRoot,
) -> Result<Vec<ArrayModification>, Error> {
    let reader = BlockReader::new(store);
    let prev_amt = Amt::<Ipld, _>::load(&prev.cid, &reader)
        .map_err(|err| reader.amt_error(&prev.cid, err))?;
    let curr_amt = Amt::<Ipld, _>::load(&curr.cid, &reader)
        .map_err(|err| reader.amt_error(&curr.cid, err))?;
    let changes = fvm_ipld_amt::diff(&prev_amt, &curr_amt)
        .map_err(|err| reader.dynamic_error(&prev.cid, err))?;
    let mut out = Vec::with_capacity(changes.len());
    for change in changes {
        let previous = change
            .before
            .map(|v| DeferredCbor::from_ipld(&prev.cid, &v))
            .transpose()?;
        let current = change
            .after
            .map(|v| DeferredCbor::from_ipld(&curr.cid, &v))
            .transpose()?;
        if let Some(kind) = ChangeKind::between(previous.as_ref(), current.as_ref()) {
            out.push(ArrayModification {
                index: change.key,
                kind,
                previous,
                current,
            });
        }
    }
    Ok(out)
}

/// Like [`diff`], with a missing side standing for an actor that does not
/// exist there: every element of the other side is added or removed.
pub fn diff_opt<BS: Blockstore + ?Sized>(
    store: &BS,
    prev: Option<&AmtRoot>,
    curr: Option<&AmtRoot>,
) -> Result<Vec<ArrayModification>, Error> {
    match (prev, curr) {
        (Some(prev), Some(curr)) => diff(store, prev, curr),
        (None, Some(curr)) => {
            let mut out = vec![];
            for_each(store, curr, |i, v| {
                out.push(ArrayModification::added(i, DeferredCbor::from_ipld(&curr.cid, v)?));
                Ok(())
            })?;
            Ok(out)
        }
        (Some(prev), None) => {
            let mut out = vec![];
            for_each(store, prev, |i, v| {
                out.push(ArrayModification::removed(i, DeferredCbor::from_ipld(&prev.cid, v)?));
                Ok(())
            })?;
            Ok(out)
        }
        (None, None) => Ok(vec![]),
    }
}

fn diff_by_scan<BS: Blockstore + ?Sized>(
    store: &BS,
    prev: &AmtRoot,
    curr: &AmtRoot,
) -> Result<Vec<ArrayModification>, Error> {
    let mut out = vec![];
    let mut prev_values = BTreeMap::new();
    for_each(store, prev, |i, v| {
        prev_values.insert(i, DeferredCbor::from_ipld(&prev.cid, v)?);
        Ok(())
    })?;
    for_each(store, curr, |i, v| {
        let c = DeferredCbor::from_ipld(&curr.cid, v)?;
        match prev_values.remove(&i) {
            None => out.push(ArrayModification::added(i, c)),
            Some(p) if p != c => out.push(ArrayModification::modified(i, p, c)),
            Some(_) => {}
        }
        Ok(())
    })?;
    out.extend(
        prev_values
            .into_iter()
            .map(|(i, p)| ArrayModification::removed(i, p)),
    );
    Ok(out)
}
