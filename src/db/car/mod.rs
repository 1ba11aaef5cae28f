// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! CARv1 reading and writing.
//!
//! A CARv1 file is a varint-framed DAG-CBOR header `{roots, version}` followed by
//! varint-framed `(cid, block)` records.
//! See <https://ipld.io/specs/transport/car/carv1/>.

mod plain;

pub use plain::PlainCar;

use std::io::{self, Read, Write};

use ahash::{HashSet, HashSetExt as _};
use anyhow::{Context as _, ensure};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::DAG_CBOR;
use integer_encoding::{VarInt, VarIntReader};
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::MemoryDB;
use crate::utils::multihash::prelude::*;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CarV1Header {
    // The roots array must contain one or more CIDs,
    // each of which should be present somewhere in the remainder of the CAR.
    // See <https://ipld.io/specs/transport/car/carv1/#constraints>
    pub roots: Vec<Cid>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarBlock {
    pub cid: Cid,
    pub data: Vec<u8>,
}

impl CarBlock {
    // Write a varint frame containing the cid and the data
    pub fn write(&self, mut writer: &mut impl Write) -> io::Result<()> {
        let frame_length = self.cid.encoded_len() + self.data.len();
        writer.write_all(&frame_length.encode_var_vec())?;
        self.cid
            .write_bytes(&mut writer)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.write_all(&self.data)?;
        Ok(())
    }

    pub fn from_bytes(bytes: &[u8]) -> io::Result<CarBlock> {
        let mut cursor = io::Cursor::new(bytes);
        let cid =
            Cid::read_bytes(&mut cursor).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let offset = usize::try_from(cursor.position())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(CarBlock {
            cid,
            data: bytes[offset..].to_vec(),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let actual = {
            let code = MultihashCode::try_from(self.cid.hash().code())?;
            Cid::new_v1(self.cid.codec(), code.digest(&self.data))
        };
        ensure!(
            actual == self.cid,
            "CID/Block mismatch for block {}, actual: {actual}",
            self.cid
        );
        Ok(())
    }
}

pub(crate) fn write_header(writer: &mut impl Write, roots: Vec<Cid>) -> anyhow::Result<()> {
    let header = fvm_ipld_encoding::to_vec(&CarV1Header { roots, version: 1 })?;
    writer.write_all(&header.len().encode_var_vec())?;
    writer.write_all(&header)?;
    Ok(())
}

pub(crate) fn read_header(mut reader: impl Read) -> io::Result<CarV1Header> {
    let header_len = read_varint_body_length_or_eof(&mut reader)?
        .ok_or(io::Error::from(io::ErrorKind::UnexpectedEof))?;
    let mut buffer = vec![0; header_len];
    reader.read_exact(&mut buffer)?;
    fvm_ipld_encoding::from_slice(&buffer).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Returns [`None`] at a clean end of stream.
pub(crate) fn read_varint_body_length_or_eof(mut reader: impl Read) -> io::Result<Option<usize>> {
    let mut byte = [0u8; 1]; // detect EOF
    match reader.read(&mut byte)? {
        0 => Ok(None),
        _ => (&byte[..]).chain(reader).read_varint().map(Some),
    }
}

/// Writes a single-root CAR holding every block of the DAG under `root` that
/// `store` contains.
///
/// Blocks are emitted depth-first in first-seen order, so the same DAG always
/// produces the same bytes. Links to blocks `store` does not hold (references
/// into the chain, identity-hashed code CIDs) are not followed.
pub fn write_dag(
    mut writer: impl Write,
    store: &impl Blockstore,
    root: Cid,
) -> anyhow::Result<usize> {
    write_header(&mut writer, vec![root])?;
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    let mut written = 0;
    while let Some(cid) = stack.pop() {
        if !seen.insert(cid) {
            continue;
        }
        let Some(data) = store.get(&cid)? else {
            ensure!(cid != root, "root {root} is not in the store");
            continue;
        };
        if cid.codec() == DAG_CBOR {
            let ipld: Ipld = fvm_ipld_encoding::from_slice(&data)
                .with_context(|| format!("block {cid} is not valid DAG-CBOR"))?;
            let mut links = vec![];
            collect_links(&ipld, &mut links);
            stack.extend(links.into_iter().rev());
        }
        CarBlock { cid, data }.write(&mut writer)?;
        written += 1;
    }
    writer.flush()?;
    debug!(%root, blocks = written, "wrote CAR");
    Ok(written)
}

fn collect_links(ipld: &Ipld, links: &mut Vec<Cid>) {
    match ipld {
        Ipld::Link(cid) => links.push(*cid),
        Ipld::List(items) => items.iter().for_each(|item| collect_links(item, links)),
        Ipld::Map(entries) => entries.values().for_each(|item| collect_links(item, links)),
        _ => {}
    }
}

/// Loads a single-root CAR into memory, validating every block.
pub fn read_car(mut reader: impl Read) -> anyhow::Result<(Cid, MemoryDB)> {
    let CarV1Header { roots, version } = read_header(&mut reader)?;
    ensure!(version == 1, "unsupported CAR version {version}");
    let [root] = roots.as_slice() else {
        anyhow::bail!("expected exactly one root, found {}", roots.len());
    };
    let db = MemoryDB::default();
    while let Some(body_length) = read_varint_body_length_or_eof(&mut reader)? {
        let mut body = vec![0; body_length];
        reader.read_exact(&mut body)?;
        let block = CarBlock::from_bytes(&body)?;
        block.validate()?;
        db.put_keyed(&block.cid, &block.data)?;
    }
    ensure!(db.has(root)?, "root {root} is missing from the CAR");
    Ok((*root, db))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CborStoreExt as _;

    #[test]
    fn dag_round_trip() {
        let store = MemoryDB::default();
        let leaf = store.put_cbor_default(&"leaf").unwrap();
        let other = store.put_cbor_default(&42u64).unwrap();
        // `absent` is referenced but never stored
        let absent = MemoryDB::default().put_cbor_default(&"elsewhere").unwrap();
        let mid = store.put_cbor_default(&(leaf, absent)).unwrap();
        let root = store.put_cbor_default(&(mid, other, leaf)).unwrap();
        // not reachable from root
        store.put_cbor_default(&"garbage").unwrap();

        let mut car = vec![];
        assert_eq!(write_dag(&mut car, &store, root).unwrap(), 4);

        let (read_root, db) = read_car(car.as_slice()).unwrap();
        assert_eq!(read_root, root);
        assert_eq!(db.len(), 4);
        for cid in [root, mid, leaf, other] {
            assert_eq!(db.get(&cid).unwrap(), store.get(&cid).unwrap());
        }

        let mut again = vec![];
        write_dag(&mut again, &store, root).unwrap();
        assert_eq!(car, again);
    }

    #[test]
    fn rejects_tampered_blocks() {
        let store = MemoryDB::default();
        let root = store.put_cbor_default(&"hello").unwrap();
        let mut car = vec![];
        write_dag(&mut car, &store, root).unwrap();
        let last = car.len() - 1;
        car[last] ^= 0xff;
        assert!(read_car(car.as_slice()).is_err());
    }

    #[test]
    fn requires_single_root() {
        let mut car = vec![];
        write_header(&mut car, vec![]).unwrap();
        assert!(read_car(car.as_slice()).is_err());
    }
}
