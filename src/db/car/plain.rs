// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fs::File;
use std::io::{self, BufReader, Seek as _, SeekFrom};
use std::path::Path;

use ahash::HashMap;
use anyhow::Context as _;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use positioned_io::ReadAt;
use tracing::debug;

use super::{CarV1Header, read_header, read_varint_body_length_or_eof};

#[derive(Debug, Clone, Copy)]
struct BlockDataLocation {
    offset: u64,
    length: u32,
}

/// Read-only block store backed by an uncompressed CARv1 file.
///
/// Opening the file indexes every block; block data is read on demand.
pub struct PlainCar<ReaderT> {
    reader: ReaderT,
    index: HashMap<Cid, BlockDataLocation>,
    roots: Vec<Cid>,
}

impl PlainCar<File> {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        Self::new(file).with_context(|| format!("cannot index {}", path.display()))
    }
}

impl<ReaderT: ReadAt> PlainCar<ReaderT> {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(reader: ReaderT) -> io::Result<Self> {
        let (roots, index) = {
            let mut cursor = BufReader::with_capacity(1024, positioned_io::Cursor::new(&reader));
            let CarV1Header { roots, version } = read_header(&mut cursor)?;
            if version != 1 || roots.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "header must be CARv1 with non-empty roots",
                ));
            }
            let mut index = HashMap::default();
            while let Some(body_length) = read_varint_body_length_or_eof(&mut cursor)? {
                let frame_body_offset = cursor.stream_position()?;
                let cid = Cid::read_bytes(&mut cursor)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                let block_data_offset = cursor.stream_position()?;
                let next_frame_offset = frame_body_offset + body_length as u64;
                let length = next_frame_offset
                    .checked_sub(block_data_offset)
                    .and_then(|length| u32::try_from(length).ok())
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad frame length"))?;
                index.insert(
                    cid,
                    BlockDataLocation {
                        offset: block_data_offset,
                        length,
                    },
                );
                cursor.seek(SeekFrom::Start(next_frame_offset))?;
            }
            (roots, index)
        };
        debug!(num_blocks = index.len(), "indexed CAR");
        Ok(Self {
            reader,
            index,
            roots,
        })
    }

    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl<ReaderT: ReadAt> Blockstore for PlainCar<ReaderT> {
    #[tracing::instrument(level = "trace", skip(self))]
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        match self.index.get(k) {
            Some(BlockDataLocation { offset, length }) => {
                let mut data = vec![0; *length as usize];
                self.reader.read_exact_at(*offset, &mut data)?;
                Ok(Some(data))
            }
            None => Ok(None),
        }
    }

    fn put_keyed(&self, k: &Cid, _block: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("cannot write {k}: CAR-backed store is read-only")
    }

    fn has(&self, k: &Cid) -> anyhow::Result<bool> {
        Ok(self.index.contains_key(k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CborStoreExt as _, MemoryDB, car::write_dag};

    #[test]
    fn serves_blocks_from_file() {
        let store = MemoryDB::default();
        let leaf = store.put_cbor_default(&vec![1u8, 2, 3]).unwrap();
        let root = store.put_cbor_default(&(leaf, 7u64)).unwrap();
        let mut car = vec![];
        write_dag(&mut car, &store, root).unwrap();

        let mut file = tempfile::tempfile().unwrap();
        std::io::Write::write_all(&mut file, &car).unwrap();
        let plain = PlainCar::new(file).unwrap();
        assert_eq!(plain.roots(), &[root]);
        assert_eq!(plain.len(), 2);
        assert_eq!(plain.get(&leaf).unwrap(), store.get(&leaf).unwrap());
        assert_eq!(plain.get(&root).unwrap(), store.get(&root).unwrap());
        assert!(plain.get(&Cid::default()).unwrap().is_none());
        assert!(plain.put_keyed(&leaf, &[]).is_err());
    }
}
