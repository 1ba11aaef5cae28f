// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fmt;

use cid::Cid;
use fvm_ipld_encoding::{de::DeserializeOwned, strict_bytes};
use ipld_core::ipld::Ipld;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A CBOR value kept in its encoded form until a caller asks for it.
///
/// Persisted as a CBOR byte string holding the encoded value.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeferredCbor(#[serde(with = "strict_bytes")] Vec<u8>);

impl DeferredCbor {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Re-encodes a decoded value. `origin` names the block it came from.
    pub fn from_ipld(origin: &Cid, ipld: &Ipld) -> Result<Self, Error> {
        fvm_ipld_encoding::to_vec(ipld)
            .map(Self)
            .map_err(|e| Error::malformed(*origin, e))
    }

    pub fn encode<T: Serialize>(value: &T) -> Result<Self, Error> {
        fvm_ipld_encoding::to_vec(value)
            .map(Self)
            .map_err(|e| Error::Unreachable(format!("value does not encode: {e}")))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the value as `T`. `origin` names the collection the value belongs to.
    pub fn decode_as<T: DeserializeOwned>(&self, origin: &Cid) -> Result<T, Error> {
        fvm_ipld_encoding::from_slice(&self.0).map_err(|e| Error::malformed(*origin, e))
    }
}

impl fmt::Debug for DeferredCbor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeferredCbor(0x{})", hex::encode(&self.0))
    }
}

/// Decodes a value that was read as generic [`Ipld`].
pub fn from_ipld<T: DeserializeOwned>(origin: &Cid, ipld: &Ipld) -> Result<T, Error> {
    DeferredCbor::from_ipld(origin, ipld)?.decode_as(origin)
}

/// Reads a block from the store and decodes it as `T`.
pub fn load_block<BS, T>(store: &BS, cid: &Cid) -> Result<T, Error>
where
    BS: fvm_ipld_blockstore::Blockstore + ?Sized,
    T: DeserializeOwned,
{
    let bytes = load_raw(store, cid)?;
    fvm_ipld_encoding::from_slice(&bytes).map_err(|e| Error::malformed(*cid, e))
}

/// Reads the bytes of a block, failing when the block is absent.
pub fn load_raw<BS>(store: &BS, cid: &Cid) -> Result<Vec<u8>, Error>
where
    BS: fvm_ipld_blockstore::Blockstore + ?Sized,
{
    store
        .get(cid)
        .map_err(Error::from_store)?
        .ok_or(Error::StoreMissingBlock(*cid))
}

/// Reads a CBOR list and returns its elements.
pub fn load_fields<BS>(store: &BS, cid: &Cid) -> Result<Vec<Ipld>, Error>
where
    BS: fvm_ipld_blockstore::Blockstore + ?Sized,
{
    match load_block::<_, Ipld>(store, cid)? {
        Ipld::List(fields) => Ok(fields),
        other => Err(Error::malformed(
            *cid,
            format!("expected a list, found {}", ipld_kind(&other)),
        )),
    }
}

pub fn ipld_kind(ipld: &Ipld) -> &'static str {
    match ipld {
        Ipld::Null => "null",
        Ipld::Bool(_) => "bool",
        Ipld::Integer(_) => "integer",
        Ipld::Float(_) => "float",
        Ipld::String(_) => "string",
        Ipld::Bytes(_) => "bytes",
        Ipld::List(_) => "list",
        Ipld::Map(_) => "map",
        Ipld::Link(_) => "link",
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{CborStoreExt as _, MemoryDB};

    use super::*;

    #[test]
    fn deferred_keeps_encoding() {
        let value = (7u64, "deal".to_string());
        let deferred = DeferredCbor::encode(&value).unwrap();
        assert_eq!(deferred.bytes(), fvm_ipld_encoding::to_vec(&value).unwrap());
        let decoded: (u64, String) = deferred.decode_as(&Cid::default()).unwrap();
        assert_eq!(decoded, value);

        // nested as a byte string
        let wrapped = fvm_ipld_encoding::to_vec(&deferred).unwrap();
        let back: DeferredCbor = fvm_ipld_encoding::from_slice(&wrapped).unwrap();
        assert_eq!(back, deferred);
    }

    #[test]
    fn missing_and_malformed_blocks() {
        let store = MemoryDB::default();
        let cid = store.put_cbor_default(&42u64).unwrap();
        assert!(matches!(
            load_fields(&store, &cid),
            Err(Error::MalformedBlock { .. })
        ));
        let unknown = store.put_cbor_default(&(1u8, 2u8)).unwrap();
        assert_eq!(load_fields(&store, &unknown).unwrap().len(), 2);
        let absent = Cid::default();
        assert!(matches!(
            load_raw(&store, &absent),
            Err(Error::StoreMissingBlock(_))
        ));
    }
}
