// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::num::NonZeroUsize;
use std::str::FromStr;

use anyhow::Context as _;
use base64::{Engine as _, prelude::BASE64_STANDARD};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use http::{HeaderMap, HeaderValue, header};
use jsonrpsee::core::ClientError;
use jsonrpsee::core::client::ClientT as _;
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

use super::DataSource;
use crate::blocks::{Tipset, TipsetKey};
use crate::db::CachingBlockstore;
use crate::error::Error;
use crate::networks::UpgradeSchedule;
use crate::shim::address::Address;
use crate::shim::clock::ChainEpoch;
use crate::shim::econ::TokenAmount;
use crate::shim::state_tree::ActorState;

pub const CHAIN_READ_OBJ: &str = "Filecoin.ChainReadObj";
pub const CHAIN_HEAD: &str = "Filecoin.ChainHead";
pub const CHAIN_GET_TIPSET_BY_HEIGHT: &str = "Filecoin.ChainGetTipSetByHeight";
pub const STATE_GET_ACTOR: &str = "Filecoin.StateGetActor";
pub const STATE_NETWORK_NAME: &str = "Filecoin.StateNetworkName";
pub const STATE_NETWORK_VERSION: &str = "Filecoin.StateNetworkVersion";

/// `{"/": "bafy..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CidLotusJson {
    #[serde(rename = "/", with = "stringify")]
    slash: Cid,
}

impl From<Cid> for CidLotusJson {
    fn from(slash: Cid) -> Self {
        Self { slash }
    }
}

/// The part of a Lotus tipset this crate reads; headers are then fetched as
/// blocks so they keep their exact encoding.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TipsetLotusJson {
    cids: Vec<CidLotusJson>,
}

impl TipsetLotusJson {
    fn key(self) -> TipsetKey {
        TipsetKey::new(self.cids.into_iter().map(|c| c.slash).collect())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ActorLotusJson {
    code: CidLotusJson,
    head: CidLotusJson,
    nonce: u64,
    #[serde(with = "stringify")]
    balance: fvm_shared4::bigint::BigInt,
    #[serde(default)]
    delegated_address: Option<String>,
}

impl ActorLotusJson {
    fn into_actor(self) -> anyhow::Result<ActorState> {
        let mut actor = ActorState::new(
            self.code.slash,
            self.head.slash,
            TokenAmount::from_atto(self.balance),
            self.nonce,
        );
        actor.delegated_address = self
            .delegated_address
            .map(|address| Address::from_str(&address))
            .transpose()
            .context("invalid delegated address")?;
        Ok(actor)
    }
}

/// Usage: `#[serde(with = "stringify")]`
mod stringify {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize as _, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Display,
        S: Serializer,
    {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

fn key_json(key: &TipsetKey) -> Vec<CidLotusJson> {
    key.cids().iter().copied().map(CidLotusJson::from).collect()
}

fn is_not_found(err: &ClientError) -> bool {
    matches!(err, ClientError::Call(call) if call.message().contains("not found"))
}

/// Synchronous JSON-RPC calls, bridged onto a tokio runtime.
#[derive(Clone)]
struct Client {
    inner: HttpClient,
    handle: Handle,
}

impl Client {
    fn new(url: &Url, token: Option<&str>, handle: Handle) -> anyhow::Result<Self> {
        let headers = match token {
            Some(token) => HeaderMap::from_iter([(
                header::AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .context("invalid authorization token")?,
            )]),
            None => HeaderMap::new(),
        };
        let inner = match url.scheme() {
            "http" | "https" => HttpClientBuilder::default()
                .set_headers(headers)
                .build(url.as_str())?,
            scheme => anyhow::bail!("unsupported URL scheme: {scheme}"),
        };
        Ok(Self { inner, handle })
    }

    fn call<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: impl IntoIterator<Item = serde_json::Value>,
    ) -> Result<R, ClientError> {
        let mut array = ArrayParams::new();
        for param in params {
            array.insert(param)?;
        }
        debug!(method, "rpc call");
        self.handle.block_on(self.inner.request(method, array))
    }

    fn request<R: DeserializeOwned>(
        &self,
        method: &'static str,
        params: impl IntoIterator<Item = serde_json::Value>,
    ) -> Result<R, Error> {
        self.call(method, params)
            .map_err(|e| Error::Upstream(anyhow::Error::new(e).context(method)))
    }
}

fn json(value: impl Serialize) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Reads blocks with `ChainReadObj`.
pub struct RpcBlockstore {
    client: Client,
}

impl Blockstore for RpcBlockstore {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        match self
            .client
            .call::<String>(CHAIN_READ_OBJ, [json(CidLotusJson::from(*k))])
        {
            Ok(encoded) => Ok(Some(
                BASE64_STANDARD
                    .decode(encoded)
                    .with_context(|| format!("block {k} is not base64"))?,
            )),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context(CHAIN_READ_OBJ)),
        }
    }

    fn put_keyed(&self, k: &Cid, _block: &[u8]) -> anyhow::Result<()> {
        anyhow::bail!("cannot write {k}: the node store is read-only")
    }
}

/// A Lotus-compatible node reached over HTTP JSON-RPC.
pub struct RpcDataSource {
    client: Client,
    store: CachingBlockstore<RpcBlockstore>,
    upgrades: UpgradeSchedule,
}

impl RpcDataSource {
    /// Must not be called from within the runtime behind `handle`.
    pub fn new(
        url: &Url,
        token: Option<&str>,
        handle: Handle,
        cache_size: usize,
        upgrades: UpgradeSchedule,
    ) -> anyhow::Result<Self> {
        let client = Client::new(url, token, handle)?;
        let store = CachingBlockstore::new(
            RpcBlockstore {
                client: client.clone(),
            },
            NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
        );
        Ok(Self {
            client,
            store,
            upgrades,
        })
    }
}

impl DataSource for RpcDataSource {
    type Store = CachingBlockstore<RpcBlockstore>;

    fn store(&self) -> &Self::Store {
        &self.store
    }

    fn upgrades(&self) -> &UpgradeSchedule {
        &self.upgrades
    }

    fn head(&self) -> Result<Tipset, Error> {
        let head: TipsetLotusJson = self.client.request(CHAIN_HEAD, [])?;
        self.tipset(&head.key())
    }

    fn tipset_by_height(&self, height: ChainEpoch) -> Result<Tipset, Error> {
        let tipset: TipsetLotusJson = self.client.request(
            CHAIN_GET_TIPSET_BY_HEIGHT,
            [json(height), serde_json::Value::Null],
        )?;
        self.tipset(&tipset.key())
    }

    fn network_name(&self) -> Result<String, Error> {
        self.client.request(STATE_NETWORK_NAME, [])
    }

    fn network_version(&self, key: &TipsetKey) -> Result<u32, Error> {
        self.client
            .request(STATE_NETWORK_VERSION, [json(key_json(key))])
    }

    fn actor(&self, address: &Address, key: &TipsetKey) -> Result<Option<ActorState>, Error> {
        let actor = self.client.call::<Option<ActorLotusJson>>(
            STATE_GET_ACTOR,
            [json(address.to_string()), json(key_json(key))],
        );
        match actor {
            Ok(actor) => actor
                .map(ActorLotusJson::into_actor)
                .transpose()
                .map_err(Error::Upstream),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(Error::Upstream(
                anyhow::Error::new(e).context(STATE_GET_ACTOR),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::utils::cid::CidCborExt as _;

    #[test]
    fn cid_json() {
        let cid = Cid::from_cbor_blake2b256(&"block").unwrap();
        let value = json(CidLotusJson::from(cid));
        assert_eq!(value, serde_json::json!({ "/": cid.to_string() }));
        let back: CidLotusJson = serde_json::from_value(value).unwrap();
        assert_eq!(back.slash, cid);
    }

    #[test]
    fn tipset_json_keeps_block_order() {
        let a = Cid::from_cbor_blake2b256(&"a").unwrap();
        let b = Cid::from_cbor_blake2b256(&"b").unwrap();
        let tipset: TipsetLotusJson = serde_json::from_value(serde_json::json!({
            "Cids": [{ "/": a.to_string() }, { "/": b.to_string() }],
            "Blocks": [],
            "Height": 10,
        }))
        .unwrap();
        assert_eq!(tipset.key(), TipsetKey::new(vec![a, b]));
    }

    #[test]
    fn actor_json() {
        let code = Cid::from_cbor_blake2b256(&"code").unwrap();
        let head = Cid::from_cbor_blake2b256(&"head").unwrap();
        let actor: ActorLotusJson = serde_json::from_value(serde_json::json!({
            "Code": { "/": code.to_string() },
            "Head": { "/": head.to_string() },
            "Nonce": 3,
            "Balance": "1000000000000000000000",
            "DelegatedAddress": null,
        }))
        .unwrap();
        let actor = actor.into_actor().unwrap();
        assert_eq!(actor.code, code);
        assert_eq!(actor.state, head);
        assert_eq!(actor.sequence, 3);
        assert_eq!(actor.balance, TokenAmount::from_whole(1000));
        assert_eq!(actor.delegated_address, None);
    }

    #[test]
    fn rejects_unsupported_schemes() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let url = Url::parse("ftp://localhost:1234").unwrap();
        assert!(Client::new(&url, Some("token"), runtime.handle().clone()).is_err());
    }
}
