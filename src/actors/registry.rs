// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeMap;

use ahash::HashMap;
use anyhow::{Context as _, ensure};
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use itertools::Itertools as _;

use crate::utils::cid::CidCborExt as _;
use crate::utils::encoding::load_block;

/// Builtin actor types, named as they appear in bundle manifests.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinActor {
    System,
    Init,
    Cron,
    Account,
    #[strum(serialize = "storagepower")]
    Power,
    #[strum(serialize = "storageminer")]
    Miner,
    #[strum(serialize = "storagemarket")]
    Market,
    PaymentChannel,
    Multisig,
    Reward,
    #[strum(serialize = "verifiedregistry")]
    VerifiedRegistry,
    DataCap,
    Placeholder,
    Evm,
    Eam,
    EthAccount,
}

impl BuiltinActor {
    pub fn name(self) -> &'static str {
        self.into()
    }
}

// Keeps the list in step with the enum.
macro_rules! exhaustive {
    ($vis:vis const $ident:ident: &[$ty:ty] = &[$($variant:path),* $(,)?];) => {
        $vis const $ident: &[$ty] = &[$($variant,)*];
        const _: () = {
            fn check_exhaustive(it: $ty) {
                match it {
                    $(
                        $variant => {},
                    )*
                }
            }
        };
    }
}

exhaustive! {
    const ALL_BUILTINS: &[BuiltinActor] = &[
        BuiltinActor::System,
        BuiltinActor::Init,
        BuiltinActor::Cron,
        BuiltinActor::Account,
        BuiltinActor::Power,
        BuiltinActor::Miner,
        BuiltinActor::Market,
        BuiltinActor::PaymentChannel,
        BuiltinActor::Multisig,
        BuiltinActor::Reward,
        BuiltinActor::VerifiedRegistry,
        BuiltinActor::DataCap,
        BuiltinActor::Placeholder,
        BuiltinActor::Evm,
        BuiltinActor::Eam,
        BuiltinActor::EthAccount,
    ];
}

/// Actors that existed before code CIDs came from bundles.
const LEGACY_BUILTINS: &[BuiltinActor] = &[
    BuiltinActor::System,
    BuiltinActor::Init,
    BuiltinActor::Cron,
    BuiltinActor::Account,
    BuiltinActor::Power,
    BuiltinActor::Miner,
    BuiltinActor::Market,
    BuiltinActor::PaymentChannel,
    BuiltinActor::Multisig,
    BuiltinActor::Reward,
    BuiltinActor::VerifiedRegistry,
];

/// Actor versions whose code CIDs are identity hashes of their names, with
/// the number used in those names. Version 1 was never released.
const LEGACY_VERSIONS: &[(u64, u64)] = &[(0, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6), (7, 7)];

/// Code CID of a builtin actor released before bundles.
pub fn legacy_code(builtin: BuiltinActor, name_version: u64) -> Cid {
    Cid::identity_raw(format!("fil/{name_version}/{}", builtin.name()).as_bytes())
}

/// Maps actor code CIDs to their builtin type and actor version.
///
/// Built once at startup and shared read-only by every diff task.
#[derive(Debug, Clone, Default)]
pub struct ActorRegistry {
    by_code: HashMap<Cid, (BuiltinActor, u64)>,
}

impl ActorRegistry {
    /// A registry holding the code CIDs of actor versions 0 to 7.
    pub fn legacy() -> Self {
        let mut registry = Self::default();
        for &(version, name_version) in LEGACY_VERSIONS {
            for &builtin in LEGACY_BUILTINS {
                registry.register(legacy_code(builtin, name_version), builtin, version);
            }
        }
        registry
    }

    pub fn register(&mut self, code: Cid, builtin: BuiltinActor, version: u64) {
        self.by_code.insert(code, (builtin, version));
    }

    /// Registers every actor of a bundle manifest `(manifest version, actor list)`.
    pub fn register_manifest(
        &mut self,
        store: &impl Blockstore,
        version: u64,
        manifest: &Cid,
    ) -> anyhow::Result<()> {
        let (manifest_version, actor_list_cid) = load_block::<_, (u32, Cid)>(store, manifest)
            .with_context(|| format!("failed to load manifest {manifest}"))?;
        ensure!(
            manifest_version == 1,
            "unsupported manifest version {}",
            manifest_version
        );
        let mut actor_list = load_block::<_, Vec<(String, Cid)>>(store, &actor_list_cid)
            .context("failed to load actor list")?;
        actor_list.sort();
        ensure!(
            actor_list.iter().map(|(name, _cid)| name).all_unique(),
            "duplicate actor name in actor list"
        );
        let mut name2cid = BTreeMap::from_iter(actor_list);
        for &builtin in ALL_BUILTINS {
            if let Some(cid) = name2cid.remove(builtin.name()) {
                self.register(cid, builtin, version);
            }
        }
        if !name2cid.is_empty() {
            tracing::warn!("unknown actors in list: [{}]", name2cid.keys().join(", "))
        }
        Ok(())
    }

    pub fn lookup(&self, code: &Cid) -> Option<(BuiltinActor, u64)> {
        self.by_code.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
