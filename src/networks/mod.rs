// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::LazyLock;

use cid::Cid;
use serde::{Deserialize, Serialize};

use crate::shim::clock::ChainEpoch;

pub mod mainnet;

/// Newest network version whose actor version is known.
pub const NEWEST_NETWORK_VERSION: u32 = 26;

/// Defines the meaningful heights of the protocol.
#[derive(
    Debug, Default, strum::Display, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash,
)]
pub enum Height {
    #[default]
    Breeze,
    Smoke,
    Ignition,
    ActorsV2,
    Tape,
    Liftoff,
    Kumquat,
    Calico,
    Persian,
    Orange,
    Trust,
    Norwegian,
    Turbo,
    Hyperdrive,
    Chocolate,
    OhSnap,
    Skyr,
    Shark,
    Hygge,
    Lightning,
    Thunder,
    Watermelon,
    Dragon,
    Waffle,
    TukTuk,
    Teep,
    Tock,
}

impl Height {
    /// Network version that starts after this upgrade.
    pub fn network_version(self) -> u32 {
        match self {
            Height::Breeze => 1,
            Height::Smoke => 2,
            Height::Ignition => 3,
            Height::ActorsV2 => 4,
            Height::Tape | Height::Liftoff => 5,
            Height::Kumquat => 6,
            Height::Calico => 7,
            Height::Persian => 8,
            Height::Orange => 9,
            Height::Trust => 10,
            Height::Norwegian => 11,
            Height::Turbo => 12,
            Height::Hyperdrive => 13,
            Height::Chocolate => 14,
            Height::OhSnap => 15,
            Height::Skyr => 16,
            Height::Shark => 17,
            Height::Hygge => 18,
            Height::Lightning => 19,
            Height::Thunder => 20,
            Height::Watermelon => 21,
            Height::Dragon => 22,
            Height::Waffle => 23,
            Height::TukTuk => 24,
            Height::Teep => 25,
            Height::Tock => 26,
        }
    }
}

#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HeightInfo {
    pub height: Height,
    pub epoch: ChainEpoch,
}

/// A network upgrade: from the epoch after `height`, the chain runs `version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upgrade {
    pub height: ChainEpoch,
    pub version: u32,
}

impl From<&HeightInfo> for Upgrade {
    fn from(info: &HeightInfo) -> Self {
        Self {
            height: info.epoch,
            version: info.height.network_version(),
        }
    }
}

/// Upgrade schedule of a network, used to derive network versions from
/// epochs when the data source cannot ask a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeSchedule {
    upgrades: Vec<Upgrade>,
}

impl UpgradeSchedule {
    pub fn new(mut upgrades: Vec<Upgrade>) -> Self {
        upgrades.sort_by_key(|u| u.height);
        Self { upgrades }
    }

    pub fn mainnet() -> Self {
        Self::new(mainnet::HEIGHT_INFOS.iter().map(Upgrade::from).collect())
    }

    pub fn network_version(&self, epoch: ChainEpoch) -> u32 {
        self.upgrades
            .iter()
            .rev()
            .find(|upgrade| epoch > upgrade.height)
            .map(|upgrade| upgrade.version)
            .unwrap_or_default()
    }

    /// Height of the upgrade that changed the base fee packing rule. Chains
    /// that never had it use the newer rule from the start.
    pub fn smoke_height(&self) -> ChainEpoch {
        self.upgrades
            .iter()
            .find(|upgrade| upgrade.version == Height::Smoke.network_version())
            .map_or(-1, |upgrade| upgrade.height)
    }

    pub fn upgrades(&self) -> &[Upgrade] {
        &self.upgrades
    }
}

impl Default for UpgradeSchedule {
    fn default() -> Self {
        Self::mainnet()
    }
}

/// Actor version deployed at a network version.
pub fn actor_version(network_version: u32) -> Option<u64> {
    Some(match network_version {
        0..=3 => 0,
        4..=9 => 2,
        10 | 11 => 3,
        12 => 4,
        13 => 5,
        14 => 6,
        15 => 7,
        16 => 8,
        17 => 9,
        18 => 10,
        19 | 20 => 11,
        21 => 12,
        22 => 13,
        23 => 14,
        24 => 15,
        25 | 26 => 16,
        _ => return None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActorBundleInfo {
    pub version: u64,
    pub manifest: Cid,
}

/// Mainnet builtin actor manifests registered when present in the store.
pub static ACTOR_BUNDLES: LazyLock<Vec<ActorBundleInfo>> = LazyLock::new(|| {
    [
        (9, "bafy2bzaceb6j6666h36xnhksu3ww4kxb6e25niayfgkdnifaqi6m6ooc66i6i"),
        (10, "bafy2bzacecsuyf7mmvrhkx2evng5gnz5canlnz2fdlzu2lvcgptiq2pzuovos"),
        (11, "bafy2bzacecnhaiwcrpyjvzl4uv4q3jzoif26okl3m66q3cijp3dfwlcxwztwo"),
    ]
    .into_iter()
    .filter_map(|(version, manifest)| {
        Some(ActorBundleInfo {
            version,
            manifest: Cid::try_from(manifest).ok()?,
        })
    })
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_network_versions() {
        let schedule = UpgradeSchedule::mainnet();
        assert_eq!(schedule.network_version(0), 0);
        assert_eq!(schedule.network_version(41_280), 0);
        assert_eq!(schedule.network_version(41_281), 1);
        assert_eq!(schedule.network_version(2_383_681), 17);
        assert_eq!(schedule.network_version(i64::MAX), 26);
    }

    #[test]
    fn tape_and_liftoff_share_a_version() {
        let schedule = UpgradeSchedule::mainnet();
        assert_eq!(schedule.network_version(140_761), 5);
        assert_eq!(schedule.network_version(148_889), 5);
    }

    #[test]
    fn smoke_height() {
        assert_eq!(UpgradeSchedule::mainnet().smoke_height(), 51_000);
        assert_eq!(UpgradeSchedule::new(vec![]).smoke_height(), -1);
    }

    #[test]
    fn actor_versions() {
        assert_eq!(actor_version(0), Some(0));
        assert_eq!(actor_version(4), Some(2));
        assert_eq!(actor_version(17), Some(9));
        assert_eq!(actor_version(20), Some(11));
        assert_eq!(actor_version(NEWEST_NETWORK_VERSION), Some(16));
        assert_eq!(actor_version(NEWEST_NETWORK_VERSION + 1), None);
    }

    #[test]
    fn every_height_has_a_known_actor_version() {
        for info in mainnet::HEIGHT_INFOS.iter() {
            assert!(actor_version(info.height.network_version()).is_some());
        }
    }

    #[test]
    fn bundles_parse() {
        assert_eq!(ACTOR_BUNDLES.len(), 3);
    }

    #[test]
    fn custom_schedule_is_sorted() {
        let schedule = UpgradeSchedule::new(vec![
            Upgrade { height: 20, version: 2 },
            Upgrade { height: 10, version: 1 },
        ]);
        assert_eq!(schedule.network_version(15), 1);
        assert_eq!(schedule.network_version(25), 2);
    }
}
