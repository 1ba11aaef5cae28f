// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::LazyLock;

use super::{Height, HeightInfo};
use crate::shim::clock::ChainEpoch;

const SMOKE_HEIGHT: ChainEpoch = 51000;

// The rollover period is the duration between nv19 and nv20 which both old
// proofs (v1) and the new proofs (v1_1) proofs will be accepted by the
// network.
const LIGHTNING_ROLLOVER_PERIOD: i64 = 2880 * 21;

const LIGHTNING_HEIGHT: ChainEpoch = 2_809_800;
const TEEP_HEIGHT: ChainEpoch = 4_878_840;

/// Height epochs.
pub static HEIGHT_INFOS: LazyLock<Vec<HeightInfo>> = LazyLock::new(|| {
    [
        (Height::Breeze, 41_280),
        (Height::Smoke, SMOKE_HEIGHT),
        (Height::Ignition, 94_000),
        (Height::ActorsV2, 138_720),
        (Height::Tape, 140_760),
        (Height::Liftoff, 148_888),
        (Height::Kumquat, 170_000),
        (Height::Calico, 265_200),
        (Height::Persian, 272_400),
        (Height::Orange, 336_458),
        (Height::Trust, 550_321),
        (Height::Norwegian, 665_280),
        (Height::Turbo, 712_320),
        (Height::Hyperdrive, 892_800),
        (Height::Chocolate, 1_231_620),
        (Height::OhSnap, 1_594_680),
        (Height::Skyr, 1_960_320),
        (Height::Shark, 2_383_680),
        (Height::Hygge, 2_683_348),
        (Height::Lightning, LIGHTNING_HEIGHT),
        (Height::Thunder, LIGHTNING_HEIGHT + LIGHTNING_ROLLOVER_PERIOD),
        (Height::Watermelon, 3_469_380),
        (Height::Dragon, 3_855_360),
        (Height::Waffle, 4_154_640),
        (Height::TukTuk, 4_461_240),
        (Height::Teep, TEEP_HEIGHT),
        // 90 days after Teep
        (Height::Tock, TEEP_HEIGHT + 2880 * 90),
    ]
    .into_iter()
    .map(|(height, epoch)| HeightInfo { height, epoch })
    .collect()
});
