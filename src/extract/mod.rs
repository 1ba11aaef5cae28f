// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Extraction of the actor state changes between two tipsets.
//!
//! The [`Extractor`] diffs the state trees of a tipset pair, fans the changed
//! actors out to the family differs on a worker pool and collates their
//! results into an [`ActorStateChanges`].

mod driver;
#[cfg(test)]
mod tests;

pub use driver::{ExtractOptions, Extractor};

use ahash::HashMap;

use crate::actors::datacap::DataCapStateDiff;
use crate::actors::init::InitStateDiff;
use crate::actors::market::MarketStateDiff;
use crate::actors::miner::MinerStateDiff;
use crate::actors::power::PowerStateDiff;
use crate::actors::raw::RawActorChange;
use crate::actors::verifreg::VerifregStateDiff;
use crate::blocks::Tipset;
use crate::error::Error;
use crate::shim::address::Address;

/// Tag of a [`StateDiffResult`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum StateDiffKind {
    Raw,
    Init,
    Market,
    Miner,
    Power,
    Verifreg,
    Datacap,
}

/// What one differ found for one actor.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDiffResult {
    Raw(RawActorChange),
    Init(InitStateDiff),
    Market(MarketStateDiff),
    Miner(MinerStateDiff),
    Power(PowerStateDiff),
    Verifreg(VerifregStateDiff),
    Datacap(DataCapStateDiff),
}

impl StateDiffResult {
    pub fn kind(&self) -> StateDiffKind {
        match self {
            StateDiffResult::Raw(_) => StateDiffKind::Raw,
            StateDiffResult::Init(_) => StateDiffKind::Init,
            StateDiffResult::Market(_) => StateDiffKind::Market,
            StateDiffResult::Miner(_) => StateDiffKind::Miner,
            StateDiffResult::Power(_) => StateDiffKind::Power,
            StateDiffResult::Verifreg(_) => StateDiffKind::Verifreg,
            StateDiffResult::Datacap(_) => StateDiffKind::Datacap,
        }
    }

    /// Whether the differ found nothing. Empty results are not collected.
    pub fn is_empty(&self) -> bool {
        match self {
            StateDiffResult::Raw(_) => false,
            StateDiffResult::Init(d) => d.is_empty(),
            StateDiffResult::Market(d) => d.is_empty(),
            StateDiffResult::Miner(d) => d.is_empty(),
            StateDiffResult::Power(d) => d.is_empty(),
            StateDiffResult::Verifreg(d) => d.is_empty(),
            StateDiffResult::Datacap(d) => d.is_empty(),
        }
    }
}

/// Every change between the state `executed` ran on and the state it
/// produced, which `current` carries as its parent state.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorStateChanges {
    pub current: Tipset,
    pub executed: Tipset,
    pub raw: HashMap<Address, RawActorChange>,
    pub miners: HashMap<Address, MinerStateDiff>,
    pub init: Option<InitStateDiff>,
    pub market: Option<MarketStateDiff>,
    pub power: Option<PowerStateDiff>,
    pub verifreg: Option<VerifregStateDiff>,
    pub datacap: Option<DataCapStateDiff>,
}

impl ActorStateChanges {
    pub fn new(current: Tipset, executed: Tipset) -> Self {
        Self {
            current,
            executed,
            raw: HashMap::default(),
            miners: HashMap::default(),
            init: None,
            market: None,
            power: None,
            verifreg: None,
            datacap: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
            && self.miners.is_empty()
            && self.init.is_none()
            && self.market.is_none()
            && self.power.is_none()
            && self.verifreg.is_none()
            && self.datacap.is_none()
    }

    /// Files a result under its actor or family. Empty results are dropped.
    pub fn insert(&mut self, address: Address, result: StateDiffResult) -> Result<(), Error> {
        fn singleton<T>(slot: &mut Option<T>, value: T, kind: StateDiffKind) -> Result<(), Error> {
            if slot.replace(value).is_some() {
                return Err(Error::InvariantViolated(format!(
                    "more than one {kind} actor changed"
                )));
            }
            Ok(())
        }

        if result.is_empty() {
            return Ok(());
        }
        let kind = result.kind();
        let duplicate = match result {
            StateDiffResult::Raw(raw) => self.raw.insert(address, raw).is_some(),
            StateDiffResult::Miner(miner) => self.miners.insert(address, miner).is_some(),
            StateDiffResult::Init(d) => return singleton(&mut self.init, d, kind),
            StateDiffResult::Market(d) => return singleton(&mut self.market, d, kind),
            StateDiffResult::Power(d) => return singleton(&mut self.power, d, kind),
            StateDiffResult::Verifreg(d) => return singleton(&mut self.verifreg, d, kind),
            StateDiffResult::Datacap(d) => return singleton(&mut self.datacap, d, kind),
        };
        if duplicate {
            return Err(Error::InvariantViolated(format!(
                "{kind} result for {address} reported twice"
            )));
        }
        Ok(())
    }
}
