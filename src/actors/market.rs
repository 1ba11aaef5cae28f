// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};
use spire_enum::prelude::delegated_enum;

use super::{ActorInput, ActorSide, SubChange, sort_changes};
use crate::adt::{AmtRoot, ArrayModification, ChangeKind, diff_array_opt, uint_key};
use crate::error::Error;
use crate::utils::encoding::DeferredCbor;

const PROPOSALS_AMT_BIT_WIDTH: u32 = 5;
const STATES_AMT_BIT_WIDTH: u32 = 6;

/// A change to the on-chain state of a deal (sector start, last update,
/// slash epoch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDealChange {
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    pub deal_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

/// A change to a deal proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketProposalChange {
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    pub deal_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

impl SubChange for MarketDealChange {
    fn key(&self) -> Vec<u8> {
        uint_key(self.deal_id)
    }
}

impl SubChange for MarketProposalChange {
    fn key(&self) -> Vec<u8> {
        uint_key(self.deal_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarketStateDiff {
    pub deals: Vec<MarketDealChange>,
    pub proposals: Vec<MarketProposalChange>,
}

impl MarketStateDiff {
    pub fn is_empty(&self) -> bool {
        self.deals.is_empty() && self.proposals.is_empty()
    }
}

/// Proposals and states of a pre-v8 market head, the first two fields of
/// every such layout.
struct LegacyMarket {
    proposals: Cid,
    states: Cid,
}

#[delegated_enum]
enum MarketHead {
    Legacy(LegacyMarket),
    V8(fil_actor_market_state::v8::State),
    V9(fil_actor_market_state::v9::State),
    V10(fil_actor_market_state::v10::State),
    V11(fil_actor_market_state::v11::State),
    V12(fil_actor_market_state::v12::State),
    V13(fil_actor_market_state::v13::State),
    V14(fil_actor_market_state::v14::State),
    V15(fil_actor_market_state::v15::State),
    V16(fil_actor_market_state::v16::State),
}

impl MarketHead {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        Ok(match side.version {
            0..=7 => {
                let fields = side.fields(store)?;
                Self::Legacy(LegacyMarket {
                    proposals: fields.link(0, "proposals")?,
                    states: fields.link(1, "states")?,
                })
            }
            8 => Self::V8(side.decode(store)?),
            9 => Self::V9(side.decode(store)?),
            10 => Self::V10(side.decode(store)?),
            11 => Self::V11(side.decode(store)?),
            12 => Self::V12(side.decode(store)?),
            13 => Self::V13(side.decode(store)?),
            14 => Self::V14(side.decode(store)?),
            15 => Self::V15(side.decode(store)?),
            16 => Self::V16(side.decode(store)?),
            _ => return Err(side.unsupported("decode market state")),
        })
    }

    /// `(proposals, states)`
    fn roots(&self) -> (Cid, Cid) {
        delegate_market_head!(self => |s| (s.proposals, s.states))
    }
}

/// Roots of the market collections that are diffed.
struct MarketState {
    proposals: AmtRoot,
    states: AmtRoot,
}

impl MarketState {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        let (proposals, states) = MarketHead::load(store, side)?.roots();
        Ok(if side.version < 3 {
            Self {
                proposals: AmtRoot::legacy(proposals),
                states: AmtRoot::legacy(states),
            }
        } else {
            Self {
                proposals: AmtRoot::new(proposals, PROPOSALS_AMT_BIT_WIDTH),
                states: AmtRoot::new(states, STATES_AMT_BIT_WIDTH),
            }
        })
    }

    fn proposals(&self) -> &AmtRoot {
        &self.proposals
    }

    fn states(&self) -> &AmtRoot {
        &self.states
    }
}

fn checked(m: &ArrayModification) -> Result<(), Error> {
    m.kind.check(m.previous.as_ref(), m.current.as_ref())
}

pub fn diff<BS: Blockstore + Sync + ?Sized>(
    store: &BS,
    input: &ActorInput,
) -> Result<MarketStateDiff, Error> {
    if input.head_unchanged() {
        return Ok(MarketStateDiff::default());
    }
    let (executed, current) = input.load_states(store, MarketState::load)?;
    let (executed, current) = (executed.as_ref(), current.as_ref());

    let (deals, proposals) = rayon::join(
        || -> Result<_, Error> {
            let changes = diff_array_opt(
                store,
                executed.map(MarketState::states),
                current.map(MarketState::states),
            )?;
            let mut deals = changes
                .into_iter()
                .map(|m| {
                    checked(&m)?;
                    Ok(MarketDealChange {
                        change: m.kind,
                        current: m.current,
                        deal_id: m.index,
                        previous: m.previous,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            sort_changes(&mut deals);
            Ok(deals)
        },
        || -> Result<_, Error> {
            let changes = diff_array_opt(
                store,
                executed.map(MarketState::proposals),
                current.map(MarketState::proposals),
            )?;
            let mut proposals = changes
                .into_iter()
                .map(|m| {
                    checked(&m)?;
                    Ok(MarketProposalChange {
                        change: m.kind,
                        current: m.current,
                        deal_id: m.index,
                        previous: m.previous,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?;
            sort_changes(&mut proposals);
            Ok(proposals)
        },
    );
    Ok(MarketStateDiff {
        deals: deals?,
        proposals: proposals?,
    })
}

#[cfg(test)]
mod tests {
    use cid::Cid;
    use pretty_assertions::assert_eq;

    use super::*;
    use ipld_core::ipld::Ipld;

    use crate::actors::testing::{filler, input, side, zero};
    use crate::db::MemoryDB;
    use crate::test_utils::{amt_of, legacy_amt_of};

    fn market_state(
        store: &MemoryDB,
        version: u64,
        proposals: &[(u64, &str)],
        states: &[(u64, i64)],
    ) -> ActorSide {
        let (proposals, states): (Cid, Cid) = if version < 3 {
            (
                legacy_amt_of(store, proposals.iter().map(|(i, p)| (*i, p.to_string()))),
                legacy_amt_of(store, states.iter().copied()),
            )
        } else {
            (
                amt_of(
                    store,
                    PROPOSALS_AMT_BIT_WIDTH,
                    proposals.iter().map(|(i, p)| (*i, p.to_string())),
                ),
                amt_of(store, STATES_AMT_BIT_WIDTH, states.iter().copied()),
            )
        };
        let mut head = vec![Ipld::Link(proposals), Ipld::Link(states)];
        if version >= 8 {
            // pending proposals, escrow and locked tables
            head.extend([filler(store), filler(store), filler(store)]);
            head.extend([Ipld::Integer(7), filler(store), Ipld::Integer(0)]);
            head.extend([zero(), zero(), zero()]);
            if version >= 9 {
                // pending deal allocation ids
                head.push(filler(store));
            }
            if version >= 13 {
                // provider sectors
                head.push(filler(store));
            }
        } else {
            head.push(Ipld::Integer(7));
        }
        side(store, version, "storagemarket", &head)
    }

    #[test]
    fn new_proposal_is_added() {
        let store = MemoryDB::default();
        let executed = market_state(&store, 9, &[(1, "deal one")], &[(1, 10)]);
        let current = market_state(&store, 9, &[(1, "deal one"), (2, "deal two")], &[(1, 10)]);

        let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
        assert!(diff.deals.is_empty());
        assert_eq!(
            diff.proposals,
            vec![MarketProposalChange {
                change: ChangeKind::Added,
                current: Some(DeferredCbor::encode(&"deal two").unwrap()),
                deal_id: 2,
                previous: None,
            }]
        );
    }

    #[test]
    fn deal_state_update_across_migration() {
        let store = MemoryDB::default();
        let executed = market_state(&store, 2, &[(4, "p")], &[(4, 100)]);
        let current = market_state(&store, 3, &[(4, "p")], &[(4, 250)]);

        let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
        assert!(diff.proposals.is_empty());
        assert_eq!(diff.deals.len(), 1);
        assert_eq!(diff.deals[0].deal_id, 4);
        assert_eq!(diff.deals[0].change, ChangeKind::Modified);
        assert_eq!(
            diff.deals[0].previous,
            Some(DeferredCbor::encode(&100i64).unwrap())
        );
    }

    #[test]
    fn typed_heads_across_versions() {
        let store = MemoryDB::default();
        for (from, to) in [(7, 8), (8, 9), (12, 13), (15, 16)] {
            let executed = market_state(&store, from, &[(1, "p")], &[(1, 5)]);
            let current = market_state(&store, to, &[(1, "p")], &[(1, 6)]);
            let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
            assert!(diff.proposals.is_empty(), "v{from} to v{to}");
            assert_eq!(diff.deals.len(), 1, "v{from} to v{to}");
        }
    }

    #[test]
    fn head_missing_fields_is_malformed() {
        let store = MemoryDB::default();
        let proposals = amt_of(&store, PROPOSALS_AMT_BIT_WIDTH, [(1, "p".to_string())]);
        let states = amt_of(&store, STATES_AMT_BIT_WIDTH, [(1u64, 5i64)]);
        let current = side(&store, 13, "storagemarket", &(proposals, states, 7u64));
        let err = diff(&store, &input(None, Some(current))).unwrap_err();
        assert!(matches!(err, Error::MalformedBlock { .. }), "{err:?}");
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let store = MemoryDB::default();
        let current = market_state(&store, 16, &[], &[]);
        let current = ActorSide {
            version: 17,
            ..current
        };
        let err = diff(&store, &input(None, Some(current))).unwrap_err();
        assert!(matches!(err, Error::UnsupportedActorVersion { .. }), "{err:?}");
    }

    #[test]
    fn unchanged_head_is_empty() {
        let store = MemoryDB::default();
        let state = market_state(&store, 9, &[(1, "deal one")], &[]);
        assert!(diff(&store, &input(Some(state.clone()), Some(state))).unwrap().is_empty());
    }
}
