// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::collections::BTreeSet;

use cid::Cid;
use ipld_core::ipld::Ipld;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::actors::miner::testing::{Miner, miner_state};
use crate::actors::testing::side;
use crate::actors::{ActorFamily, ActorRegistry, BuiltinActor, NEWEST_ACTOR_VERSION};
use crate::adt::ChangeKind;
use crate::blocks::Tipset;
use crate::db::MemoryDB;
use crate::shim::econ::TokenAmount;
use crate::shim::state_tree::ActorState;
use crate::test_utils::{genesis, hamt_of, state_tree, tipset};
use crate::utils::cid::CidCborExt as _;

const TREE_VERSION: u64 = 4;
const ACTOR_VERSION: u64 = 7;

fn power_address() -> Address {
    Address::new_id(4)
}

fn account(store: &MemoryDB, owner: u64, balance: u64) -> ActorState {
    let mut state = side(store, ACTOR_VERSION, "account", &(Address::new_id(owner),)).state;
    state.balance = TokenAmount::from_atto(balance);
    state
}

fn power(store: &MemoryDB, claims: &[(u64, &str)]) -> ActorState {
    let claims = hamt_of(
        store,
        5,
        claims
            .iter()
            .map(|(miner, claim)| (Address::new_id(*miner).to_bytes(), claim.to_string())),
    );
    let mut fields = vec![Ipld::Integer(0); 16];
    fields[13] = Ipld::Link(claims);
    side(store, ACTOR_VERSION, "storagepower", &fields).state
}

/// Tipsets `(current, executed)` whose parent states are `after` and `before`.
fn pair(store: &MemoryDB, before: Cid, after: Cid) -> (Tipset, Tipset) {
    let genesis = genesis(store, before);
    let executed = tipset(store, 1, &genesis, before);
    let current = tipset(store, 2, &executed, after);
    (current, executed)
}

fn extract_with(
    store: &MemoryDB,
    registry: &ActorRegistry,
    options: ExtractOptions,
    before: &[(Address, ActorState)],
    after: &[(Address, ActorState)],
) -> Result<ActorStateChanges, Error> {
    let before = state_tree(store, TREE_VERSION, before);
    let after = state_tree(store, TREE_VERSION, after);
    let (current, executed) = pair(store, before, after);
    Extractor::new(store, registry, options)
        .unwrap()
        .extract(&current, &executed, &CancellationToken::new())
}

fn extract(
    store: &MemoryDB,
    before: &[(Address, ActorState)],
    after: &[(Address, ActorState)],
) -> Result<ActorStateChanges, Error> {
    let registry = ActorRegistry::legacy();
    let options = ExtractOptions {
        workers: 2,
        ..Default::default()
    };
    extract_with(store, &registry, options, before, after)
}

#[test]
fn unchanged_state_has_no_changes() {
    let store = MemoryDB::default();
    let actors = [
        (Address::new_id(100), account(&store, 1, 10)),
        (power_address(), power(&store, &[(1000, "claim")])),
    ];
    let changes = extract(&store, &actors, &actors).unwrap();
    assert!(changes.is_empty());
    assert_eq!(changes.current.epoch(), 2);
    assert_eq!(changes.executed.epoch(), 1);
}

#[test]
fn balance_change_is_raw_only() {
    let store = MemoryDB::default();
    let address = Address::new_id(100);
    let before = [(address, account(&store, 1, 10))];
    let after = [(address, account(&store, 1, 20))];

    let changes = extract(&store, &before, &after).unwrap();
    assert_eq!(changes.raw.len(), 1);
    let raw = &changes.raw[&address];
    assert_eq!(raw.change, ChangeKind::Modified);
    // same head on both sides
    assert_eq!(raw.head, None);
    assert_eq!(raw.executed.as_ref().map(|a| a.balance.clone()), Some(TokenAmount::from_atto(10)));
    assert_eq!(raw.current.as_ref().map(|a| a.balance.clone()), Some(TokenAmount::from_atto(20)));
    assert!(changes.miners.is_empty());
    assert_eq!(changes.power, None);
    assert_eq!(changes.init, None);
}

#[test]
fn power_claims_reach_the_power_family() {
    let store = MemoryDB::default();
    let before = [(power_address(), power(&store, &[(1000, "a"), (1001, "b")]))];
    let after = [(power_address(), power(&store, &[(1000, "a"), (1002, "c")]))];

    let changes = extract(&store, &before, &after).unwrap();
    assert!(changes.raw.contains_key(&power_address()));
    let power = changes.power.unwrap();
    assert_eq!(
        power
            .claims
            .iter()
            .map(|c| (c.miner, c.change))
            .collect::<Vec<_>>(),
        vec![
            (Address::new_id(1001), ChangeKind::Removed),
            (Address::new_id(1002), ChangeKind::Added),
        ]
    );
}

#[test]
fn excluded_families_keep_raw() {
    let store = MemoryDB::default();
    let before = [(power_address(), power(&store, &[(1000, "a")]))];
    let after = [(power_address(), power(&store, &[(1000, "b")]))];
    let options = ExtractOptions {
        workers: 1,
        tasks: BTreeSet::from([ActorFamily::Miner]),
        ..Default::default()
    };

    let changes =
        extract_with(&store, &ActorRegistry::legacy(), options, &before, &after).unwrap();
    assert!(changes.raw.contains_key(&power_address()));
    assert_eq!(changes.power, None);
}

#[test]
fn unknown_code_is_raw_only() {
    let store = MemoryDB::default();
    let address = Address::new_id(200);
    let mut before = power(&store, &[(1000, "a")]);
    before.code = Cid::identity_raw(b"fil/99/mystery");
    let mut after = power(&store, &[(1000, "b")]);
    after.code = before.code;

    let changes = extract(&store, &[(address, before)], &[(address, after)]).unwrap();
    assert_eq!(changes.raw[&address].change, ChangeKind::Modified);
    assert!(changes.raw[&address].head.is_some());
    assert_eq!(changes.power, None);
}

#[test]
fn newer_actor_versions_are_raw_only() {
    let store = MemoryDB::default();
    let code = Cid::identity_raw(b"fil/next/storagepower");
    let mut registry = ActorRegistry::legacy();
    registry.register(code, BuiltinActor::Power, NEWEST_ACTOR_VERSION + 1);
    let mut before = power(&store, &[(1000, "a")]);
    before.code = code;
    let mut after = power(&store, &[(1000, "b")]);
    after.code = code;

    let changes = extract_with(
        &store,
        &registry,
        ExtractOptions::default(),
        &[(power_address(), before)],
        &[(power_address(), after)],
    )
    .unwrap();
    assert_eq!(changes.raw.len(), 1);
    assert_eq!(changes.power, None);
}

#[test]
fn incompatible_tree_versions_fail() {
    let store = MemoryDB::default();
    let actors = [(Address::new_id(100), account(&store, 1, 10))];
    let before = state_tree(&store, 0, &actors);
    let after = state_tree(&store, TREE_VERSION, &actors);
    let (current, executed) = pair(&store, before, after);
    let registry = ActorRegistry::legacy();
    let err = Extractor::new(&store, &registry, ExtractOptions::default())
        .unwrap()
        .extract(&current, &executed, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::IncompatibleStateTreeVersions {
            executed: 0,
            current: TREE_VERSION
        }
    ));
}

#[test]
fn missing_head_fails_with_the_actor() {
    let store = MemoryDB::default();
    let address = Address::new_id(300);
    let mut broken = account(&store, 1, 10);
    broken.state = Cid::from_cbor_blake2b256(&"never stored").unwrap();
    let before = [(Address::new_id(100), account(&store, 1, 10))];
    let after = [
        (Address::new_id(100), account(&store, 1, 11)),
        (address, broken.clone()),
    ];

    let err = extract(&store, &before, &after).unwrap_err();
    assert_eq!(err.actor(), Some(address));
    assert!(matches!(err.root(), Error::StoreMissingBlock(cid) if *cid == broken.state));
    assert_eq!(err.kind(), "store_missing_block");
}

#[test]
fn cancelled_extraction_stops() {
    let store = MemoryDB::default();
    let before = state_tree(&store, TREE_VERSION, &[]);
    let after = state_tree(
        &store,
        TREE_VERSION,
        &[(Address::new_id(100), account(&store, 1, 10))],
    );
    let (current, executed) = pair(&store, before, after);
    let registry = ActorRegistry::legacy();
    let token = CancellationToken::new();
    token.cancel();
    let err = Extractor::new(&store, &registry, ExtractOptions::default())
        .unwrap()
        .extract(&current, &executed, &token)
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn genesis_actors_are_added() {
    let store = MemoryDB::default();
    let root = state_tree(
        &store,
        TREE_VERSION,
        &[
            (Address::new_id(100), account(&store, 1, 10)),
            (power_address(), power(&store, &[(1000, "a")])),
        ],
    );
    let genesis = genesis(&store, root);
    let registry = ActorRegistry::legacy();
    let changes = Extractor::new(&store, &registry, ExtractOptions::default())
        .unwrap()
        .extract_genesis(&genesis, &CancellationToken::new())
        .unwrap();

    assert_eq!(changes.current, genesis);
    assert_eq!(changes.executed, genesis);
    assert_eq!(changes.raw.len(), 2);
    assert!(changes.raw.values().all(|r| r.change == ChangeKind::Added));
    assert!(changes.raw.values().all(|r| r.head.is_some()));
    let power = changes.power.unwrap();
    assert_eq!(power.claims.len(), 1);
    assert_eq!(power.claims[0].change, ChangeKind::Added);
}

#[test]
fn worker_count_does_not_change_results() {
    let store = MemoryDB::default();
    let miner = |sectors: u64| {
        miner_state(
            &store,
            ACTOR_VERSION,
            &Miner {
                info: "owner".into(),
                sectors: (0..sectors).map(|n| (n, format!("sector {n}"))).collect(),
                ..Default::default()
            },
        )
        .state
    };
    let mut before = vec![(power_address(), power(&store, &[(1000, "a")]))];
    let mut after = vec![(power_address(), power(&store, &[(1000, "b")]))];
    for id in 1000..1040u64 {
        before.push((Address::new_id(id), miner(id % 3)));
        after.push((Address::new_id(id), miner(id % 3 + 1)));
        before.push((Address::new_id(id + 100), account(&store, id, 1)));
        after.push((Address::new_id(id + 100), account(&store, id, 2)));
    }

    let registry = ActorRegistry::legacy();
    let run = |workers| {
        let options = ExtractOptions {
            workers,
            channel_capacity: 4,
            ..Default::default()
        };
        extract_with(&store, &registry, options, &before, &after).unwrap()
    };
    let serial = run(1);
    assert_eq!(serial.miners.len(), 40);
    assert_eq!(serial.raw.len(), 81);
    assert!(serial.power.is_some());
    assert_eq!(serial, run(4));
}

#[test]
fn duplicate_singletons_are_rejected() {
    let store = MemoryDB::default();
    let genesis = genesis(&store, state_tree(&store, TREE_VERSION, &[]));
    let mut changes = ActorStateChanges::new(genesis.clone(), genesis);
    let diff = crate::actors::power::PowerStateDiff {
        claims: vec![crate::actors::power::PowerClaimChange {
            miner: Address::new_id(1000),
            change: ChangeKind::Added,
            current: None,
            previous: None,
        }],
    };
    changes
        .insert(power_address(), StateDiffResult::Power(diff.clone()))
        .unwrap();
    let err = changes
        .insert(Address::new_id(5), StateDiffResult::Power(diff))
        .unwrap_err();
    assert!(matches!(err, Error::InvariantViolated(_)));

    // empty results are dropped
    changes
        .insert(
            Address::new_id(1000),
            StateDiffResult::Miner(Default::default()),
        )
        .unwrap();
    assert!(changes.miners.is_empty());
}
