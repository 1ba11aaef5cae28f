// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Verified registry. Before version 9 the registry tracked verified
//! clients and their allowances; from version 9 on, allowances moved to the
//! datacap actor and the registry tracks allocations and claims instead.

use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};
use spire_enum::prelude::delegated_enum;

use super::{
    ActorInput, ActorSide, SubChange, address_key, nested_key, sort_changes,
    uint_key_of,
};
use crate::adt::{
    ChangeKind, HamtOptions, HamtRoot, MapModification, NestedMapModification, diff_map_opt,
    diff_nested_opt, uint_key,
};
use crate::error::Error;
use crate::shim::address::Address;
use crate::utils::encoding::DeferredCbor;

const HAMT_BIT_WIDTH: u32 = 5;
const OPTIONS: HamtOptions = HamtOptions::new(HAMT_BIT_WIDTH);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifregVerifierChange {
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
    pub verifier: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifregClientChange {
    pub change: ChangeKind,
    pub client: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
}

/// A claim of a provider, keyed by `(provider, claim_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifregClaimChange {
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    pub claim_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
    /// Actor ID of the storage provider.
    pub provider: u64,
}

/// An allocation made to a client, keyed by `(client, allocation_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifregAllocationChange {
    pub change: ChangeKind,
    /// Actor ID of the client.
    pub client: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<DeferredCbor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<DeferredCbor>,
    pub allocation_id: u64,
}

impl SubChange for VerifregVerifierChange {
    fn key(&self) -> Vec<u8> {
        self.verifier.to_bytes()
    }
}

impl SubChange for VerifregClientChange {
    fn key(&self) -> Vec<u8> {
        self.client.to_bytes()
    }
}

impl SubChange for VerifregClaimChange {
    fn key(&self) -> Vec<u8> {
        nested_key(&uint_key(self.provider), &uint_key(self.claim_id))
    }
}

impl SubChange for VerifregAllocationChange {
    fn key(&self) -> Vec<u8> {
        nested_key(&uint_key(self.client), &uint_key(self.allocation_id))
    }
}

/// Changes to the registry. `clients` is only populated before version 9,
/// `claims` and `allocations` only from version 9 on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifregStateDiff {
    pub verifiers: Vec<VerifregVerifierChange>,
    pub clients: Vec<VerifregClientChange>,
    pub claims: Vec<VerifregClaimChange>,
    pub allocations: Vec<VerifregAllocationChange>,
}

impl VerifregStateDiff {
    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
            && self.clients.is_empty()
            && self.claims.is_empty()
            && self.allocations.is_empty()
    }
}

/// `[root_key, verifiers, verified_clients, ..]` before version 8.
struct LegacyVerifreg {
    verifiers: Cid,
    verified_clients: Cid,
}

#[delegated_enum]
enum VerifregHead {
    Legacy(LegacyVerifreg),
    V8(fil_actor_verifreg_state::v8::State),
    V9(fil_actor_verifreg_state::v9::State),
    V10(fil_actor_verifreg_state::v10::State),
    V11(fil_actor_verifreg_state::v11::State),
    V12(fil_actor_verifreg_state::v12::State),
    V13(fil_actor_verifreg_state::v13::State),
    V14(fil_actor_verifreg_state::v14::State),
    V15(fil_actor_verifreg_state::v15::State),
    V16(fil_actor_verifreg_state::v16::State),
}

impl VerifregHead {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        Ok(match side.version {
            0..=7 => {
                let fields = side.fields(store)?;
                Self::Legacy(LegacyVerifreg {
                    verifiers: fields.link(1, "verifiers")?,
                    verified_clients: fields.link(2, "verified_clients")?,
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
            _ => return Err(side.unsupported("decode verified registry state")),
        })
    }

    fn verifiers(&self) -> Cid {
        delegate_verifreg_head!(self => |s| s.verifiers)
    }

    /// `(allocations, claims)`, which replaced the verified clients in
    /// version 9.
    fn allocations_and_claims(&self) -> Option<(Cid, Cid)> {
        match self {
            Self::Legacy(_) | Self::V8(_) => None,
            Self::V9(s) => Some((s.allocations, s.claims)),
            Self::V10(s) => Some((s.allocations, s.claims)),
            Self::V11(s) => Some((s.allocations, s.claims)),
            Self::V12(s) => Some((s.allocations, s.claims)),
            Self::V13(s) => Some((s.allocations, s.claims)),
            Self::V14(s) => Some((s.allocations, s.claims)),
            Self::V15(s) => Some((s.allocations, s.claims)),
            Self::V16(s) => Some((s.allocations, s.claims)),
        }
    }

    fn verified_clients(&self) -> Option<Cid> {
        match self {
            Self::Legacy(s) => Some(s.verified_clients),
            Self::V8(s) => Some(s.verified_clients),
            _ => None,
        }
    }
}

enum VerifregState {
    Clients { verifiers: HamtRoot, clients: HamtRoot },
    Allocations {
        verifiers: HamtRoot,
        allocations: HamtRoot,
        claims: HamtRoot,
    },
}

impl VerifregState {
    fn load<BS: Blockstore + ?Sized>(store: &BS, side: &ActorSide) -> Result<Self, Error> {
        let head = VerifregHead::load(store, side)?;
        let verifiers = OPTIONS.root(head.verifiers());
        if let Some((allocations, claims)) = head.allocations_and_claims() {
            return Ok(Self::Allocations {
                verifiers,
                allocations: OPTIONS.root(allocations),
                claims: OPTIONS.root(claims),
            });
        }
        match head.verified_clients() {
            Some(clients) => Ok(Self::Clients {
                verifiers,
                clients: OPTIONS.root(clients),
            }),
            None => Err(Error::Unreachable(format!(
                "verified registry v{} has neither clients nor allocations",
                side.version
            ))),
        }
    }

    fn verifiers(&self) -> &HamtRoot {
        match self {
            Self::Clients { verifiers, .. } | Self::Allocations { verifiers, .. } => verifiers,
        }
    }

    fn clients(&self) -> Option<&HamtRoot> {
        match self {
            Self::Clients { clients, .. } => Some(clients),
            Self::Allocations { .. } => None,
        }
    }

    fn claims(&self) -> Option<&HamtRoot> {
        match self {
            Self::Clients { .. } => None,
            Self::Allocations { claims, .. } => Some(claims),
        }
    }

    fn allocations(&self) -> Option<&HamtRoot> {
        match self {
            Self::Clients { .. } => None,
            Self::Allocations { allocations, .. } => Some(allocations),
        }
    }
}

fn address_changes<T>(
    origin: &Cid,
    changes: Vec<MapModification>,
    wrap: impl Fn(MapModification, Address) -> T,
) -> Result<Vec<T>, Error> {
    changes
        .into_iter()
        .map(|m| {
            m.kind.check(m.previous.as_ref(), m.current.as_ref())?;
            let address = address_key(origin, &m.key)?;
            Ok(wrap(m, address))
        })
        .collect()
}

fn id_pair_changes<T>(
    origin: &Cid,
    changes: Vec<NestedMapModification>,
    wrap: impl Fn(NestedMapModification, u64, u64) -> T,
) -> Result<Vec<T>, Error> {
    changes
        .into_iter()
        .map(|m| {
            m.kind.check(m.previous.as_ref(), m.current.as_ref())?;
            let outer = uint_key_of(origin, &m.outer_key)?;
            let inner = uint_key_of(origin, &m.inner_key)?;
            Ok(wrap(m, outer, inner))
        })
        .collect()
}

pub fn diff<BS: Blockstore + Sync + ?Sized>(
    store: &BS,
    input: &ActorInput,
) -> Result<VerifregStateDiff, Error> {
    if input.head_unchanged() {
        return Ok(VerifregStateDiff::default());
    }
    let (executed, current) = input.load_states(store, VerifregState::load)?;
    let (executed, current) = (executed.as_ref(), current.as_ref());
    let origin = current
        .or(executed)
        .map(|s| s.verifiers().cid)
        .unwrap_or_default();

    let ((verifiers, clients), (claims, allocations)) = rayon::join(
        || {
            rayon::join(
                || -> Result<_, Error> {
                    let changes = diff_map_opt(
                        store,
                        executed.map(VerifregState::verifiers),
                        current.map(VerifregState::verifiers),
                    )?;
                    address_changes(&origin, changes, |m, verifier| VerifregVerifierChange {
                        change: m.kind,
                        current: m.current,
                        previous: m.previous,
                        verifier,
                    })
                },
                || -> Result<_, Error> {
                    let changes = diff_map_opt(
                        store,
                        executed.and_then(VerifregState::clients),
                        current.and_then(VerifregState::clients),
                    )?;
                    address_changes(&origin, changes, |m, client| VerifregClientChange {
                        change: m.kind,
                        client,
                        current: m.current,
                        previous: m.previous,
                    })
                },
            )
        },
        || {
            rayon::join(
                || -> Result<_, Error> {
                    let changes = diff_nested_opt(
                        store,
                        executed.and_then(VerifregState::claims),
                        current.and_then(VerifregState::claims),
                        OPTIONS,
                    )?;
                    id_pair_changes(&origin, changes, |m, provider, claim_id| {
                        VerifregClaimChange {
                            change: m.kind,
                            current: m.current,
                            claim_id,
                            previous: m.previous,
                            provider,
                        }
                    })
                },
                || -> Result<_, Error> {
                    let changes = diff_nested_opt(
                        store,
                        executed.and_then(VerifregState::allocations),
                        current.and_then(VerifregState::allocations),
                        OPTIONS,
                    )?;
                    id_pair_changes(&origin, changes, |m, client, allocation_id| {
                        VerifregAllocationChange {
                            change: m.kind,
                            client,
                            current: m.current,
                            previous: m.previous,
                            allocation_id,
                        }
                    })
                },
            )
        },
    );

    let mut diff = VerifregStateDiff {
        verifiers: verifiers?,
        clients: clients?,
        claims: claims?,
        allocations: allocations?,
    };
    sort_changes(&mut diff.verifiers);
    sort_changes(&mut diff.clients);
    sort_changes(&mut diff.claims);
    sort_changes(&mut diff.allocations);
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::actors::testing::{input, side};
    use crate::db::MemoryDB;
    use crate::test_utils::hamt_of;

    fn map_of(store: &MemoryDB, entries: &[(Vec<u8>, u64)]) -> Cid {
        hamt_of(store, HAMT_BIT_WIDTH, entries.iter().cloned())
    }

    fn allocations_state(
        store: &MemoryDB,
        version: u64,
        claims: &[(u64, &[(u64, u64)])],
    ) -> ActorSide {
        let verifiers = map_of(store, &[(Address::new_id(99).to_bytes(), 1)]);
        let allocations = map_of(store, &[]);
        let claims = hamt_of(
            store,
            HAMT_BIT_WIDTH,
            claims.iter().map(|(provider, inner)| {
                let inner = inner
                    .iter()
                    .map(|(id, size)| (uint_key(*id), *size))
                    .collect::<Vec<_>>();
                (uint_key(*provider), map_of(store, &inner))
            }),
        );
        let root_key = Address::new_id(80);
        side(
            store,
            version,
            "verifiedregistry",
            &(root_key, verifiers, allocations, allocations, 1u64, claims),
        )
    }

    #[test]
    fn claim_under_new_provider() {
        let store = MemoryDB::default();
        let executed = allocations_state(&store, 9, &[(2000, &[(7, 32)])]);
        let current = allocations_state(&store, 12, &[(2000, &[(7, 32)]), (3000, &[(1, 64)])]);

        let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
        assert!(diff.verifiers.is_empty());
        assert!(diff.allocations.is_empty());
        assert!(diff.clients.is_empty());
        assert_eq!(
            diff.claims,
            vec![VerifregClaimChange {
                change: ChangeKind::Added,
                current: Some(DeferredCbor::encode(&64u64).unwrap()),
                claim_id: 1,
                previous: None,
                provider: 3000,
            }]
        );
    }

    #[test]
    fn legacy_clients() {
        let store = MemoryDB::default();
        let client = Address::new_id(1234);
        let verifier = Address::new_id(99);
        let state = |clients: &[(Vec<u8>, u64)]| {
            let verifiers = map_of(&store, &[(verifier.to_bytes(), 1_000_000)]);
            let clients = map_of(&store, clients);
            side(&store, 4, "verifiedregistry", &(Address::new_id(80), verifiers, clients))
        };
        let executed = state(&[(client.to_bytes(), 100)]);
        let current = state(&[(client.to_bytes(), 40)]);

        let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
        assert!(diff.claims.is_empty() && diff.verifiers.is_empty());
        assert_eq!(diff.clients.len(), 1);
        assert_eq!(diff.clients[0].client, client);
        assert_eq!(diff.clients[0].change, ChangeKind::Modified);
    }

    #[test]
    fn upgrade_to_v9_drops_clients() {
        let store = MemoryDB::default();
        let verifiers = map_of(&store, &[]);
        let clients = map_of(&store, &[(Address::new_id(5).to_bytes(), 1)]);
        let removals = map_of(&store, &[]);
        let executed = side(
            &store,
            8,
            "verifiedregistry",
            &(Address::new_id(80), verifiers, clients, removals),
        );
        let current = allocations_state(&store, 9, &[]);

        let diff = diff(&store, &input(Some(executed), Some(current))).unwrap();
        assert_eq!(diff.clients.len(), 1);
        assert_eq!(diff.clients[0].change, ChangeKind::Removed);
        assert_eq!(diff.verifiers.len(), 1);
        assert_eq!(diff.verifiers[0].change, ChangeKind::Added);
    }

    #[test]
    fn v8_head_needs_removal_proposals() {
        let store = MemoryDB::default();
        let verifiers = map_of(&store, &[]);
        let current = side(
            &store,
            8,
            "verifiedregistry",
            &(Address::new_id(80), verifiers, verifiers),
        );
        let err = diff(&store, &input(None, Some(current))).unwrap_err();
        assert!(matches!(err, Error::MalformedBlock { .. }), "{err:?}");
    }
}
