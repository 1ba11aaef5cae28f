// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Finds the actors that changed between two state trees.

use ahash::HashMap;
use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use tracing::debug;

use crate::adt::{ChangeKind, MapModification, diff_map_opt};
use crate::error::Error;
use crate::shim::address::Address;
use crate::shim::state_tree::{ActorState, StateTreeRoot};

/// One entry of the state tree that differs between the executed and the
/// current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorChange {
    pub address: Address,
    pub kind: ChangeKind,
    pub executed: Option<ActorState>,
    pub current: Option<ActorState>,
}

impl ActorChange {
    /// Code of the actor as it exists now, or as it last existed when it
    /// was removed.
    pub fn code(&self) -> Option<Cid> {
        self.current.as_ref().or(self.executed.as_ref()).map(|a| a.code)
    }
}

/// Diffs the actors HAMTs behind two state roots.
pub fn diff_state_trees<BS: Blockstore + ?Sized>(
    store: &BS,
    executed: &Cid,
    current: &Cid,
) -> Result<HashMap<Address, ActorChange>, Error> {
    diff_state_trees_opt(store, Some(executed), current)
}

/// Like [`diff_state_trees`]; a missing executed root stands for the empty
/// state before genesis, making every actor of `current` an addition.
pub fn diff_state_trees_opt<BS: Blockstore + ?Sized>(
    store: &BS,
    executed: Option<&Cid>,
    current: &Cid,
) -> Result<HashMap<Address, ActorChange>, Error> {
    if executed == Some(current) {
        return Ok(HashMap::default());
    }
    let current_tree = StateTreeRoot::load(store, current)?;
    let executed_tree = executed
        .map(|root| StateTreeRoot::load(store, root))
        .transpose()?;
    if let Some(executed_tree) = &executed_tree {
        if executed_tree.version() != current_tree.version() {
            return Err(Error::IncompatibleStateTreeVersions {
                executed: executed_tree.version(),
                current: current_tree.version(),
            });
        }
    }

    let executed_actors = executed_tree.map(|t| t.actors());
    let current_actors = current_tree.actors();
    let changes = diff_map_opt(store, executed_actors.as_ref(), Some(&current_actors))?;
    debug!(
        version = current_tree.version(),
        changed = changes.len(),
        "diffed state trees"
    );

    let origin = current_actors.cid;
    changes
        .into_iter()
        .map(|change| {
            let change = decode_change(&origin, change)?;
            Ok((change.address, change))
        })
        .collect()
}

fn decode_change(origin: &Cid, change: MapModification) -> Result<ActorChange, Error> {
    let MapModification {
        key,
        kind,
        previous,
        current,
    } = change;
    kind.check(previous.as_ref(), current.as_ref())?;
    let address = Address::from_bytes(&key)
        .map_err(|e| Error::malformed(*origin, format!("invalid actor address: {e}")))?;
    let decode = |value: Option<crate::utils::encoding::DeferredCbor>| {
        value
            .map(|v| v.decode_as::<ActorState>(origin))
            .transpose()
    };
    Ok(ActorChange {
        address,
        kind,
        executed: decode(previous)?,
        current: decode(current)?,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::db::{CborStoreExt as _, MemoryDB};
    use crate::shim::econ::TokenAmount;
    use crate::test_utils::state_tree;
    use crate::utils::cid::CidCborExt as _;

    fn actor(store: &MemoryDB, balance: u64) -> ActorState {
        let head = store.put_cbor_default(&("head", 1u8)).unwrap();
        let code = Cid::identity_raw(b"fil/1/account");
        ActorState::new(code, head, TokenAmount::from_atto(balance), 0)
    }

    #[test]
    fn balance_change_is_modified() {
        let store = MemoryDB::default();
        let a = Address::new_id(1000);
        let b = Address::new_id(1001);
        let executed = state_tree(&store, 5, &[(a, actor(&store, 100)), (b, actor(&store, 1))]);
        let current = state_tree(&store, 5, &[(a, actor(&store, 105)), (b, actor(&store, 1))]);

        let changes = diff_state_trees(&store, &executed, &current).unwrap();
        assert_eq!(changes.len(), 1);
        let change = &changes[&a];
        assert_eq!(change.kind, ChangeKind::Modified);
        assert_eq!(change.executed.as_ref().unwrap().balance, TokenAmount::from_atto(100));
        assert_eq!(change.current.as_ref().unwrap().balance, TokenAmount::from_atto(105));
    }

    #[test]
    fn equal_roots_are_empty() {
        let store = MemoryDB::default();
        let root = state_tree(&store, 1, &[(Address::new_id(1), actor(&store, 1))]);
        assert!(diff_state_trees(&store, &root, &root).unwrap().is_empty());
    }

    #[test]
    fn version_mismatch() {
        let store = MemoryDB::default();
        let a = Address::new_id(1000);
        let executed = state_tree(&store, 0, &[(a, actor(&store, 1))]);
        let current = state_tree(&store, 1, &[(a, actor(&store, 2))]);
        assert!(matches!(
            diff_state_trees(&store, &executed, &current),
            Err(Error::IncompatibleStateTreeVersions {
                executed: 0,
                current: 1
            })
        ));
    }

    #[test]
    fn genesis_adds_everything() {
        let store = MemoryDB::default();
        let actors = (0..10)
            .map(|i| (Address::new_id(i), actor(&store, i)))
            .collect::<Vec<_>>();
        let current = state_tree(&store, 0, &actors);
        let changes = diff_state_trees_opt(&store, None, &current).unwrap();
        assert_eq!(changes.len(), 10);
        assert!(changes
            .values()
            .all(|c| c.kind == ChangeKind::Added && c.executed.is_none()));
    }
}
