// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The raw differ records every changed actor, whatever its code.

use fvm_ipld_blockstore::Blockstore;
use serde::{Deserialize, Serialize};

use crate::adt::ChangeKind;
use crate::error::Error;
use crate::shim::state_tree::ActorState;
use crate::statediff::ActorChange;
use crate::utils::encoding::{DeferredCbor, load_raw};

/// A state tree entry that changed, with the current head block inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawActorChange {
    /// Bytes of the current head block; absent for removed actors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<DeferredCbor>,
    pub change: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<ActorState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<ActorState>,
}

pub fn diff<BS: Blockstore + ?Sized>(store: &BS, change: &ActorChange) -> Result<RawActorChange, Error> {
    let head = match &change.current {
        // unchanged heads are not repeated
        Some(current)
            if change
                .executed
                .as_ref()
                .is_some_and(|executed| executed.state == current.state) =>
        {
            None
        }
        Some(current) => Some(DeferredCbor::new(load_raw(store, &current.state)?)),
        None => None,
    };
    Ok(RawActorChange {
        head,
        change: change.kind,
        current: change.current.clone(),
        executed: change.executed.clone(),
    })
}

#[cfg(test)]
mod tests {
    use cid::Cid;

    use super::*;
    use crate::db::{CborStoreExt as _, MemoryDB};
    use crate::shim::address::Address;
    use crate::shim::econ::TokenAmount;

    #[test]
    fn balance_change_keeps_both_sides() {
        let store = MemoryDB::default();
        let head = store.put_cbor_default(&("account", 1u8)).unwrap();
        let executed = ActorState::new(Cid::default(), head, TokenAmount::from_atto(100), 0);
        let current = ActorState::new(Cid::default(), head, TokenAmount::from_atto(105), 1);
        let change = ActorChange {
            address: Address::new_id(1000),
            kind: ChangeKind::Modified,
            executed: Some(executed.clone()),
            current: Some(current.clone()),
        };
        let raw = diff(&store, &change).unwrap();
        assert_eq!(raw.head, None);
        assert_eq!(raw.executed, Some(executed));
        assert_eq!(raw.current, Some(current));

        let bytes = fvm_ipld_encoding::to_vec(&raw).unwrap();
        let back: RawActorChange = fvm_ipld_encoding::from_slice(&bytes).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn added_actor_inlines_head() {
        let store = MemoryDB::default();
        let head = store.put_cbor_default(&("account", 2u8)).unwrap();
        let current = ActorState::new(Cid::default(), head, TokenAmount::from_atto(1), 0);
        let change = ActorChange {
            address: Address::new_id(1001),
            kind: ChangeKind::Added,
            executed: None,
            current: Some(current),
        };
        let raw = diff(&store, &change).unwrap();
        let decoded: (String, u8) = raw.head.unwrap().decode_as(&head).unwrap();
        assert_eq!(decoded, ("account".to_string(), 2));
    }
}
