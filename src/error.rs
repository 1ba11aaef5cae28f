// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use thiserror::Error as ThisError;

use crate::shim::address::Address;

/// Failures surfaced by the extraction engine.
#[derive(Debug, ThisError)]
pub enum Error {
    /// A CID referenced by an upstream structure is not present in the store.
    #[error("block {0} is missing from the store")]
    StoreMissingBlock(Cid),
    /// The block was found but does not decode against the expected schema.
    #[error("block {cid} is malformed: {reason}")]
    MalformedBlock { cid: Cid, reason: String },
    #[error("state trees have incompatible versions (executed {executed}, current {current})")]
    IncompatibleStateTreeVersions { executed: u64, current: u64 },
    /// No differ is registered for this actor code.
    #[error("unsupported actor code {code} during {op}")]
    UnsupportedActorVersion { code: Cid, op: &'static str },
    #[error("invariant violated: {0}")]
    InvariantViolated(String),
    #[error("operation cancelled")]
    Cancelled,
    /// Errors coming from the node data source (network, authentication).
    #[error("upstream: {0:#}")]
    Upstream(anyhow::Error),
    /// A state that should not be reachable given the decoded inputs.
    #[error("unreachable state: {0}")]
    Unreachable(String),
    /// Wraps a failure with the address of the actor being diffed.
    #[error("actor {address}: {source}")]
    Actor {
        address: Address,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Converts an error returned by a [`fvm_ipld_blockstore::Blockstore`].
    ///
    /// Cancellation raised by [`crate::db::CancellableStore`] keeps its kind,
    /// everything else is an upstream failure.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(err) => err,
            Err(err) => Self::Upstream(err),
        }
    }

    pub fn malformed(cid: Cid, reason: impl std::fmt::Display) -> Self {
        Self::MalformedBlock {
            cid,
            reason: reason.to_string(),
        }
    }

    pub fn for_actor(self, address: Address) -> Self {
        match self {
            // cancellation is not attributed to any particular actor
            Self::Cancelled | Self::Actor { .. } => self,
            other => Self::Actor {
                address,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping actor attribution.
    pub fn root(&self) -> &Error {
        match self {
            Self::Actor { source, .. } => source.root(),
            other => other,
        }
    }

    /// Address of the failing actor, if the error was attributed to one.
    pub fn actor(&self) -> Option<Address> {
        match self {
            Self::Actor { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Stable kind tag used in error records.
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Self::StoreMissingBlock(_) => "store_missing_block",
            Self::MalformedBlock { .. } => "malformed_block",
            Self::IncompatibleStateTreeVersions { .. } => "incompatible_state_tree_versions",
            Self::UnsupportedActorVersion { .. } => "unsupported_actor_version",
            Self::InvariantViolated(_) => "invariant_violated",
            Self::Cancelled => "cancelled",
            Self::Upstream(_) => "upstream",
            Self::Unreachable(_) | Self::Actor { .. } => "unreachable",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Only upstream failures are worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self.root(), Self::Upstream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_keep_cancellation() {
        let err = Error::from_store(anyhow::Error::new(Error::Cancelled));
        assert!(err.is_cancelled());

        let err = Error::from_store(anyhow::anyhow!("connection reset"));
        assert!(err.is_retriable());
        assert_eq!(err.kind(), "upstream");
    }

    #[test]
    fn actor_attribution() {
        let address = Address::new_id(1000);
        let err = Error::InvariantViolated("added with previous".into()).for_actor(address);
        assert_eq!(err.actor(), Some(address));
        assert_eq!(err.kind(), "invariant_violated");
        // not wrapped twice
        let err = err.for_actor(Address::new_id(1001));
        assert_eq!(err.actor(), Some(address));
        assert!(Error::Cancelled.for_actor(address).actor().is_none());
    }
}
