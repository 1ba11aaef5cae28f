// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

/// Where chain data is read from. A node API takes precedence over a
/// snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Client {
    /// JSON-RPC endpoint of a Lotus-compatible node, e.g. `http://127.0.0.1:1234/rpc/v1`
    pub node_api: Option<Url>,
    /// Bearer token sent with every request.
    pub node_token: Option<String>,
    /// CARv1 chain snapshot, used when no node is configured.
    pub store_path: Option<PathBuf>,
}
