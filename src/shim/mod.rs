// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod state_tree;

pub mod address {
    pub use fvm_shared4::address::{Address, Protocol};
}

pub mod clock {
    pub use fvm_shared4::clock::ChainEpoch;
}

pub mod econ {
    pub use fvm_shared4::econ::TokenAmount;
}
