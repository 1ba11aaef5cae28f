// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

fn main() -> std::process::ExitCode {
    forest_indexer::indexer_main(std::env::args_os())
}
