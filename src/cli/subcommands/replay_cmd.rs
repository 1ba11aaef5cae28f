// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::Context as _;
use tracing::info;

use crate::container::Extraction;
use crate::transform::write_rows;

#[derive(Debug, clap::Args)]
pub struct ReplayCommand {
    /// Container CAR written by `walk`
    #[arg(long)]
    pub from: PathBuf,
    /// Where to write the rows. Standard output when omitted
    #[arg(long)]
    pub out: Option<PathBuf>,
}

impl ReplayCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let file =
            File::open(&self.from).with_context(|| format!("cannot open {}", self.from.display()))?;
        let extraction = Extraction::read_car(BufReader::new(file))
            .with_context(|| format!("cannot read {}", self.from.display()))?;
        let rows = match &self.out {
            Some(path) => write_rows(
                &extraction,
                BufWriter::new(
                    File::create(path)
                        .with_context(|| format!("cannot create {}", path.display()))?,
                ),
            )?,
            None => write_rows(&extraction, std::io::stdout().lock())?,
        };
        info!(
            rows,
            pairs = extraction.changes.len(),
            network = %extraction.network,
            "replayed {}",
            self.from.display()
        );
        Ok(())
    }
}
