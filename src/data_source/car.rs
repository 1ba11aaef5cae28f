// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::fs::File;
use std::num::NonZeroUsize;
use std::path::Path;

use anyhow::Context as _;
use positioned_io::ReadAt;
use tracing::info;

use super::{DataSource, lookup_actor};
use crate::actors::init::{self, INIT_ACTOR_ADDR};
use crate::blocks::{Tipset, TipsetKey};
use crate::db::CachingBlockstore;
use crate::db::car::PlainCar;
use crate::error::Error;
use crate::networks::UpgradeSchedule;
use crate::shim::clock::ChainEpoch;

/// Serves a chain snapshot stored as a CARv1 file whose roots are the key of
/// the head tipset.
pub struct CarDataSource<ReaderT = File> {
    store: CachingBlockstore<PlainCar<ReaderT>>,
    head: Tipset,
    upgrades: UpgradeSchedule,
}

impl CarDataSource<File> {
    pub fn open(path: &Path, cache_size: usize, upgrades: UpgradeSchedule) -> anyhow::Result<Self> {
        let car = PlainCar::open(path)?;
        Self::new(car, cache_size, upgrades)
            .with_context(|| format!("cannot read the head of {}", path.display()))
    }
}

impl<ReaderT: ReadAt> CarDataSource<ReaderT> {
    pub fn new(
        car: PlainCar<ReaderT>,
        cache_size: usize,
        upgrades: UpgradeSchedule,
    ) -> anyhow::Result<Self> {
        let key = TipsetKey::new(car.roots().to_vec());
        let store = CachingBlockstore::new(
            car,
            NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN),
        );
        let head = Tipset::load(&store, &key)?;
        info!(head = head.epoch(), blocks = store.inner().len(), "opened snapshot");
        Ok(Self {
            store,
            head,
            upgrades,
        })
    }
}

impl<ReaderT: ReadAt + Send + Sync> DataSource for CarDataSource<ReaderT> {
    type Store = CachingBlockstore<PlainCar<ReaderT>>;

    fn store(&self) -> &Self::Store {
        &self.store
    }

    fn upgrades(&self) -> &UpgradeSchedule {
        &self.upgrades
    }

    fn head(&self) -> Result<Tipset, Error> {
        Ok(self.head.clone())
    }

    fn tipset_by_height(&self, height: ChainEpoch) -> Result<Tipset, Error> {
        if height < 0 || height > self.head.epoch() {
            return Err(Error::Upstream(anyhow::anyhow!(
                "height {height} is outside the snapshot (head at {})",
                self.head.epoch()
            )));
        }
        let mut tipset = self.head.clone();
        while tipset.epoch() > height {
            tipset = self.tipset(&tipset.parents())?;
        }
        Ok(tipset)
    }

    fn network_name(&self) -> Result<String, Error> {
        let Some(init_actor) = lookup_actor(&self.store, self.head.parent_state(), &INIT_ACTOR_ADDR)?
        else {
            return Err(Error::InvariantViolated("snapshot has no init actor".into()));
        };
        init::network_name(&self.store, &init_actor.state)
    }
}
