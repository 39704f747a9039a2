// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed platform context.
//!
//! One instance per process carries every shared handle; components receive
//! it explicitly instead of reaching for globals. Lifetime is bounded by
//! startup and the shutdown token.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::cache::Cache;
use crate::config::PlatformConfig;
use crate::geo_index::GeoIndex;
use crate::lock::LockManager;
use crate::sim::{SimDeps, SimSupervisor};
use crate::store::Store;

pub struct Platform {
    pub config: PlatformConfig,
    pub store: Arc<Store>,
    pub cache: Arc<Cache>,
    pub bus: Arc<EventBus>,
    pub geo: Arc<GeoIndex>,
    pub locks: LockManager,
    pub sim: SimSupervisor,
    pub shutdown: CancellationToken,
}

impl Platform {
    pub fn new(config: PlatformConfig, bus: EventBus, shutdown: CancellationToken) -> Arc<Self> {
        let cache = Arc::new(Cache::new());
        cache.spawn_sweeper(shutdown.clone());
        Arc::new(Self {
            locks: LockManager::new(Arc::clone(&cache)),
            store: Arc::new(Store::new()),
            cache,
            bus: Arc::new(bus),
            geo: Arc::new(GeoIndex::new()),
            sim: SimSupervisor::new(),
            shutdown,
            config,
        })
    }

    /// In-process platform on the memory bus; the default for tests and
    /// single-node runs.
    pub fn in_memory(config: PlatformConfig) -> Arc<Self> {
        Self::new(config, EventBus::memory(), CancellationToken::new())
    }

    /// Handle bundle for simulator tasks.
    pub fn sim_deps(&self) -> SimDeps {
        SimDeps {
            store: Arc::clone(&self.store),
            bus: Arc::clone(&self.bus),
            geo: Arc::clone(&self.geo),
            config: self.config.sim,
        }
    }
}
