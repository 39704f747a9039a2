// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic row table with try-lock row gates.
//!
//! `lock_nowait` emulates `SELECT ... FOR UPDATE NOWAIT`: it either takes the
//! row gate immediately or fails with `LockFailed`. The mutation discipline
//! is lock → read → validate → write → drop guard; plain reads never block
//! and may observe a concurrent writer's committed row (read committed).

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Exclusive hold on one row's gate.
pub struct RowGuard {
    id: Uuid,
    _gate: OwnedMutexGuard<()>,
}

impl RowGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

pub(crate) struct Table<T: Clone> {
    name: &'static str,
    /// Insertion-ordered so scans are deterministic within a process.
    rows: RwLock<IndexMap<Uuid, T>>,
    gates: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl<T: Clone> Table<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, rows: RwLock::new(IndexMap::new()), gates: RwLock::new(HashMap::new()) }
    }

    pub async fn get(&self, id: Uuid) -> Option<T> {
        self.rows.read().await.get(&id).cloned()
    }

    /// Bulk read preserving input order; missing ids are skipped.
    pub async fn get_many(&self, ids: &[Uuid]) -> Vec<T> {
        let rows = self.rows.read().await;
        ids.iter().filter_map(|id| rows.get(id).cloned()).collect()
    }

    pub async fn insert(&self, id: Uuid, value: T) {
        self.rows.write().await.insert(id, value);
    }

    /// Overwrite a row. Callers on mutation paths hold the row guard.
    pub async fn put(&self, id: Uuid, value: T) {
        self.rows.write().await.insert(id, value);
    }

    /// Take the row gate without waiting; `LockFailed` when another writer
    /// holds it. The gate exists independently of the row so callers may
    /// lock-then-insert.
    pub async fn lock_nowait(&self, id: Uuid) -> Result<RowGuard> {
        let gate = {
            let mut gates = self.gates.write().await;
            Arc::clone(gates.entry(id).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        match gate.try_lock_owned() {
            Ok(permit) => Ok(RowGuard { id, _gate: permit }),
            Err(_) => Err(Error::lock_failed(format!("{} row {id} is locked", self.name))),
        }
    }

    /// Atomically replace one row when the closure returns a successor.
    pub async fn update<F>(&self, id: Uuid, f: F) -> Option<T>
    where
        F: FnOnce(&T) -> Option<T>,
    {
        let mut rows = self.rows.write().await;
        let current = rows.get(&id)?;
        let next = f(current)?;
        rows.insert(id, next.clone());
        Some(next)
    }

    pub async fn scan<F>(&self, pred: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.rows.read().await.values().filter(|v| pred(v)).cloned().collect()
    }

    /// Atomically rewrite every row the closure returns a replacement for.
    /// Used by sweeps that must not interleave with row reads.
    pub async fn rewrite<F>(&self, mut f: F) -> Vec<T>
    where
        F: FnMut(&T) -> Option<T>,
    {
        let mut rows = self.rows.write().await;
        let mut changed = Vec::new();
        for value in rows.values_mut() {
            if let Some(next) = f(value) {
                *value = next.clone();
                changed.push(next);
            }
        }
        changed
    }
}
