// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed TTL key-value cache with the atomic primitives the lock manager
//! needs (SET-NX, compare-and-delete, compare-and-extend).
//!
//! Expiry is lazy on read plus a periodic sweep. Values are stored as JSON
//! text so typed reads and writes stay symmetric across callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::time::epoch_ms;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Shared in-process KV cache.
pub struct Cache {
    entries: RwLock<HashMap<String, Entry>>,
}

impl Cache {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }

    /// Raw read; expired entries read as absent.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if entry.is_expired(epoch_ms()) {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Typed read. A present-but-undecodable value reads as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        serde_json::from_str(&raw).ok()
    }

    /// Pipelined multi-get, one result slot per key.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> Vec<Option<T>> {
        let now = epoch_ms();
        let entries = self.entries.read().await;
        keys.iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|e| !e.is_expired(now))
                    .and_then(|e| serde_json::from_str(&e.value).ok())
            })
            .collect()
    }

    pub async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| epoch_ms() + d.as_millis() as u64);
        self.entries.write().await.insert(key.to_owned(), Entry { value, expires_at });
    }

    /// Typed write-through. Serialization failure is a programmer error on a
    /// side-effect path; it is logged and dropped.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw, ttl).await,
            Err(e) => debug!(key, err = %e, "cache set skipped: unserializable value"),
        }
    }

    pub async fn del(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    pub async fn del_many(&self, keys: &[String]) {
        let mut entries = self.entries.write().await;
        for key in keys {
            entries.remove(key);
        }
    }

    /// Atomic SET-NX: claims the key iff absent (or expired). Returns whether
    /// the claim succeeded.
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> bool {
        let now = epoch_ms();
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_expired(now)) {
            return false;
        }
        entries.insert(
            key.to_owned(),
            Entry { value: value.to_owned(), expires_at: Some(now + ttl.as_millis() as u64) },
        );
        true
    }

    /// Atomic check-and-delete: removes the key iff its live value equals
    /// `expected`. Returns whether a deletion happened.
    pub async fn del_if_eq(&self, key: &str, expected: &str) -> bool {
        let now = epoch_ms();
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(e) if !e.is_expired(now) && e.value == expected => {
                entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Atomic check-and-extend: pushes the expiry out iff the live value
    /// equals `expected`.
    pub async fn extend_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> bool {
        let now = epoch_ms();
        let mut entries = self.entries.write().await;
        match entries.get_mut(key) {
            Some(e) if !e.is_expired(now) && e.value == expected => {
                e.expires_at = Some(now + ttl.as_millis() as u64);
                true
            }
            _ => false,
        }
    }

    /// Drop every expired entry.
    pub async fn purge_expired(&self) -> usize {
        let now = epoch_ms();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }

    /// Spawn the periodic expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, shutdown: CancellationToken) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(SWEEP_INTERVAL);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    debug!(purged, "cache sweep removed expired entries");
                }
            }
        });
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
