// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fence-token lease locks built on the cache's atomic SET-NX.
//!
//! Each acquisition mints a random token; release and extension are
//! check-and-act against that token, so a lock that expired and was
//! reacquired by another holder can never be released by the first.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::{Error, Result};

const KEY_PREFIX: &str = "lock:";

/// Factory for lease locks sharing one cache.
#[derive(Clone)]
pub struct LockManager {
    cache: Arc<Cache>,
}

impl LockManager {
    pub fn new(cache: Arc<Cache>) -> Self {
        Self { cache }
    }

    /// Single non-blocking attempt.
    pub async fn try_acquire(&self, name: &str, lease: Duration) -> Option<LockGuard> {
        let key = format!("{KEY_PREFIX}{name}");
        let token = Uuid::new_v4().to_string();
        if self.cache.set_nx(&key, &token, lease).await {
            Some(LockGuard {
                cache: Arc::clone(&self.cache),
                key,
                token,
                lease,
                released: false,
            })
        } else {
            None
        }
    }

    /// Bounded-retry acquisition; fails with `LockFailed` once exhausted.
    pub async fn acquire(
        &self,
        name: &str,
        lease: Duration,
        attempts: u32,
        retry_delay: Duration,
    ) -> Result<LockGuard> {
        for attempt in 0..attempts.max(1) {
            if let Some(guard) = self.try_acquire(name, lease).await {
                return Ok(guard);
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(retry_delay).await;
            }
        }
        Err(Error::lock_failed(format!("could not acquire lock {name}")))
    }
}

/// A held lease. Dropping without `release` schedules a best-effort
/// token-checked delete so abandoned guards do not pin the key for the
/// whole lease.
pub struct LockGuard {
    cache: Arc<Cache>,
    key: String,
    token: String,
    lease: Duration,
    released: bool,
}

impl LockGuard {
    /// Fence token bound to this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Push the lease out by one full lease duration; false when the lock is
    /// no longer ours.
    pub async fn extend(&self) -> bool {
        self.cache.extend_if_eq(&self.key, &self.token, self.lease).await
    }

    /// Release iff the fence token still matches. Returns whether this call
    /// actually freed the lock.
    pub async fn release(mut self) -> bool {
        self.released = true;
        self.cache.del_if_eq(&self.key, &self.token).await
    }

    /// Keep the lease alive until `stop` fires, extending at half-lease
    /// cadence. Used by long-running critical sections (payments).
    pub fn spawn_keepalive(&self, stop: CancellationToken) {
        let cache = Arc::clone(&self.cache);
        let key = self.key.clone();
        let token = self.token.clone();
        let lease = self.lease;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(lease / 2);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = timer.tick() => {}
                }
                if !cache.extend_if_eq(&key, &token, lease).await {
                    break;
                }
            }
        });
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Best effort only; the lease bounds the damage if no runtime is
        // available to run the delete.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let cache = Arc::clone(&self.cache);
            let key = std::mem::take(&mut self.key);
            let token = std::mem::take(&mut self.token);
            handle.spawn(async move {
                cache.del_if_eq(&key, &token).await;
            });
        }
    }
}

#[cfg(test)]
#[path = "lock_tests.rs"]
mod tests;
