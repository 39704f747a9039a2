// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Linear-backoff retry for row-lock contention.

use std::future::Future;
use std::time::Duration;

use crate::error::{ErrorCode, Result};

/// Retry delays; one entry per retry after the initial attempt.
const BACKOFF_MS: [u64; 3] = [100, 200, 300];

/// Run `op`, retrying on `LockFailed` with linear backoff. Semantic
/// conflicts (wrong state, already assigned) are not retried; re-running
/// cannot change their outcome.
pub async fn with_backoff<T, F, Fut>(name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.code == ErrorCode::LockFailed && attempt < BACKOFF_MS.len() => {
                let delay = BACKOFF_MS[attempt];
                attempt += 1;
                tracing::debug!(op = name, attempt, delay_ms = delay, "row busy, backing off");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
