// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};

#[tokio::test(start_paused = true)]
async fn lock_failures_are_retried_then_succeed() -> anyhow::Result<()> {
    let calls = AtomicU32::new(0);
    let result = with_backoff("test", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if n < 2 {
                Err(Error::lock_failed("busy"))
            } else {
                Ok(n)
            }
        }
    })
    .await?;
    assert_eq!(result, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn retries_are_bounded() {
    let calls = AtomicU32::new(0);
    let result: Result<()> = with_backoff("test", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(Error::lock_failed("busy")) }
    })
    .await;
    assert!(result.is_err());
    // Initial attempt plus three retries.
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn semantic_conflicts_are_not_retried() {
    let calls = AtomicU32::new(0);
    let result: Result<()> = with_backoff("test", || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(Error::conflict("already assigned")) }
    })
    .await;
    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
