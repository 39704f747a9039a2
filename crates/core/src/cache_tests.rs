// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Probe {
    n: u32,
    s: String,
}

#[tokio::test]
async fn typed_round_trip() {
    let cache = Cache::new();
    let value = Probe { n: 7, s: "x".to_owned() };
    cache.set("k", &value, None).await;
    assert_eq!(cache.get::<Probe>("k").await, Some(value));
}

#[tokio::test]
async fn ttl_expires_reads() {
    let cache = Cache::new();
    cache.set("k", &1u32, Some(Duration::from_millis(20))).await;
    assert_eq!(cache.get::<u32>("k").await, Some(1));
    // TTLs are wall-clock, so sleep on the real clock.
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(cache.get::<u32>("k").await, None);
}

#[tokio::test]
async fn set_nx_claims_once() {
    let cache = Cache::new();
    assert!(cache.set_nx("lock", "a", Duration::from_secs(5)).await);
    assert!(!cache.set_nx("lock", "b", Duration::from_secs(5)).await);
    assert_eq!(cache.get_raw("lock").await.as_deref(), Some("a"));
}

#[tokio::test]
async fn set_nx_reclaims_expired_key() {
    let cache = Cache::new();
    assert!(cache.set_nx("lock", "a", Duration::from_millis(10)).await);
    std::thread::sleep(Duration::from_millis(20));
    assert!(cache.set_nx("lock", "b", Duration::from_secs(5)).await);
    assert_eq!(cache.get_raw("lock").await.as_deref(), Some("b"));
}

#[tokio::test]
async fn del_if_eq_only_matches_own_token() {
    let cache = Cache::new();
    cache.set_nx("lock", "token-1", Duration::from_secs(5)).await;
    assert!(!cache.del_if_eq("lock", "token-2").await);
    assert!(cache.del_if_eq("lock", "token-1").await);
    assert!(!cache.del_if_eq("lock", "token-1").await);
}

#[tokio::test]
async fn extend_if_eq_pushes_expiry() {
    let cache = Cache::new();
    cache.set_nx("lock", "t", Duration::from_millis(30)).await;
    assert!(cache.extend_if_eq("lock", "t", Duration::from_secs(5)).await);
    std::thread::sleep(Duration::from_millis(40));
    // Still held: the extension outlived the original lease.
    assert_eq!(cache.get_raw("lock").await.as_deref(), Some("t"));
    assert!(!cache.extend_if_eq("lock", "other", Duration::from_secs(5)).await);
}

#[tokio::test]
async fn get_many_preserves_slot_order() {
    let cache = Cache::new();
    cache.set("a", &1u32, None).await;
    cache.set("c", &3u32, None).await;
    let got = cache
        .get_many::<u32>(&["a".to_owned(), "b".to_owned(), "c".to_owned()])
        .await;
    assert_eq!(got, vec![Some(1), None, Some(3)]);
}

#[tokio::test]
async fn purge_removes_only_expired() {
    let cache = Cache::new();
    cache.set("stays", &1u32, None).await;
    cache.set("goes", &2u32, Some(Duration::from_millis(5))).await;
    std::thread::sleep(Duration::from_millis(10));
    assert_eq!(cache.purge_expired().await, 1);
    assert_eq!(cache.get::<u32>("stays").await, Some(1));
}
