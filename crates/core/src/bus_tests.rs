// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[tokio::test]
async fn each_group_sees_every_record() -> anyhow::Result<()> {
    let bus = EventBus::memory();
    let mut realtime = bus.subscribe(TOPIC_RIDE_EVENTS, "realtime").await?;
    let mut audit = bus.subscribe(TOPIC_RIDE_EVENTS, "audit").await?;

    bus.publish(TOPIC_RIDE_EVENTS, "tenant-1", json!({"n": 1})).await?;

    let a = realtime.recv().await;
    let b = audit.recv().await;
    assert!(a.is_some() && b.is_some());
    Ok(())
}

#[tokio::test]
async fn group_members_share_the_stream() -> anyhow::Result<()> {
    let bus = EventBus::memory();
    let mut m1 = bus.subscribe(TOPIC_NOTIFICATIONS, "realtime").await?;
    let mut m2 = bus.subscribe(TOPIC_NOTIFICATIONS, "realtime").await?;

    for i in 0..4 {
        bus.publish(TOPIC_NOTIFICATIONS, "user-1", json!({"i": i})).await?;
    }

    // Round-robin: two each, none duplicated.
    let mut seen = Vec::new();
    for _ in 0..2 {
        if let Some(r) = m1.recv().await {
            seen.push(r.payload["i"].as_i64());
        }
        if let Some(r) = m2.recv().await {
            seen.push(r.payload["i"].as_i64());
        }
    }
    seen.sort();
    assert_eq!(seen, vec![Some(0), Some(1), Some(2), Some(3)]);
    Ok(())
}

#[tokio::test]
async fn per_topic_order_is_preserved() -> anyhow::Result<()> {
    let bus = EventBus::memory();
    let mut sub = bus.subscribe(TOPIC_RIDE_EVENTS, "realtime").await?;

    for i in 0..10 {
        bus.publish(TOPIC_RIDE_EVENTS, "tenant-1", json!({"seq": i})).await?;
    }
    for i in 0..10 {
        let record = sub.recv().await;
        let Some(record) = record else {
            unreachable!("record {i} must be delivered");
        };
        assert_eq!(record.payload["seq"], i);
        assert_eq!(record.key, "tenant-1");
    }
    Ok(())
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped_not_an_error() -> anyhow::Result<()> {
    let bus = EventBus::memory();
    bus.publish(TOPIC_LOCATION_UPDATES, "tenant-1", json!({})).await?;
    let mut late = bus.subscribe(TOPIC_LOCATION_UPDATES, "realtime").await?;
    bus.publish(TOPIC_LOCATION_UPDATES, "tenant-1", json!({"late": true})).await?;
    let record = late.recv().await;
    assert_eq!(record.map(|r| r.payload["late"].as_bool()), Some(Some(true)));
    Ok(())
}

#[tokio::test]
async fn closed_members_are_pruned() -> anyhow::Result<()> {
    let bus = EventBus::memory();
    let gone = bus.subscribe(TOPIC_RIDE_EVENTS, "realtime").await?;
    let mut alive = bus.subscribe(TOPIC_RIDE_EVENTS, "realtime").await?;
    drop(gone);

    for i in 0..3 {
        bus.publish(TOPIC_RIDE_EVENTS, "t", json!({"i": i})).await?;
    }
    for i in 0..3 {
        let record = alive.recv().await;
        assert_eq!(record.map(|r| r.payload["i"].as_i64()), Some(Some(i)));
    }
    Ok(())
}
