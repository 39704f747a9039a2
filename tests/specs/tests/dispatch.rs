// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch scenarios: the acceptance race and offer expiry.

use std::sync::Arc;

use hail_core::error::ErrorCode;
use hail_core::model::{DriverStatus, OfferStatus, RideStatus, VehicleClass};
use hail_specs::{ride_request, scenario, seed_online_driver};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_drivers_racing_yield_one_assignment() -> anyhow::Result<()> {
    let s = scenario().await?;
    let rival =
        seed_online_driver(&s.gateway, s.tenant.id, VehicleClass::Economy, (12.9740, 77.5970))
            .await?;

    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    let outcome = s.gateway.dispatch.find_drivers(ride.id).await?;
    assert_eq!(outcome.drivers.len(), 2);

    let gateway_a = Arc::clone(&s.gateway);
    let gateway_b = Arc::clone(&s.gateway);
    let (ride_id, d1, d2) = (ride.id, s.driver.id, rival.id);
    let a = tokio::spawn(async move { gateway_a.dispatch.accept(ride_id, d1).await });
    let b = tokio::spawn(async move { gateway_b.dispatch.accept(ride_id, d2).await });
    let (a, b) = tokio::join!(a, b);
    let (a, b) = (a?, b?);

    // Exactly one 200; the other a recoverable 409.
    assert_eq!(
        usize::from(a.is_ok()) + usize::from(b.is_ok()),
        1,
        "exactly one acceptance must win"
    );
    let loser = match (&a, &b) {
        (Err(e), Ok(_)) | (Ok(_), Err(e)) => e,
        _ => anyhow::bail!("one side must lose"),
    };
    assert!(matches!(loser.code, ErrorCode::Conflict | ErrorCode::LockFailed));

    // Exactly one offer accepted, the loser's cancelled, one driver busy.
    let offers = s.platform.store.offers_by_ride(ride.id).await;
    assert_eq!(offers.iter().filter(|o| o.status == OfferStatus::Accepted).count(), 1);
    assert_eq!(offers.iter().filter(|o| o.status == OfferStatus::Cancelled).count(), 1);

    let winner_busy = [s.driver.id, rival.id]
        .into_iter()
        .map(|id| s.platform.store.driver(id))
        .collect::<Vec<_>>();
    let mut busy = 0;
    for fut in winner_busy {
        if fut.await.is_some_and(|d| d.status == DriverStatus::Busy) {
            busy += 1;
        }
    }
    assert_eq!(busy, 1);

    // The assigned ride names exactly one driver, forever.
    let assigned = s.gateway.rides.get(ride.id).await?;
    assert_eq!(assigned.status, RideStatus::DriverAssigned);
    assert!(assigned.driver_id.is_some());
    Ok(())
}

#[tokio::test]
async fn unanswered_offers_expire_and_rematch_rearms_them() -> anyhow::Result<()> {
    let s = scenario().await?;
    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    let outcome = s.gateway.dispatch.find_drivers(ride.id).await?;
    assert_eq!(outcome.drivers.len(), 1);

    // Nobody answers. Push the clock past the deadline and sweep.
    let offer = s
        .platform
        .store
        .offer_for(ride.id, s.driver.id)
        .await
        .ok_or_else(|| anyhow::anyhow!("offer missing"))?;
    let mut stale = offer.clone();
    stale.expires_at = hail_core::time::epoch_ms().saturating_sub(1);
    s.platform.store.put_offer(stale).await;

    let expired = s.gateway.dispatch.expire_due_offers().await;
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].status, OfferStatus::Expired);

    // The ride stays MATCHING; re-matching is the caller's move.
    let ride_row = s.gateway.rides.get(ride.id).await?;
    assert_eq!(ride_row.status, RideStatus::Matching);

    // A second round re-arms the same row rather than duplicating it.
    let second = s.gateway.dispatch.find_drivers(ride.id).await?;
    assert_eq!(second.drivers.len(), 1);
    let offers = s.platform.store.offers_by_ride(ride.id).await;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].id, offer.id);
    assert_eq!(offers[0].status, OfferStatus::Pending);

    // And the re-armed offer is acceptable.
    let assigned = s.gateway.dispatch.accept(ride.id, s.driver.id).await?;
    assert_eq!(assigned.status, RideStatus::DriverAssigned);
    Ok(())
}

#[tokio::test]
async fn no_candidates_returns_reason_and_reverts() -> anyhow::Result<()> {
    let s = scenario().await?;
    // Take the only driver off the map.
    s.gateway
        .registry
        .set_driver_status(s.driver.id, DriverStatus::Offline)
        .await?;

    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    let outcome = s.gateway.dispatch.find_drivers(ride.id).await?;
    assert!(outcome.drivers.is_empty());
    assert_eq!(outcome.reason.as_deref(), Some("no drivers available"));
    assert_eq!(s.gateway.rides.get(ride.id).await?.status, RideStatus::Requested);
    Ok(())
}
