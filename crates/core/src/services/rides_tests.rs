// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::bus::TOPIC_RIDE_EVENTS;
use crate::error::ErrorCode;
use crate::model::DriverStatus;
use crate::test_support as fx;

fn create_request(world: &fx::World) -> CreateRide {
    CreateRide {
        tenant_id: world.tenant.id,
        rider_id: world.rider.id,
        pickup_lat: fx::PICKUP.0,
        pickup_lng: fx::PICKUP.1,
        pickup_address: Some("MG Road".to_owned()),
        dropoff_lat: fx::DROPOFF.0,
        dropoff_lng: fx::DROPOFF.1,
        dropoff_address: None,
        tier: None,
        payment_method: None,
    }
}

#[yare::parameterized(
    requested_to_matching = { RideStatus::Requested, RideStatus::Matching, true },
    matching_to_assigned = { RideStatus::Matching, RideStatus::DriverAssigned, true },
    matching_back_to_requested = { RideStatus::Matching, RideStatus::Requested, true },
    assigned_to_en_route = { RideStatus::DriverAssigned, RideStatus::DriverEnRoute, true },
    en_route_to_arrived = { RideStatus::DriverEnRoute, RideStatus::DriverArrived, true },
    arrived_to_in_progress = { RideStatus::DriverArrived, RideStatus::InProgress, true },
    in_progress_to_completed = { RideStatus::InProgress, RideStatus::Completed, true },
    requested_to_cancelled = { RideStatus::Requested, RideStatus::Cancelled, true },
    en_route_to_cancelled = { RideStatus::DriverEnRoute, RideStatus::Cancelled, true },
    in_progress_to_cancelled = { RideStatus::InProgress, RideStatus::Cancelled, false },
    completed_to_cancelled = { RideStatus::Completed, RideStatus::Cancelled, false },
    cancelled_to_matching = { RideStatus::Cancelled, RideStatus::Matching, false },
    requested_to_in_progress = { RideStatus::Requested, RideStatus::InProgress, false },
    assigned_to_arrived = { RideStatus::DriverAssigned, RideStatus::DriverArrived, false },
    completed_to_completed = { RideStatus::Completed, RideStatus::Completed, false },
)]
fn transition_table(from: RideStatus, to: RideStatus, allowed: bool) {
    assert_eq!(can_transition(from, to), allowed);
}

#[tokio::test]
async fn create_computes_estimates() -> anyhow::Result<()> {
    let platform = fx::platform();
    let world = fx::seed_world(&platform).await;
    let service = RideService::new(Arc::clone(&platform));

    let ride = service.create(create_request(&world)).await?;
    assert_eq!(ride.status, RideStatus::Requested);
    assert_eq!(ride.version, 1);
    assert!((4.4..5.4).contains(&ride.estimated_distance_km));
    // Economy quote: 50 + distance * 12, whole rupees.
    assert!((ride.estimated_fare - 109.0).abs() <= 1.0);
    assert!(ride.estimated_duration_mins >= 1);
    assert_eq!(ride.surge_multiplier, 1.0);
    Ok(())
}

#[tokio::test]
async fn create_rejects_out_of_range_coordinates() {
    let platform = fx::platform();
    let service = RideService::new(Arc::clone(&platform));
    let mut req = CreateRide {
        tenant_id: Uuid::new_v4(),
        rider_id: Uuid::new_v4(),
        pickup_lat: 91.0,
        pickup_lng: 77.0,
        pickup_address: None,
        dropoff_lat: 12.9,
        dropoff_lng: 77.6,
        dropoff_address: None,
        tier: None,
        payment_method: None,
    };
    match service.create(req.clone()).await {
        Ok(_) => unreachable!("latitude 91 must be rejected"),
        Err(e) => assert_eq!(e.code, ErrorCode::Validation),
    }
    req.pickup_lat = 12.9;
    req.dropoff_lng = -190.0;
    match service.create(req).await {
        Ok(_) => unreachable!("longitude -190 must be rejected"),
        Err(e) => assert_eq!(e.code, ErrorCode::Validation),
    }
}

#[tokio::test]
async fn create_rejects_cross_tenant_rider() {
    let platform = fx::platform();
    let service = RideService::new(Arc::clone(&platform));
    let world = fx::seed_world(&platform).await;
    let other = fx::tenant();
    let mut req = create_request(&world);
    // Register a second tenant and point the request at it.
    platform.store.insert_tenant(other.clone()).await;
    req.tenant_id = other.id;

    match service.create(req).await {
        Ok(_) => unreachable!("cross-tenant rider must be rejected"),
        Err(e) => assert_eq!(e.code, ErrorCode::Forbidden),
    }
}

#[tokio::test]
async fn every_write_bumps_version_by_one() -> anyhow::Result<()> {
    let platform = fx::platform();
    let world = fx::seed_world(&platform).await;
    let service = RideService::new(Arc::clone(&platform));

    let ride = service.create(create_request(&world)).await?;
    assert_eq!(ride.version, 1);
    let ride = service.mark_matching(ride.id).await?;
    assert_eq!(ride.version, 2);
    // Re-entering MATCHING is a no-op, not a write.
    let ride = service.mark_matching(ride.id).await?;
    assert_eq!(ride.version, 2);
    let ride = service.revert_to_requested(ride.id).await?;
    assert_eq!(ride.version, 3);
    let ride = service.cancel(ride.id, Some("changed my mind".to_owned())).await?;
    assert_eq!(ride.version, 4);
    assert_eq!(ride.status, RideStatus::Cancelled);
    Ok(())
}

#[tokio::test]
async fn progress_enforces_expected_version() -> anyhow::Result<()> {
    let platform = fx::platform();
    let world = fx::seed_world(&platform).await;
    let service = RideService::new(Arc::clone(&platform));

    let ride = service.create(create_request(&world)).await?;
    // Drive to DRIVER_ASSIGNED by hand.
    {
        let _guard = platform.store.lock_ride_nowait(ride.id).await?;
        let mut r = ride.clone();
        r.status = RideStatus::DriverAssigned;
        r.driver_id = Some(world.driver.id);
        bump(&mut r);
        platform.store.put_ride(r).await;
    }

    let stale = service.progress(ride.id, RideStatus::DriverEnRoute, Some(99)).await;
    match stale {
        Ok(_) => unreachable!("stale version must conflict"),
        Err(e) => assert_eq!(e.code, ErrorCode::Conflict),
    }

    let fresh = service.progress(ride.id, RideStatus::DriverEnRoute, Some(2)).await?;
    assert_eq!(fresh.status, RideStatus::DriverEnRoute);
    assert_eq!(fresh.version, 3);
    Ok(())
}

#[tokio::test]
async fn progress_rejects_non_progress_targets() {
    let platform = fx::platform();
    let service = RideService::new(Arc::clone(&platform));
    let result = service.progress(Uuid::new_v4(), RideStatus::Completed, None).await;
    match result {
        Ok(_) => unreachable!("COMPLETED is not a progress target"),
        Err(e) => assert_eq!(e.code, ErrorCode::BadRequest),
    }
}

#[tokio::test]
async fn cancel_of_assigned_ride_releases_the_driver() -> anyhow::Result<()> {
    let platform = fx::platform();
    let world = fx::seed_world(&platform).await;
    let service = RideService::new(Arc::clone(&platform));

    let ride = service.create(create_request(&world)).await?;
    {
        let _ride_guard = platform.store.lock_ride_nowait(ride.id).await?;
        let _driver_guard = platform.store.lock_driver_nowait(world.driver.id).await?;
        let mut r = ride.clone();
        r.status = RideStatus::DriverEnRoute;
        r.driver_id = Some(world.driver.id);
        bump(&mut r);
        platform.store.put_ride(r).await;
        let mut d = world.driver.clone();
        d.status = DriverStatus::Busy;
        platform.store.put_driver(d).await;
        platform.geo.remove_driver(world.driver.vehicle_class, world.driver.id).await;
    }

    let cancelled = service.cancel(ride.id, Some("rider cancelled".to_owned())).await?;
    assert_eq!(cancelled.status, RideStatus::Cancelled);
    assert_eq!(cancelled.cancel_reason.as_deref(), Some("rider cancelled"));

    let driver = platform.store.driver(world.driver.id).await;
    assert_eq!(driver.map(|d| d.status), Some(DriverStatus::Online));
    // Geo index re-seeded from the last known sample.
    assert!(platform
        .geo
        .position(world.driver.vehicle_class, world.driver.id)
        .await
        .is_some());
    Ok(())
}

#[tokio::test]
async fn cancel_in_progress_is_rejected() -> anyhow::Result<()> {
    let platform = fx::platform();
    let world = fx::seed_world(&platform).await;
    let service = RideService::new(Arc::clone(&platform));

    let ride = service.create(create_request(&world)).await?;
    {
        let _guard = platform.store.lock_ride_nowait(ride.id).await?;
        let mut r = ride.clone();
        r.status = RideStatus::InProgress;
        r.driver_id = Some(world.driver.id);
        bump(&mut r);
        platform.store.put_ride(r).await;
    }

    match service.cancel(ride.id, None).await {
        Ok(_) => unreachable!("IN_PROGRESS must complete, never cancel"),
        Err(e) => assert_eq!(e.code, ErrorCode::InvalidStateTransition),
    }
    Ok(())
}

#[tokio::test]
async fn lifecycle_events_are_published_in_order() -> anyhow::Result<()> {
    let platform = fx::platform();
    let world = fx::seed_world(&platform).await;
    let service = RideService::new(Arc::clone(&platform));
    let mut events = platform.bus.subscribe(TOPIC_RIDE_EVENTS, "test").await?;

    let ride = service.create(create_request(&world)).await?;
    service.mark_matching(ride.id).await?;

    let first = events.recv().await;
    let Some(first) = first else {
        unreachable!("RIDE_CREATED must be published");
    };
    assert_eq!(first.payload["eventType"], "RIDE_CREATED");
    assert_eq!(first.key, world.tenant.id.to_string());

    let second = events.recv().await;
    let Some(second) = second else {
        unreachable!("RIDE_STATUS_CHANGED must follow");
    };
    assert_eq!(second.payload["eventType"], "RIDE_STATUS_CHANGED");
    assert_eq!(second.payload["data"]["new"], "MATCHING");
    Ok(())
}
