// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end lifecycle scenarios: the happy path with exact fare numbers,
//! and cancellation before arrival with driver release.

use hail_core::model::{DriverStatus, OfferStatus, PaymentMethod, PaymentStatus, RideStatus};
use hail_core::services::trips::EndTrip;
use hail_specs::{ride_request, scenario};

#[tokio::test]
async fn happy_path_from_request_to_payment() -> anyhow::Result<()> {
    let s = scenario().await?;

    // Request: REQUESTED with a ~4.9 km estimate and a 109-rupee quote.
    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    assert_eq!(ride.status, RideStatus::Requested);
    assert!((4.4..5.4).contains(&ride.estimated_distance_km));
    assert!((ride.estimated_fare - 109.0).abs() <= 1.0);

    // Matching: exactly one offer, to the one online economy driver.
    let outcome = s.gateway.dispatch.find_drivers(ride.id).await?;
    assert_eq!(outcome.drivers.len(), 1);
    assert_eq!(outcome.drivers[0].driver_id, s.driver.id);

    // Acceptance: ride assigned, driver busy.
    let ride = s.gateway.dispatch.accept(ride.id, s.driver.id).await?;
    assert_eq!(ride.status, RideStatus::DriverAssigned);
    let driver = s.gateway.registry.driver(s.driver.id).await?;
    assert_eq!(driver.status, DriverStatus::Busy);

    // Progress to pickup, then the trip runs to the dropoff.
    s.gateway.rides.progress(ride.id, RideStatus::DriverEnRoute, None).await?;
    s.gateway.rides.progress(ride.id, RideStatus::DriverArrived, None).await?;
    let trip = s.gateway.trips.start(ride.id).await?;
    let trip = s
        .gateway
        .trips
        .end(
            trip.id,
            EndTrip {
                actual_distance_km: Some(5.0),
                actual_duration_mins: Some(20),
                route_polyline: None,
            },
        )
        .await?;

    // Fare: (50 + 60 + 30) * 1.05 = 147.00.
    let fare = trip.fare.as_ref().ok_or_else(|| anyhow::anyhow!("fare missing"))?;
    assert_eq!(fare.total, 147.0);
    assert_eq!(fare.taxes, 7.0);

    // Cash payment completes immediately; the driver is credited 80%.
    let payment = s
        .gateway
        .payments
        .process(trip.id, PaymentMethod::Cash, "K1")
        .await?;
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.amount, 147.0);
    assert_eq!(hail_core::services::fare::driver_earnings(payment.amount), 117.60);

    // Terminal state: ride completed, driver released and matchable again.
    let ride = s.gateway.rides.get(ride.id).await?;
    assert_eq!(ride.status, RideStatus::Completed);
    let driver = s.gateway.registry.driver(s.driver.id).await?;
    assert_eq!(driver.status, DriverStatus::Online);
    assert_eq!(driver.total_rides, 1);
    Ok(())
}

#[tokio::test]
async fn cancel_before_arrival_releases_driver_and_reindexes() -> anyhow::Result<()> {
    let s = scenario().await?;
    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    s.gateway.dispatch.find_drivers(ride.id).await?;
    s.gateway.dispatch.accept(ride.id, s.driver.id).await?;
    s.gateway.rides.progress(ride.id, RideStatus::DriverEnRoute, None).await?;

    // Acceptance removed the driver from the candidate pool.
    assert!(s
        .platform
        .geo
        .position(s.driver.vehicle_class, s.driver.id)
        .await
        .is_none());

    let cancelled = s
        .gateway
        .rides
        .cancel(ride.id, Some("rider cancelled".to_owned()))
        .await?;
    assert_eq!(cancelled.status, RideStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let driver = s.gateway.registry.driver(s.driver.id).await?;
    assert_eq!(driver.status, DriverStatus::Online);
    // Back on the map at the last known location.
    assert!(s
        .platform
        .geo
        .position(s.driver.vehicle_class, s.driver.id)
        .await
        .is_some());
    // The simulator task for this driver is gone.
    assert_eq!(s.platform.sim.ride_for(s.driver.id).await, None);
    Ok(())
}

#[tokio::test]
async fn version_is_monotonic_across_the_lifecycle() -> anyhow::Result<()> {
    let s = scenario().await?;
    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    let mut last = ride.version;
    assert_eq!(last, 1);

    s.gateway.dispatch.find_drivers(ride.id).await?;
    for step in [
        s.gateway.rides.get(ride.id).await?.version,
        s.gateway.dispatch.accept(ride.id, s.driver.id).await?.version,
        s.gateway.rides.progress(ride.id, RideStatus::DriverEnRoute, None).await?.version,
        s.gateway.rides.progress(ride.id, RideStatus::DriverArrived, None).await?.version,
    ] {
        assert!(step >= last, "version regressed: {step} < {last}");
        last = step;
    }

    let trip = s.gateway.trips.start(ride.id).await?;
    let after_start = s.gateway.rides.get(ride.id).await?.version;
    assert_eq!(after_start, last + 1);
    s.gateway.trips.end(trip.id, EndTrip::default()).await?;
    let after_end = s.gateway.rides.get(ride.id).await?.version;
    assert_eq!(after_end, after_start + 1);
    Ok(())
}

#[tokio::test]
async fn accepted_ride_settles_every_other_offer() -> anyhow::Result<()> {
    let s = scenario().await?;
    let rival = hail_specs::seed_online_driver(
        &s.gateway,
        s.tenant.id,
        hail_core::model::VehicleClass::Economy,
        (12.9740, 77.5970),
    )
    .await?;

    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    let outcome = s.gateway.dispatch.find_drivers(ride.id).await?;
    assert_eq!(outcome.drivers.len(), 2);

    s.gateway.dispatch.accept(ride.id, s.driver.id).await?;

    let offers = s.platform.store.offers_by_ride(ride.id).await;
    let accepted: Vec<_> =
        offers.iter().filter(|o| o.status == OfferStatus::Accepted).collect();
    assert_eq!(accepted.len(), 1);
    assert_eq!(accepted[0].driver_id, s.driver.id);
    assert!(offers
        .iter()
        .filter(|o| o.driver_id == rival.id)
        .all(|o| o.status == OfferStatus::Cancelled));
    Ok(())
}
