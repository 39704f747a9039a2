// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::PlatformConfig;
use crate::context::Platform;
use crate::model::{
    Driver, DriverStatus, GeoPoint, PaymentMethod, Ride, RideStatus, Rider, Stop, Tenant,
    VehicleClass,
};
use crate::services::dispatch::DispatchService;
use crate::services::rides::{CreateRide, RideService};
use crate::services::trips::{EndTrip, TripService};
use crate::time::epoch_ms;

/// MG Road, Bengaluru.
pub const PICKUP: (f64, f64) = (12.9716, 77.5946);
/// Koramangala, Bengaluru.
pub const DROPOFF: (f64, f64) = (12.9352, 77.6245);

pub fn tenant() -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: "acme-rides".to_owned(),
        region: "blr".to_owned(),
        created_at: epoch_ms(),
    }
}

pub fn rider(tenant_id: Uuid) -> Rider {
    Rider {
        id: Uuid::new_v4(),
        tenant_id,
        phone: format!("+91{}", &Uuid::new_v4().simple().to_string()[..10]),
        name: Some("Asha".to_owned()),
        email: None,
        created_at: epoch_ms(),
    }
}

pub fn driver(tenant_id: Uuid, class: VehicleClass, status: DriverStatus) -> Driver {
    let now = epoch_ms();
    Driver {
        id: Uuid::new_v4(),
        tenant_id,
        phone: format!("+91{}", &Uuid::new_v4().simple().to_string()[..10]),
        name: Some("Ravi".to_owned()),
        vehicle_id: Some("KA01AB1234".to_owned()),
        vehicle_class: class,
        status,
        rating: 4.5,
        total_rides: 100,
        acceptance_rate: 90.0,
        created_at: now,
        updated_at: now,
    }
}

/// In-memory platform with test-friendly timings.
pub fn platform() -> Arc<Platform> {
    let config = PlatformConfig {
        lock_retry_delay: Duration::from_millis(5),
        location_flush_interval: Duration::from_millis(50),
        ..PlatformConfig::default()
    };
    Platform::in_memory(config)
}

/// A tenant, a rider, and one online economy driver indexed near the pickup.
pub struct World {
    pub tenant: Tenant,
    pub rider: Rider,
    pub driver: Driver,
}

pub async fn seed_world(platform: &Platform) -> World {
    let t = tenant();
    let r = rider(t.id);
    let mut d = driver(t.id, VehicleClass::Economy, DriverStatus::Online);
    d.rating = 4.5;
    d.acceptance_rate = 90.0;
    platform.store.insert_tenant(t.clone()).await;
    let _ = platform.store.insert_rider(r.clone()).await;
    let _ = platform.store.insert_driver(d.clone()).await;
    let point = GeoPoint { lat: 12.9720, lng: 77.5950 };
    let _ = platform.geo.add_driver(d.vehicle_class, d.id, point).await;
    platform
        .store
        .append_locations(vec![crate::model::DriverLocationSample {
            driver_id: d.id,
            lat: point.lat,
            lng: point.lng,
            heading: None,
            speed: None,
            accuracy: None,
            recorded_at: epoch_ms(),
        }])
        .await;
    World { tenant: t, rider: r, driver: d }
}

/// Drive a fresh ride through create → match → accept.
pub async fn assigned_ride(platform: &Arc<Platform>, world: &World) -> Ride {
    let rides = RideService::new(Arc::clone(platform));
    let dispatch = DispatchService::new(Arc::clone(platform));
    let created = match rides
        .create(CreateRide {
            tenant_id: world.tenant.id,
            rider_id: world.rider.id,
            pickup_lat: PICKUP.0,
            pickup_lng: PICKUP.1,
            pickup_address: None,
            dropoff_lat: DROPOFF.0,
            dropoff_lng: DROPOFF.1,
            dropoff_address: None,
            tier: Some(VehicleClass::Economy),
            payment_method: Some(PaymentMethod::Cash),
        })
        .await
    {
        Ok(r) => r,
        Err(e) => unreachable!("seed ride must create: {e}"),
    };
    if let Err(e) = dispatch.find_drivers(created.id).await {
        unreachable!("seed matching must run: {e}");
    }
    match dispatch.accept(created.id, world.driver.id).await {
        Ok(r) => r,
        Err(e) => unreachable!("seed accept must win: {e}"),
    }
}

/// Drive a ride all the way to a completed trip (5.0 km, 20 min, fare 147).
pub async fn completed_trip(
    platform: &Arc<Platform>,
    world: &World,
) -> (Ride, crate::model::Trip) {
    let rides = RideService::new(Arc::clone(platform));
    let trips = TripService::new(Arc::clone(platform));
    let ride = assigned_ride(platform, world).await;
    for status in [RideStatus::DriverEnRoute, RideStatus::DriverArrived] {
        if let Err(e) = rides.progress(ride.id, status, None).await {
            unreachable!("seed progress must apply: {e}");
        }
    }
    let trip = match trips.start(ride.id).await {
        Ok(t) => t,
        Err(e) => unreachable!("seed trip must start: {e}"),
    };
    let trip = match trips
        .end(
            trip.id,
            EndTrip {
                actual_distance_km: Some(5.0),
                actual_duration_mins: Some(20),
                route_polyline: None,
            },
        )
        .await
    {
        Ok(t) => t,
        Err(e) => unreachable!("seed trip must end: {e}"),
    };
    let ride = match platform.store.ride(ride.id).await {
        Some(r) => r,
        None => unreachable!("ride row must exist"),
    };
    (ride, trip)
}

pub fn ride(tenant_id: Uuid, rider_id: Uuid, tier: VehicleClass) -> Ride {
    let now = epoch_ms();
    Ride {
        id: Uuid::new_v4(),
        tenant_id,
        rider_id,
        driver_id: None,
        status: RideStatus::Requested,
        pickup: Stop { lat: PICKUP.0, lng: PICKUP.1, address: Some("MG Road".to_owned()) },
        dropoff: Stop { lat: DROPOFF.0, lng: DROPOFF.1, address: Some("Koramangala".to_owned()) },
        tier,
        payment_method: PaymentMethod::Cash,
        surge_multiplier: 1.0,
        estimated_fare: 109.0,
        estimated_distance_km: 4.9,
        estimated_duration_mins: 10,
        version: 1,
        created_at: now,
        updated_at: now,
        matched_at: None,
        cancelled_at: None,
        cancel_reason: None,
    }
}
