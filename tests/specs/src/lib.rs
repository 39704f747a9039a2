// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared harness for end-to-end scenario tests: an in-process platform on
//! the memory bus, seeded with one tenant, one rider, and one online driver
//! near the pickup.

use std::sync::Arc;

use uuid::Uuid;

use hail_core::config::PlatformConfig;
use hail_core::context::Platform;
use hail_core::model::{
    Driver, DriverStatus, GeoPoint, Rider, Tenant, VehicleClass,
};
use hail_core::services::registry::{CreateDriver, CreateRider, CreateTenant};
use hail_core::services::rides::CreateRide;
use hail_server::state::Gateway;

/// MG Road, Bengaluru.
pub const PICKUP: (f64, f64) = (12.9716, 77.5946);
/// Koramangala, Bengaluru.
pub const DROPOFF: (f64, f64) = (12.9352, 77.6245);
/// The seeded driver idles a few hundred meters from the pickup.
pub const DRIVER_POS: (f64, f64) = (12.9720, 77.5950);

pub struct Scenario {
    pub gateway: Arc<Gateway>,
    pub platform: Arc<Platform>,
    pub tenant: Tenant,
    pub rider: Rider,
    pub driver: Driver,
}

/// Stand up a platform with test-friendly timings and a seeded world.
pub async fn scenario() -> anyhow::Result<Scenario> {
    scenario_with(PlatformConfig {
        lock_retry_delay: std::time::Duration::from_millis(5),
        ..PlatformConfig::default()
    })
    .await
}

pub async fn scenario_with(config: PlatformConfig) -> anyhow::Result<Scenario> {
    let platform = Platform::in_memory(config);
    let gateway = Gateway::new(Arc::clone(&platform));

    let tenant = gateway
        .registry
        .create_tenant(CreateTenant { name: "acme-rides".to_owned(), region: "blr".to_owned() })
        .await?;
    let rider = gateway
        .registry
        .create_rider(CreateRider {
            tenant_id: tenant.id,
            phone: unique_phone(),
            name: Some("Asha".to_owned()),
            email: None,
        })
        .await?;
    let driver = seed_online_driver(&gateway, tenant.id, VehicleClass::Economy, DRIVER_POS).await?;

    Ok(Scenario { gateway, platform, tenant, rider, driver })
}

/// Register a driver, flip them online, and place them on the map.
pub async fn seed_online_driver(
    gateway: &Gateway,
    tenant_id: Uuid,
    class: VehicleClass,
    position: (f64, f64),
) -> anyhow::Result<Driver> {
    let driver = gateway
        .registry
        .create_driver(CreateDriver {
            tenant_id,
            phone: unique_phone(),
            name: Some("Ravi".to_owned()),
            vehicle_id: Some("KA01AB1234".to_owned()),
            vehicle_class: class,
        })
        .await?;
    let driver = gateway.registry.set_driver_status(driver.id, DriverStatus::Online).await?;
    gateway
        .platform
        .geo
        .add_driver(class, driver.id, GeoPoint { lat: position.0, lng: position.1 })
        .await?;
    gateway
        .platform
        .store
        .append_locations(vec![hail_core::model::DriverLocationSample {
            driver_id: driver.id,
            lat: position.0,
            lng: position.1,
            heading: None,
            speed: None,
            accuracy: None,
            recorded_at: hail_core::time::epoch_ms(),
        }])
        .await;
    Ok(driver)
}

pub fn ride_request(scenario: &Scenario) -> CreateRide {
    CreateRide {
        tenant_id: scenario.tenant.id,
        rider_id: scenario.rider.id,
        pickup_lat: PICKUP.0,
        pickup_lng: PICKUP.1,
        pickup_address: Some("MG Road".to_owned()),
        dropoff_lat: DROPOFF.0,
        dropoff_lng: DROPOFF.1,
        dropoff_address: Some("Koramangala".to_owned()),
        tier: Some(VehicleClass::Economy),
        payment_method: None,
    }
}

fn unique_phone() -> String {
    format!("+91{}", &Uuid::new_v4().simple().to_string()[..10])
}
