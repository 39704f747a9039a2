// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenant, rider, and driver registration plus driver availability.

use std::sync::Arc;

use serde::Deserialize;
use uuid::Uuid;

use crate::context::Platform;
use crate::error::{Error, Result};
use crate::model::{
    Driver, DriverStatus, GeoPoint, Rider, Tenant, VehicleClass,
};
use crate::services::location::driver_meta_key;
use crate::store::with_backoff;
use crate::time::epoch_ms;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRider {
    pub tenant_id: Uuid,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateDriver {
    pub tenant_id: Uuid,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vehicle_id: Option<String>,
    pub vehicle_class: VehicleClass,
}

pub struct RegistryService {
    platform: Arc<Platform>,
}

impl RegistryService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    pub async fn create_tenant(&self, req: CreateTenant) -> Result<Tenant> {
        if req.name.trim().is_empty() {
            return Err(Error::validation("tenant name must not be empty"));
        }
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: req.name,
            region: req.region,
            created_at: epoch_ms(),
        };
        self.platform.store.insert_tenant(tenant.clone()).await;
        Ok(tenant)
    }

    pub async fn tenant(&self, id: Uuid) -> Result<Tenant> {
        self.platform.store.tenant(id).await.ok_or_else(|| Error::not_found("tenant", id))
    }

    pub async fn create_rider(&self, req: CreateRider) -> Result<Rider> {
        self.tenant(req.tenant_id).await?;
        if req.phone.trim().is_empty() {
            return Err(Error::validation("phone must not be empty"));
        }
        let rider = Rider {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            phone: req.phone,
            name: req.name,
            email: req.email,
            created_at: epoch_ms(),
        };
        self.platform.store.insert_rider(rider.clone()).await?;
        Ok(rider)
    }

    pub async fn rider(&self, id: Uuid) -> Result<Rider> {
        self.platform.store.rider(id).await.ok_or_else(|| Error::not_found("rider", id))
    }

    pub async fn create_driver(&self, req: CreateDriver) -> Result<Driver> {
        self.tenant(req.tenant_id).await?;
        if req.phone.trim().is_empty() {
            return Err(Error::validation("phone must not be empty"));
        }
        let now = epoch_ms();
        let driver = Driver {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            phone: req.phone,
            name: req.name,
            vehicle_id: req.vehicle_id,
            vehicle_class: req.vehicle_class,
            status: DriverStatus::Offline,
            rating: 5.0,
            total_rides: 0,
            acceptance_rate: 100.0,
            created_at: now,
            updated_at: now,
        };
        self.platform.store.insert_driver(driver.clone()).await?;
        Ok(driver)
    }

    pub async fn driver(&self, id: Uuid) -> Result<Driver> {
        self.platform.store.driver(id).await.ok_or_else(|| Error::not_found("driver", id))
    }

    /// Availability toggle. Going online re-seeds the geo index from the
    /// latest known sample; going offline removes the driver. A busy driver
    /// cannot change status by hand; the lifecycle owns that edge.
    pub async fn set_driver_status(&self, id: Uuid, status: DriverStatus) -> Result<Driver> {
        let store = Arc::clone(&self.platform.store);
        let driver = with_backoff("driver.set_status", || {
            let store = Arc::clone(&store);
            async move {
                let _guard = store.lock_driver_nowait(id).await?;
                let mut driver =
                    store.driver(id).await.ok_or_else(|| Error::not_found("driver", id))?;
                if driver.status == DriverStatus::Busy && status != DriverStatus::Busy {
                    return Err(Error::conflict("driver is on an active ride"));
                }
                if status == DriverStatus::Busy {
                    return Err(Error::bad_request("busy is set by ride assignment only"));
                }
                driver.status = status;
                driver.updated_at = epoch_ms();
                store.put_driver(driver.clone()).await;
                Ok(driver)
            }
        })
        .await?;

        self.platform.cache.del(&driver_meta_key(id)).await;

        match status {
            DriverStatus::Online => {
                if let Some(sample) = self.platform.store.latest_location(id).await {
                    let point = GeoPoint { lat: sample.lat, lng: sample.lng };
                    let _ = self
                        .platform
                        .geo
                        .add_driver(driver.vehicle_class, id, point)
                        .await;
                }
            }
            DriverStatus::Offline => {
                self.platform.geo.remove_driver(driver.vehicle_class, id).await;
            }
            DriverStatus::Busy => {}
        }
        Ok(driver)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
