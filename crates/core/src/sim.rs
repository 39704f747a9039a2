// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver motion simulator.
//!
//! One cooperative task per active ride interpolates the driver toward the
//! pickup, then (after trip start) toward the dropoff, emitting synthetic
//! location events on every tick. The supervisor is keyed by driver id:
//! starting a task for a driver cancels the previous one first, and shutdown
//! stops all.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::bus::{EventBus, TOPIC_LOCATION_UPDATES};
use crate::events::{emit_notification, LocationUpdate, NotificationKind};
use crate::geo::{haversine_km, step_toward};
use crate::geo_index::GeoIndex;
use crate::model::{Driver, DriverLocationSample, DriverStatus, GeoPoint, Ride};
use crate::store::Store;
use crate::time::epoch_ms;

/// TO_PICKUP before trip start, TO_DROPOFF after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPhase {
    ToPickup,
    ToDropoff,
}

#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub tick: Duration,
    pub speed_kmh: f64,
    /// Arrival threshold in kilometers (50 m).
    pub arrival_km: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self { tick: Duration::from_secs(2), speed_kmh: 30.0, arrival_km: 0.05 }
    }
}

/// Handles a simulator task needs; cloned out of the platform context so
/// tasks never hold the context itself.
#[derive(Clone)]
pub struct SimDeps {
    pub store: Arc<Store>,
    pub bus: Arc<EventBus>,
    pub geo: Arc<GeoIndex>,
    pub config: SimConfig,
}

struct ActiveSim {
    ride_id: Uuid,
    cancel: CancellationToken,
}

/// Registry of running simulator tasks, keyed by driver.
pub struct SimSupervisor {
    tasks: Mutex<HashMap<Uuid, ActiveSim>>,
}

impl SimSupervisor {
    pub fn new() -> Self {
        Self { tasks: Mutex::new(HashMap::new()) }
    }

    /// Start (or replace) the simulation for this driver/ride pair.
    pub async fn start(&self, deps: SimDeps, ride: &Ride, driver: &Driver, phase: SimPhase) {
        let cancel = CancellationToken::new();
        {
            let mut tasks = self.tasks.lock().await;
            if let Some(prev) = tasks.insert(
                driver.id,
                ActiveSim { ride_id: ride.id, cancel: cancel.clone() },
            ) {
                prev.cancel.cancel();
            }
        }

        let task = SimTask {
            deps,
            ride: ride.clone(),
            driver_id: driver.id,
            tenant_id: driver.tenant_id,
            vehicle_class: driver.vehicle_class,
            rider_id: ride.rider_id,
            phase,
        };
        tokio::spawn(task.run(cancel));
    }

    /// Stop the driver's simulation, if any.
    pub async fn stop(&self, driver_id: Uuid) {
        if let Some(active) = self.tasks.lock().await.remove(&driver_id) {
            active.cancel.cancel();
        }
    }

    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (_, active) in tasks.drain() {
            active.cancel.cancel();
        }
    }

    /// The ride currently simulated for a driver. Finished tasks linger with
    /// a cancelled token until replaced or stopped.
    pub async fn ride_for(&self, driver_id: Uuid) -> Option<Uuid> {
        let tasks = self.tasks.lock().await;
        tasks
            .get(&driver_id)
            .filter(|a| !a.cancel.is_cancelled())
            .map(|a| a.ride_id)
    }
}

impl Default for SimSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

struct SimTask {
    deps: SimDeps,
    ride: Ride,
    driver_id: Uuid,
    tenant_id: Uuid,
    vehicle_class: crate::model::VehicleClass,
    rider_id: Uuid,
    phase: SimPhase,
}

impl SimTask {
    fn target(&self) -> GeoPoint {
        match self.phase {
            SimPhase::ToPickup => self.ride.pickup.point(),
            SimPhase::ToDropoff => self.ride.dropoff.point(),
        }
    }

    /// Best starting point: last persisted sample, then the live index, then
    /// the target itself (degenerate instant arrival).
    async fn start_point(&self) -> GeoPoint {
        if let Some(sample) = self.deps.store.latest_location(self.driver_id).await {
            return GeoPoint { lat: sample.lat, lng: sample.lng };
        }
        if let Some(point) = self.deps.geo.position(self.vehicle_class, self.driver_id).await {
            return point;
        }
        self.target()
    }

    async fn run(self, cancel: CancellationToken) {
        let target = self.target();
        let mut position = self.start_point().await;
        let step_base = self.deps.config.speed_kmh * self.deps.config.tick.as_secs_f64() / 3600.0;

        let mut timer = tokio::time::interval(self.deps.config.tick);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        timer.tick().await;

        debug!(driver_id = %self.driver_id, ride_id = %self.ride.id, phase = ?self.phase, "simulator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            let step = step_base * rand::random_range(0.9..1.1);
            position = step_toward(position, target, step);
            let arrived = haversine_km(position, target) <= self.deps.config.arrival_km;

            self.emit_tick(position, arrived).await;

            if arrived {
                debug!(driver_id = %self.driver_id, ride_id = %self.ride.id, phase = ?self.phase, "simulator reached target");
                cancel.cancel();
                break;
            }
        }
    }

    async fn emit_tick(&self, position: GeoPoint, arrived: bool) {
        let now = epoch_ms();

        // Live index first so matching sees the newest point.
        let _ = self
            .deps
            .geo
            .add_driver(self.vehicle_class, self.driver_id, position)
            .await;

        let update = LocationUpdate {
            driver_id: self.driver_id,
            tenant: self.tenant_id,
            lat: position.lat,
            lng: position.lng,
            heading: None,
            speed: Some(self.deps.config.speed_kmh),
            vehicle_class: self.vehicle_class,
            status: DriverStatus::Busy,
            timestamp: now,
        };
        if let Ok(value) = serde_json::to_value(&update) {
            let _ = self
                .deps
                .bus
                .publish(TOPIC_LOCATION_UPDATES, &self.tenant_id.to_string(), value)
                .await;
        }

        emit_notification(
            &self.deps.bus,
            self.rider_id,
            NotificationKind::DriverLocation,
            serde_json::json!({
                "ride_id": self.ride.id,
                "driver_id": self.driver_id,
                "lat": position.lat,
                "lng": position.lng,
                "arrived": arrived,
            }),
        )
        .await;

        // History append is fire-and-forget.
        let store = Arc::clone(&self.deps.store);
        let sample = DriverLocationSample {
            driver_id: self.driver_id,
            lat: position.lat,
            lng: position.lng,
            heading: None,
            speed: Some(self.deps.config.speed_kmh),
            accuracy: None,
            recorded_at: now,
        };
        tokio::spawn(async move {
            store.append_locations(vec![sample]).await;
        });
    }
}

#[cfg(test)]
#[path = "sim_tests.rs"]
mod tests;
