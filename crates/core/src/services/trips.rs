// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Trip lifecycle: start at the pickup, end at the dropoff with fare
//! computation and driver release.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::context::Platform;
use crate::error::{Error, Result};
use crate::events::{emit_notification, emit_ride_event, NotificationKind, RideEventKind};
use crate::model::{
    DriverStatus, GeoPoint, Ride, RideStatus, Trip, TripStatus,
};
use crate::services::fare;
use crate::services::location::driver_meta_key;
use crate::services::rides::{bump, publish_status_change};
use crate::sim::SimPhase;
use crate::store::with_backoff;
use crate::time::epoch_ms;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EndTrip {
    #[serde(default)]
    pub actual_distance_km: Option<f64>,
    #[serde(default)]
    pub actual_duration_mins: Option<u64>,
    #[serde(default)]
    pub route_polyline: Option<String>,
}

pub struct TripService {
    platform: Arc<Platform>,
}

impl TripService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    pub async fn get(&self, id: Uuid) -> Result<Trip> {
        self.platform.store.trip(id).await.ok_or_else(|| Error::not_found("trip", id))
    }

    /// DRIVER_ARRIVED → IN_PROGRESS, creating the trip row.
    pub async fn start(&self, ride_id: Uuid) -> Result<Trip> {
        let store = Arc::clone(&self.platform.store);
        let (trip, ride) = with_backoff("trip.start", || {
            let store = Arc::clone(&store);
            async move {
                let _guard = store.lock_ride_nowait(ride_id).await?;
                let mut ride =
                    store.ride(ride_id).await.ok_or_else(|| Error::not_found("ride", ride_id))?;
                if ride.status != RideStatus::DriverArrived {
                    return Err(Error::invalid_transition(ride.status, RideStatus::InProgress));
                }
                let trip = Trip {
                    id: Uuid::new_v4(),
                    ride_id,
                    status: TripStatus::InProgress,
                    started_at: epoch_ms(),
                    ended_at: None,
                    actual_distance_km: None,
                    actual_duration_mins: None,
                    route_polyline: None,
                    fare: None,
                };
                store.insert_trip(trip.clone()).await?;
                ride.status = RideStatus::InProgress;
                bump(&mut ride);
                store.put_ride(ride.clone()).await;
                Ok((trip, ride))
            }
        })
        .await?;

        publish_status_change(
            &self.platform,
            &ride,
            RideStatus::DriverArrived,
            Some((RideEventKind::TripStarted, json!({ "trip_id": trip.id }))),
        )
        .await;
        emit_notification(
            &self.platform.bus,
            ride.rider_id,
            NotificationKind::TripStarted,
            json!({ "ride_id": ride.id, "trip_id": trip.id, "started_at": trip.started_at }),
        )
        .await;

        // Head for the dropoff now.
        if let Some(driver_id) = ride.driver_id {
            if let Some(driver) = self.platform.store.driver(driver_id).await {
                self.platform
                    .sim
                    .start(self.platform.sim_deps(), &ride, &driver, SimPhase::ToDropoff)
                    .await;
            }
        }
        Ok(trip)
    }

    /// Complete the trip: fare, terminal ride state, driver release.
    pub async fn end(&self, trip_id: Uuid, req: EndTrip) -> Result<Trip> {
        let store = Arc::clone(&self.platform.store);
        let (trip, ride, driver) = with_backoff("trip.end", || {
            let store = Arc::clone(&store);
            let req = req.clone();
            async move {
                let _trip_guard = store.lock_trip_nowait(trip_id).await?;
                let mut trip =
                    store.trip(trip_id).await.ok_or_else(|| Error::not_found("trip", trip_id))?;
                if trip.status != TripStatus::InProgress {
                    return Err(Error::conflict(format!(
                        "trip is not in progress (status {:?})",
                        trip.status
                    )));
                }

                let _ride_guard = store.lock_ride_nowait(trip.ride_id).await?;
                let mut ride = store
                    .ride(trip.ride_id)
                    .await
                    .ok_or_else(|| Error::not_found("ride", trip.ride_id))?;

                let now = epoch_ms();
                let distance_km = req
                    .actual_distance_km
                    .or(Some(ride.estimated_distance_km).filter(|d| *d > 0.0))
                    .unwrap_or(5.0);
                let duration_mins = req.actual_duration_mins.unwrap_or_else(|| {
                    (now.saturating_sub(trip.started_at)).div_ceil(60_000).max(1)
                });

                let breakdown = fare::compute(
                    ride.tier,
                    distance_km,
                    duration_mins as f64,
                    ride.surge_multiplier,
                );

                trip.status = TripStatus::Completed;
                trip.ended_at = Some(now);
                trip.actual_distance_km = Some(distance_km);
                trip.actual_duration_mins = Some(duration_mins);
                trip.route_polyline = req.route_polyline;
                trip.fare = Some(breakdown);

                ride.status = RideStatus::Completed;
                bump(&mut ride);

                let mut released = None;
                if let Some(driver_id) = ride.driver_id {
                    let _driver_guard = store.lock_driver_nowait(driver_id).await?;
                    if let Some(mut driver) = store.driver(driver_id).await {
                        driver.status = DriverStatus::Online;
                        driver.total_rides += 1;
                        driver.updated_at = now;
                        store.put_driver(driver.clone()).await;
                        released = Some(driver);
                    }
                }

                store.put_trip(trip.clone()).await;
                store.put_ride(ride.clone()).await;
                Ok((trip, ride, released))
            }
        })
        .await?;

        if let Some(driver) = &driver {
            self.platform.cache.del(&driver_meta_key(driver.id)).await;
            if let Some(sample) = self.platform.store.latest_location(driver.id).await {
                let _ = self
                    .platform
                    .geo
                    .add_driver(
                        driver.vehicle_class,
                        driver.id,
                        GeoPoint { lat: sample.lat, lng: sample.lng },
                    )
                    .await;
            }
            self.platform.sim.stop(driver.id).await;
        }

        self.publish_completion(&trip, &ride).await;
        Ok(trip)
    }

    async fn publish_completion(&self, trip: &Trip, ride: &Ride) {
        let total = trip.fare.as_ref().map_or(0.0, |f| f.total);
        publish_status_change(
            &self.platform,
            ride,
            RideStatus::InProgress,
            Some((
                RideEventKind::TripCompleted,
                json!({ "trip_id": trip.id, "fare": trip.fare }),
            )),
        )
        .await;
        emit_notification(
            &self.platform.bus,
            ride.rider_id,
            NotificationKind::TripCompleted,
            json!({ "ride_id": ride.id, "trip_id": trip.id, "fare": trip.fare }),
        )
        .await;
        if let Some(driver_id) = ride.driver_id {
            emit_notification(
                &self.platform.bus,
                driver_id,
                NotificationKind::TripCompleted,
                json!({
                    "ride_id": ride.id,
                    "trip_id": trip.id,
                    "earnings": fare::driver_earnings(total),
                }),
            )
            .await;
        }
    }
}

#[cfg(test)]
#[path = "trips_tests.rs"]
mod tests;
