// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ride lifecycle state machine.
//!
//! Every mutation follows the same discipline: take the ride row gate
//! (NOWAIT), validate the transition guard against the fresh row (never a
//! cached one), write `status, version + 1, updated_at`, then publish the
//! status change plus its semantic event keyed by tenant. Contended gates
//! retry with linear backoff except where a caller wants fail-fast.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::context::Platform;
use crate::error::{Error, Result};
use crate::events::{emit_notification, emit_ride_event, NotificationKind, RideEventKind};
use crate::geo::haversine_km;
use crate::model::{
    DriverStatus, GeoPoint, OfferStatus, PaymentMethod, Ride, RideStatus, Stop, VehicleClass,
};
use crate::services::fare;
use crate::services::location::driver_meta_key;
use crate::store::with_backoff;
use crate::time::epoch_ms;

/// Permitted transitions; rows of the lifecycle table.
pub fn can_transition(from: RideStatus, to: RideStatus) -> bool {
    use RideStatus::*;
    match (from, to) {
        (Requested, Matching) => true,
        (Matching, DriverAssigned) => true,
        (Matching, Requested) => true,
        (DriverAssigned, DriverEnRoute) => true,
        (DriverEnRoute, DriverArrived) => true,
        (DriverArrived, InProgress) => true,
        (InProgress, Completed) => true,
        // CANCELLED is reachable from any non-terminal state except a trip
        // already in progress.
        (from, Cancelled) => !from.is_terminal() && from != InProgress,
        _ => false,
    }
}

/// Bump the row version and freshness stamp before a write.
pub(crate) fn bump(ride: &mut Ride) {
    ride.version += 1;
    ride.updated_at = epoch_ms();
}

/// Publish `RIDE_STATUS_CHANGED` plus an optional semantic duplicate.
pub(crate) async fn publish_status_change(
    platform: &Platform,
    ride: &Ride,
    old: RideStatus,
    semantic: Option<(RideEventKind, serde_json::Value)>,
) {
    emit_ride_event(
        &platform.bus,
        ride,
        RideEventKind::RideStatusChanged,
        json!({ "old": old, "new": ride.status }),
    )
    .await;
    if let Some((kind, data)) = semantic {
        emit_ride_event(&platform.bus, ride, kind, data).await;
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRide {
    pub tenant_id: Uuid,
    pub rider_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    #[serde(default)]
    pub pickup_address: Option<String>,
    pub dropoff_lat: f64,
    pub dropoff_lng: f64,
    #[serde(default)]
    pub dropoff_address: Option<String>,
    #[serde(default)]
    pub tier: Option<VehicleClass>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

pub struct RideService {
    platform: Arc<Platform>,
}

impl RideService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { platform }
    }

    pub async fn create(&self, req: CreateRide) -> Result<Ride> {
        validate_coord(req.pickup_lat, req.pickup_lng, "pickup")?;
        validate_coord(req.dropoff_lat, req.dropoff_lng, "dropoff")?;
        self.platform
            .store
            .tenant(req.tenant_id)
            .await
            .ok_or_else(|| Error::not_found("tenant", req.tenant_id))?;
        let rider = self
            .platform
            .store
            .rider(req.rider_id)
            .await
            .ok_or_else(|| Error::not_found("rider", req.rider_id))?;
        if rider.tenant_id != req.tenant_id {
            return Err(Error::new(
                crate::error::ErrorCode::Forbidden,
                "rider does not belong to this tenant",
            ));
        }

        let tier = req.tier.unwrap_or(VehicleClass::Economy);
        let pickup = GeoPoint::new(req.pickup_lat, req.pickup_lng);
        let dropoff = GeoPoint::new(req.dropoff_lat, req.dropoff_lng);
        let distance_km = haversine_km(pickup, dropoff);
        let duration_mins =
            ((distance_km / self.platform.config.average_speed_kmh * 60.0).ceil() as u64).max(1);

        let now = epoch_ms();
        let ride = Ride {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            rider_id: req.rider_id,
            driver_id: None,
            status: RideStatus::Requested,
            pickup: Stop {
                lat: req.pickup_lat,
                lng: req.pickup_lng,
                address: req.pickup_address,
            },
            dropoff: Stop {
                lat: req.dropoff_lat,
                lng: req.dropoff_lng,
                address: req.dropoff_address,
            },
            tier,
            payment_method: req.payment_method.unwrap_or(PaymentMethod::Cash),
            surge_multiplier: 1.0,
            estimated_fare: fare::estimate(tier, distance_km),
            estimated_distance_km: distance_km,
            estimated_duration_mins: duration_mins,
            version: 1,
            created_at: now,
            updated_at: now,
            matched_at: None,
            cancelled_at: None,
            cancel_reason: None,
        };
        self.platform.store.insert_ride(ride.clone()).await;

        emit_ride_event(
            &self.platform.bus,
            &ride,
            RideEventKind::RideCreated,
            json!({
                "rider_id": ride.rider_id,
                "tier": ride.tier,
                "estimated_fare": ride.estimated_fare,
            }),
        )
        .await;
        Ok(ride)
    }

    pub async fn get(&self, id: Uuid) -> Result<Ride> {
        self.platform.store.ride(id).await.ok_or_else(|| Error::not_found("ride", id))
    }

    pub async fn current_for_rider(&self, rider_id: Uuid) -> Option<Ride> {
        self.platform.store.current_ride_for_rider(rider_id).await
    }

    pub async fn list_for_rider(
        &self,
        rider_id: Uuid,
        status: Option<RideStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<Ride> {
        self.platform.store.rides_by_rider(rider_id, status, limit, offset).await
    }

    pub async fn current_for_driver(&self, driver_id: Uuid) -> Option<Ride> {
        self.platform.store.active_ride_for_driver(driver_id).await
    }

    /// REQUESTED → MATCHING. Re-entering MATCHING is a no-op so matching may
    /// be re-invoked; this write is awaited before any offer exists, keeping
    /// bus consumers consistent with the store.
    pub async fn mark_matching(&self, ride_id: Uuid) -> Result<Ride> {
        let store = Arc::clone(&self.platform.store);
        let outcome = with_backoff("ride.mark_matching", || {
            let store = Arc::clone(&store);
            async move {
                let _guard = store.lock_ride_nowait(ride_id).await?;
                let mut ride =
                    store.ride(ride_id).await.ok_or_else(|| Error::not_found("ride", ride_id))?;
                if ride.status == RideStatus::Matching {
                    return Ok((ride, None));
                }
                if !can_transition(ride.status, RideStatus::Matching) {
                    return Err(Error::invalid_transition(ride.status, RideStatus::Matching));
                }
                let old = ride.status;
                ride.status = RideStatus::Matching;
                bump(&mut ride);
                store.put_ride(ride.clone()).await;
                Ok((ride, Some(old)))
            }
        })
        .await?;

        let (ride, old) = outcome;
        if let Some(old) = old {
            publish_status_change(&self.platform, &ride, old, None).await;
        }
        Ok(ride)
    }

    /// MATCHING → REQUESTED when matching found nobody or every offer was
    /// declined. Quietly keeps the current row on a lost race.
    pub async fn revert_to_requested(&self, ride_id: Uuid) -> Result<Ride> {
        let store = Arc::clone(&self.platform.store);
        let outcome = with_backoff("ride.revert_to_requested", || {
            let store = Arc::clone(&store);
            async move {
                let _guard = store.lock_ride_nowait(ride_id).await?;
                let mut ride =
                    store.ride(ride_id).await.ok_or_else(|| Error::not_found("ride", ride_id))?;
                if ride.status != RideStatus::Matching {
                    return Ok((ride, None));
                }
                let old = ride.status;
                ride.status = RideStatus::Requested;
                bump(&mut ride);
                store.put_ride(ride.clone()).await;
                Ok((ride, Some(old)))
            }
        })
        .await?;

        let (ride, old) = outcome;
        if let Some(old) = old {
            publish_status_change(&self.platform, &ride, old, None).await;
        }
        Ok(ride)
    }

    /// Driver progress updates: DRIVER_ASSIGNED → DRIVER_EN_ROUTE and
    /// DRIVER_EN_ROUTE → DRIVER_ARRIVED. Other targets belong to their
    /// dedicated operations.
    pub async fn progress(
        &self,
        ride_id: Uuid,
        to: RideStatus,
        expected_version: Option<u64>,
    ) -> Result<Ride> {
        if !matches!(to, RideStatus::DriverEnRoute | RideStatus::DriverArrived) {
            return Err(Error::bad_request(format!(
                "status {to} is driven by its own operation, not a direct update"
            )));
        }

        let store = Arc::clone(&self.platform.store);
        let (ride, old) = with_backoff("ride.progress", || {
            let store = Arc::clone(&store);
            async move {
                let _guard = store.lock_ride_nowait(ride_id).await?;
                let mut ride =
                    store.ride(ride_id).await.ok_or_else(|| Error::not_found("ride", ride_id))?;
                if let Some(expected) = expected_version {
                    if ride.version != expected {
                        return Err(Error::conflict(format!(
                            "version mismatch: expected {expected}, found {}",
                            ride.version
                        )));
                    }
                }
                if !can_transition(ride.status, to) {
                    return Err(Error::invalid_transition(ride.status, to));
                }
                let old = ride.status;
                ride.status = to;
                bump(&mut ride);
                store.put_ride(ride.clone()).await;
                Ok((ride, old))
            }
        })
        .await?;

        publish_status_change(&self.platform, &ride, old, None).await;
        let kind = match to {
            RideStatus::DriverArrived => NotificationKind::RideDriverArrived,
            _ => NotificationKind::RideDriverEnRoute,
        };
        emit_notification(
            &self.platform.bus,
            ride.rider_id,
            kind,
            json!({ "ride_id": ride.id, "driver_id": ride.driver_id, "status": ride.status }),
        )
        .await;
        Ok(ride)
    }

    /// Cancel from any non-terminal state except IN_PROGRESS. When a driver
    /// was already assigned this also releases them: status back to online,
    /// geo index re-seeded from the last known sample, simulator stopped.
    pub async fn cancel(&self, ride_id: Uuid, reason: Option<String>) -> Result<Ride> {
        let store = Arc::clone(&self.platform.store);
        let (ride, old, released) = with_backoff("ride.cancel", || {
            let store = Arc::clone(&store);
            let reason = reason.clone();
            async move {
                let _guard = store.lock_ride_nowait(ride_id).await?;
                let mut ride =
                    store.ride(ride_id).await.ok_or_else(|| Error::not_found("ride", ride_id))?;
                if !can_transition(ride.status, RideStatus::Cancelled) {
                    return Err(Error::invalid_transition(ride.status, RideStatus::Cancelled));
                }
                let old = ride.status;

                // Release the driver inside the same critical section; both
                // rows commit together or the whole operation retries.
                let mut released = None;
                if old.occupies_driver() {
                    if let Some(driver_id) = ride.driver_id {
                        let _driver_guard = store.lock_driver_nowait(driver_id).await?;
                        if let Some(mut driver) = store.driver(driver_id).await {
                            driver.status = DriverStatus::Online;
                            driver.updated_at = epoch_ms();
                            store.put_driver(driver.clone()).await;
                            released = Some(driver);
                        }
                    }
                }

                let now = epoch_ms();
                ride.status = RideStatus::Cancelled;
                ride.cancelled_at = Some(now);
                ride.cancel_reason = reason;
                bump(&mut ride);
                store.put_ride(ride.clone()).await;
                Ok((ride, old, released))
            }
        })
        .await?;

        // Settle any open offers.
        for mut offer in self.platform.store.offers_by_ride(ride.id).await {
            if offer.status == OfferStatus::Pending {
                offer.status = OfferStatus::Cancelled;
                offer.responded_at = Some(epoch_ms());
                self.platform.store.put_offer(offer).await;
            }
        }

        if let Some(driver) = released {
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

        publish_status_change(
            &self.platform,
            &ride,
            old,
            Some((
                RideEventKind::RideCancelled,
                json!({ "reason": ride.cancel_reason, "cancelled_from": old }),
            )),
        )
        .await;
        Ok(ride)
    }
}

fn validate_coord(lat: f64, lng: f64, field: &str) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(Error::validation(format!("{field} coordinates out of range"))
            .with_details(json!({ "lat": lat, "lng": lng })));
    }
    Ok(())
}

#[cfg(test)]
#[path = "rides_tests.rs"]
mod tests;
