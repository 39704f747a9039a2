// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch engine: candidate search, scored ranking, offer fan-out, and
//! race-free acceptance.
//!
//! Acceptance layers two exclusion primitives: the distributed ride lock
//! sheds concurrent attempts before they reach the store, and the ride row
//! gate (NOWAIT) is the authoritative mutual exclusion. Whatever happens,
//! at most one offer per ride ever reaches `accepted`.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::Platform;
use crate::error::{Error, Result};
use crate::events::{emit_notification, emit_ride_event, NotificationKind, RideEventKind};
use crate::model::{
    Driver, DriverStatus, OfferStatus, Ride, RideOffer, RideStatus,
};
use crate::services::location::driver_meta_key;
use crate::services::rides::{bump, publish_status_change, RideService};
use crate::sim::SimPhase;
use crate::store::with_backoff;
use crate::time::epoch_ms;

/// Scoring weights: proximity dominates, reliability splits the rest.
const WEIGHT_DISTANCE: f64 = 0.4;
const WEIGHT_RATING: f64 = 0.3;
const WEIGHT_ACCEPTANCE: f64 = 0.3;

/// A scored candidate with its open offer.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub score: f64,
    pub offer_id: Uuid,
    pub expires_at: u64,
}

/// Outcome of one matching round.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub ride_id: Uuid,
    pub drivers: Vec<MatchCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub fn score(distance_km: f64, rating: f64, acceptance_rate: f64) -> f64 {
    let distance_score = 1.0 / (1.0 + distance_km);
    let rating_score = rating / 5.0;
    let acceptance_score = acceptance_rate / 100.0;
    WEIGHT_DISTANCE * distance_score
        + WEIGHT_RATING * rating_score
        + WEIGHT_ACCEPTANCE * acceptance_score
}

pub struct DispatchService {
    platform: Arc<Platform>,
    rides: RideService,
}

impl DispatchService {
    pub fn new(platform: Arc<Platform>) -> Self {
        Self { rides: RideService::new(Arc::clone(&platform)), platform }
    }

    /// Find candidates for a ride and fan offers out to them.
    ///
    /// The MATCHING write is awaited before any offer is created so bus
    /// consumers never observe offers for a ride still reported REQUESTED.
    pub async fn find_drivers(&self, ride_id: Uuid) -> Result<MatchOutcome> {
        let ride = self.rides.get(ride_id).await?;
        if !matches!(ride.status, RideStatus::Requested | RideStatus::Matching) {
            return Err(Error::invalid_transition(ride.status, RideStatus::Matching));
        }
        let ride = self.rides.mark_matching(ride_id).await?;

        let hits = self
            .platform
            .geo
            .nearby(
                ride.tier,
                ride.pickup.point(),
                self.platform.config.search_radius_km,
                self.platform.config.max_candidates,
            )
            .await?;

        let ids: Vec<Uuid> = hits.iter().map(|(id, _)| *id).collect();
        let drivers = self.platform.store.drivers(&ids).await;

        let mut scored: Vec<(Driver, f64, f64)> = Vec::new();
        for driver in drivers {
            // The index may lag; the canonical status lives in the store.
            if driver.status != DriverStatus::Online || driver.tenant_id != ride.tenant_id {
                continue;
            }
            let Some((_, distance)) = hits.iter().find(|(id, _)| *id == driver.id) else {
                continue;
            };
            let s = score(*distance, driver.rating, driver.acceptance_rate);
            scored.push((driver, *distance, s));
        }
        // Deterministic order: score descending, then driver id.
        scored.sort_by(|a, b| b.2.total_cmp(&a.2).then_with(|| a.0.id.cmp(&b.0.id)));

        if scored.is_empty() {
            let ride = self.rides.revert_to_requested(ride_id).await?;
            debug!(ride_id = %ride.id, "matching found no candidates");
            return Ok(MatchOutcome {
                ride_id,
                drivers: Vec::new(),
                reason: Some("no drivers available".to_owned()),
            });
        }

        let now = epoch_ms();
        let expires_at = now + self.platform.config.offer_ttl.as_millis() as u64;
        let mut candidates = Vec::with_capacity(scored.len());
        for (driver, distance_km, s) in scored {
            let offer = RideOffer {
                id: Uuid::new_v4(),
                ride_id,
                driver_id: driver.id,
                status: OfferStatus::Pending,
                offered_at: now,
                expires_at,
                responded_at: None,
                decline_reason: None,
            };
            // Insert-if-absent: a retried round never duplicates an open
            // offer, while settled (non-accepted) offers are re-armed.
            let Some(offer) = self.platform.store.upsert_offer(offer).await else {
                continue;
            };
            emit_notification(
                &self.platform.bus,
                driver.id,
                NotificationKind::RideOffer,
                json!({
                    "offer_id": offer.id,
                    "ride_id": ride_id,
                    "expires_at": offer.expires_at,
                    "pickup": ride.pickup,
                    "estimated_fare": ride.estimated_fare,
                }),
            )
            .await;
            candidates.push(MatchCandidate {
                driver_id: driver.id,
                distance_km,
                score: s,
                offer_id: offer.id,
                expires_at: offer.expires_at,
            });
        }

        info!(ride_id = %ride.id, offers = candidates.len(), "offer fan-out complete");
        Ok(MatchOutcome { ride_id, drivers: candidates, reason: None })
    }

    /// Race-free acceptance. Exactly one concurrent caller wins; the rest
    /// observe Conflict.
    pub async fn accept(&self, ride_id: Uuid, driver_id: Uuid) -> Result<Ride> {
        // Shed concurrent attempts before they queue on the row gate.
        let lock = self
            .platform
            .locks
            .acquire(
                &format!("ride:{ride_id}"),
                self.platform.config.ride_lock_lease,
                self.platform.config.lock_attempts,
                self.platform.config.lock_retry_delay,
            )
            .await?;

        let result = self.accept_locked(ride_id, driver_id).await;

        // Fence-checked release; a lapsed lease stays untouched.
        if !lock.release().await {
            warn!(ride_id = %ride_id, "ride lock lease lapsed before release");
        }

        let (ride, driver) = result?;

        // Post-commit side effects.
        self.platform.geo.remove_driver(driver.vehicle_class, driver.id).await;
        self.platform.cache.del(&driver_meta_key(driver.id)).await;

        publish_status_change(
            &self.platform,
            &ride,
            RideStatus::Matching,
            Some((
                RideEventKind::DriverAssigned,
                json!({ "driver_id": driver.id, "matched_at": ride.matched_at }),
            )),
        )
        .await;
        emit_notification(
            &self.platform.bus,
            ride.rider_id,
            NotificationKind::DriverAssigned,
            json!({
                "ride_id": ride.id,
                "driver_id": driver.id,
                "driver_name": driver.name,
                "vehicle_id": driver.vehicle_id,
                "rating": driver.rating,
            }),
        )
        .await;

        self.platform
            .sim
            .start(self.platform.sim_deps(), &ride, &driver, SimPhase::ToPickup)
            .await;

        info!(ride_id = %ride.id, driver_id = %driver.id, "driver assigned");
        Ok(ride)
    }

    /// The transactional heart of acceptance: both row gates held, all four
    /// writes applied together.
    async fn accept_locked(&self, ride_id: Uuid, driver_id: Uuid) -> Result<(Ride, Driver)> {
        let store = &self.platform.store;

        let _ride_guard = store
            .lock_ride_nowait(ride_id)
            .await
            .map_err(|_| Error::conflict("ride is locked by another operation"))?;
        let mut ride =
            store.ride(ride_id).await.ok_or_else(|| Error::not_found("ride", ride_id))?;
        if ride.status != RideStatus::Matching {
            if ride.driver_id.is_some() {
                return Err(Error::conflict("ride already assigned"));
            }
            return Err(Error::invalid_transition(ride.status, RideStatus::DriverAssigned));
        }

        let _driver_guard = store
            .lock_driver_nowait(driver_id)
            .await
            .map_err(|_| Error::conflict("driver unavailable"))?;
        let mut driver = store
            .driver(driver_id)
            .await
            .ok_or_else(|| Error::conflict("driver unavailable"))?;
        if driver.status != DriverStatus::Online {
            return Err(Error::conflict("driver unavailable"));
        }

        let mut offer = store
            .offer_for(ride_id, driver_id)
            .await
            .ok_or_else(|| Error::conflict("no offer for this driver"))?;
        if offer.status != OfferStatus::Pending {
            return Err(Error::conflict(format!("offer is {}", offer.status.as_str())));
        }

        let now = epoch_ms();
        ride.status = RideStatus::DriverAssigned;
        ride.driver_id = Some(driver_id);
        ride.matched_at = Some(now);
        bump(&mut ride);

        driver.status = DriverStatus::Busy;
        driver.updated_at = now;

        offer.status = OfferStatus::Accepted;
        offer.responded_at = Some(now);

        store.put_ride(ride.clone()).await;
        store.put_driver(driver.clone()).await;
        store.put_offer(offer).await;
        for mut other in store.offers_by_ride(ride_id).await {
            if other.driver_id != driver_id && other.status == OfferStatus::Pending {
                other.status = OfferStatus::Cancelled;
                other.responded_at = Some(now);
                store.put_offer(other).await;
            }
        }

        Ok((ride, driver))
    }

    /// Decline an offer; the driver's acceptance rate is recomputed off the
    /// hot path.
    pub async fn decline(
        &self,
        ride_id: Uuid,
        driver_id: Uuid,
        reason: Option<String>,
    ) -> Result<RideOffer> {
        let mut offer = self
            .platform
            .store
            .offer_for(ride_id, driver_id)
            .await
            .ok_or_else(|| Error::not_found("offer", format!("{ride_id}/{driver_id}")))?;
        if offer.status != OfferStatus::Pending {
            return Err(Error::conflict(format!("offer is {}", offer.status.as_str())));
        }
        offer.status = OfferStatus::Declined;
        offer.responded_at = Some(epoch_ms());
        offer.decline_reason = reason;
        self.platform.store.put_offer(offer.clone()).await;

        self.spawn_acceptance_rate_refresh(driver_id);

        // When the last open offer goes away, hand the ride back to the
        // caller for another round.
        let open = self
            .platform
            .store
            .offers_by_ride(ride_id)
            .await
            .into_iter()
            .any(|o| o.status == OfferStatus::Pending);
        if !open {
            if let Err(e) = self.rides.revert_to_requested(ride_id).await {
                debug!(ride_id = %ride_id, err = %e, "revert after final decline skipped");
            }
        }
        Ok(offer)
    }

    /// Eventually-consistent acceptance-rate refresh from offer history.
    fn spawn_acceptance_rate_refresh(&self, driver_id: Uuid) {
        let store = Arc::clone(&self.platform.store);
        tokio::spawn(async move {
            let offers = store.offers_by_driver(driver_id).await;
            let settled: Vec<_> = offers
                .iter()
                .filter(|o| {
                    matches!(
                        o.status,
                        OfferStatus::Accepted | OfferStatus::Declined | OfferStatus::Expired
                    )
                })
                .collect();
            if settled.is_empty() {
                return;
            }
            let accepted =
                settled.iter().filter(|o| o.status == OfferStatus::Accepted).count() as f64;
            let rate = 100.0 * accepted / settled.len() as f64;

            let update = with_backoff("driver.acceptance_rate", || {
                let store = Arc::clone(&store);
                async move {
                    let _guard = store.lock_driver_nowait(driver_id).await?;
                    let mut driver = store
                        .driver(driver_id)
                        .await
                        .ok_or_else(|| Error::not_found("driver", driver_id))?;
                    driver.acceptance_rate = rate;
                    driver.updated_at = epoch_ms();
                    store.put_driver(driver).await;
                    Ok(())
                }
            })
            .await;
            if let Err(e) = update {
                debug!(driver_id = %driver_id, err = %e, "acceptance rate refresh skipped");
            }
        });
    }

    /// Periodic sweep flipping due pending offers to expired. The ride stays
    /// MATCHING; re-invoking matching is caller-driven.
    pub fn spawn_expiry_sweep(&self) {
        let platform = Arc::clone(&self.platform);
        let interval = platform.config.offer_sweep_interval;
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = platform.shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }
                let expired = platform.store.expire_due_offers(epoch_ms()).await;
                if !expired.is_empty() {
                    debug!(count = expired.len(), "expired stale offers");
                }
            }
        });
    }

    /// One immediate sweep pass, for callers that cannot wait for the timer.
    pub async fn expire_due_offers(&self) -> Vec<RideOffer> {
        self.platform.store.expire_due_offers(epoch_ms()).await
    }

    pub async fn pending_offers_for_driver(&self, driver_id: Uuid) -> Vec<RideOffer> {
        self.platform.store.pending_offers_for_driver(driver_id, epoch_ms()).await
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
