// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process transactional store.
//!
//! Stands in for the relational collaborator: row tables with try-lock
//! gates (FOR UPDATE NOWAIT), unique secondary indexes (phones, payment
//! idempotency key, one offer per ride+driver, one trip per ride, one
//! payment per trip), and an append-only location history whose latest
//! sample per driver seeds geo-index restores.

mod retry;
mod table;

pub use retry::with_backoff;
pub use table::RowGuard;

use std::collections::HashMap;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::model::{
    Driver, DriverLocationSample, OfferStatus, Payment, Ride, RideOffer, RideStatus, Rider,
    Tenant, Trip,
};
use table::Table;

pub struct Store {
    tenants: Table<Tenant>,
    riders: Table<Rider>,
    drivers: Table<Driver>,
    rides: Table<Ride>,
    offers: Table<RideOffer>,
    trips: Table<Trip>,
    payments: Table<Payment>,

    rider_phones: RwLock<HashMap<String, Uuid>>,
    driver_phones: RwLock<HashMap<String, Uuid>>,
    offer_keys: RwLock<HashMap<(Uuid, Uuid), Uuid>>,
    trip_by_ride: RwLock<HashMap<Uuid, Uuid>>,
    payment_by_trip: RwLock<HashMap<Uuid, Uuid>>,
    payment_by_key: RwLock<HashMap<String, Uuid>>,

    locations: RwLock<Vec<DriverLocationSample>>,
    latest_location: RwLock<HashMap<Uuid, DriverLocationSample>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            tenants: Table::new("tenants"),
            riders: Table::new("riders"),
            drivers: Table::new("drivers"),
            rides: Table::new("rides"),
            offers: Table::new("ride_offers"),
            trips: Table::new("trips"),
            payments: Table::new("payments"),
            rider_phones: RwLock::new(HashMap::new()),
            driver_phones: RwLock::new(HashMap::new()),
            offer_keys: RwLock::new(HashMap::new()),
            trip_by_ride: RwLock::new(HashMap::new()),
            payment_by_trip: RwLock::new(HashMap::new()),
            payment_by_key: RwLock::new(HashMap::new()),
            locations: RwLock::new(Vec::new()),
            latest_location: RwLock::new(HashMap::new()),
        }
    }

    // -- Tenants --------------------------------------------------------------

    pub async fn insert_tenant(&self, tenant: Tenant) {
        self.tenants.insert(tenant.id, tenant).await;
    }

    pub async fn tenant(&self, id: Uuid) -> Option<Tenant> {
        self.tenants.get(id).await
    }

    // -- Riders ---------------------------------------------------------------

    pub async fn insert_rider(&self, rider: Rider) -> Result<()> {
        let mut phones = self.rider_phones.write().await;
        if phones.contains_key(&rider.phone) {
            return Err(Error::conflict(format!("phone {} already registered", rider.phone)));
        }
        phones.insert(rider.phone.clone(), rider.id);
        drop(phones);
        self.riders.insert(rider.id, rider).await;
        Ok(())
    }

    pub async fn rider(&self, id: Uuid) -> Option<Rider> {
        self.riders.get(id).await
    }

    // -- Drivers --------------------------------------------------------------

    pub async fn insert_driver(&self, driver: Driver) -> Result<()> {
        let mut phones = self.driver_phones.write().await;
        if phones.contains_key(&driver.phone) {
            return Err(Error::conflict(format!("phone {} already registered", driver.phone)));
        }
        phones.insert(driver.phone.clone(), driver.id);
        drop(phones);
        self.drivers.insert(driver.id, driver).await;
        Ok(())
    }

    pub async fn driver(&self, id: Uuid) -> Option<Driver> {
        self.drivers.get(id).await
    }

    /// Bulk load for candidate scoring.
    pub async fn drivers(&self, ids: &[Uuid]) -> Vec<Driver> {
        self.drivers.get_many(ids).await
    }

    pub async fn lock_driver_nowait(&self, id: Uuid) -> Result<RowGuard> {
        self.drivers.lock_nowait(id).await
    }

    /// Write a driver row; callers on transition paths hold the row guard.
    pub async fn put_driver(&self, driver: Driver) {
        self.drivers.put(driver.id, driver).await;
    }

    // -- Rides ----------------------------------------------------------------

    pub async fn insert_ride(&self, ride: Ride) {
        self.rides.insert(ride.id, ride).await;
    }

    pub async fn ride(&self, id: Uuid) -> Option<Ride> {
        self.rides.get(id).await
    }

    pub async fn lock_ride_nowait(&self, id: Uuid) -> Result<RowGuard> {
        self.rides.lock_nowait(id).await
    }

    /// Write a ride row; the caller holds the row guard and has already
    /// bumped `version`.
    pub async fn put_ride(&self, ride: Ride) {
        self.rides.put(ride.id, ride).await;
    }

    /// Rides for a rider, newest first, with optional status filter.
    pub async fn rides_by_rider(
        &self,
        rider_id: Uuid,
        status: Option<RideStatus>,
        limit: usize,
        offset: usize,
    ) -> Vec<Ride> {
        let mut rides = self
            .rides
            .scan(|r| r.rider_id == rider_id && status.map_or(true, |s| r.status == s))
            .await;
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rides.into_iter().skip(offset).take(limit).collect()
    }

    /// The rider's single non-terminal ride, if any.
    pub async fn current_ride_for_rider(&self, rider_id: Uuid) -> Option<Ride> {
        let mut rides = self
            .rides
            .scan(|r| r.rider_id == rider_id && !r.status.is_terminal())
            .await;
        rides.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rides.into_iter().next()
    }

    /// The driver's active ride (busy invariant: at most one).
    pub async fn active_ride_for_driver(&self, driver_id: Uuid) -> Option<Ride> {
        let mut rides = self
            .rides
            .scan(|r| r.driver_id == Some(driver_id) && r.status.occupies_driver())
            .await;
        rides.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rides.into_iter().next()
    }

    // -- Offers ---------------------------------------------------------------

    /// Offer upsert with insert-if-absent semantics on the open-offer key:
    /// no row for (ride, driver) inserts; an open (pending) or accepted row
    /// is left untouched and reported as `None`; a settled non-accepted row
    /// is re-armed in place with the candidate's fresh expiry, keeping one
    /// row per (ride, driver).
    pub async fn upsert_offer(&self, candidate: RideOffer) -> Option<RideOffer> {
        let mut keys = self.offer_keys.write().await;
        if let Some(&existing_id) = keys.get(&(candidate.ride_id, candidate.driver_id)) {
            return self
                .offers
                .update(existing_id, |existing| match existing.status {
                    OfferStatus::Pending | OfferStatus::Accepted => None,
                    OfferStatus::Declined | OfferStatus::Expired | OfferStatus::Cancelled => {
                        let mut rearmed = existing.clone();
                        rearmed.status = OfferStatus::Pending;
                        rearmed.offered_at = candidate.offered_at;
                        rearmed.expires_at = candidate.expires_at;
                        rearmed.responded_at = None;
                        rearmed.decline_reason = None;
                        Some(rearmed)
                    }
                })
                .await;
        }
        keys.insert((candidate.ride_id, candidate.driver_id), candidate.id);
        drop(keys);
        self.offers.insert(candidate.id, candidate.clone()).await;
        Some(candidate)
    }

    pub async fn offer(&self, id: Uuid) -> Option<RideOffer> {
        self.offers.get(id).await
    }

    pub async fn offer_for(&self, ride_id: Uuid, driver_id: Uuid) -> Option<RideOffer> {
        let id = *self.offer_keys.read().await.get(&(ride_id, driver_id))?;
        self.offers.get(id).await
    }

    pub async fn offers_by_ride(&self, ride_id: Uuid) -> Vec<RideOffer> {
        self.offers.scan(|o| o.ride_id == ride_id).await
    }

    pub async fn offers_by_driver(&self, driver_id: Uuid) -> Vec<RideOffer> {
        self.offers.scan(|o| o.driver_id == driver_id).await
    }

    pub async fn pending_offers_for_driver(&self, driver_id: Uuid, now: u64) -> Vec<RideOffer> {
        let mut offers = self
            .offers
            .scan(|o| {
                o.driver_id == driver_id && o.status == OfferStatus::Pending && o.expires_at > now
            })
            .await;
        offers.sort_by(|a, b| a.offered_at.cmp(&b.offered_at));
        offers
    }

    pub async fn put_offer(&self, offer: RideOffer) {
        self.offers.put(offer.id, offer).await;
    }

    /// Atomically flip due pending offers to expired; returns the flipped
    /// rows.
    pub async fn expire_due_offers(&self, now: u64) -> Vec<RideOffer> {
        self.offers
            .rewrite(|o| {
                if o.status == OfferStatus::Pending && o.expires_at <= now {
                    let mut next = o.clone();
                    next.status = OfferStatus::Expired;
                    next.responded_at = Some(now);
                    Some(next)
                } else {
                    None
                }
            })
            .await
    }

    // -- Trips ----------------------------------------------------------------

    /// One trip per ride.
    pub async fn insert_trip(&self, trip: Trip) -> Result<()> {
        let mut by_ride = self.trip_by_ride.write().await;
        if by_ride.contains_key(&trip.ride_id) {
            return Err(Error::conflict(format!("trip already exists for ride {}", trip.ride_id)));
        }
        by_ride.insert(trip.ride_id, trip.id);
        drop(by_ride);
        self.trips.insert(trip.id, trip).await;
        Ok(())
    }

    pub async fn trip(&self, id: Uuid) -> Option<Trip> {
        self.trips.get(id).await
    }

    pub async fn trip_by_ride(&self, ride_id: Uuid) -> Option<Trip> {
        let id = *self.trip_by_ride.read().await.get(&ride_id)?;
        self.trips.get(id).await
    }

    pub async fn lock_trip_nowait(&self, id: Uuid) -> Result<RowGuard> {
        self.trips.lock_nowait(id).await
    }

    pub async fn put_trip(&self, trip: Trip) {
        self.trips.put(trip.id, trip).await;
    }

    // -- Payments -------------------------------------------------------------

    /// Insert enforcing the unique idempotency key and one payment per trip.
    pub async fn insert_payment(&self, payment: Payment) -> Result<()> {
        let mut by_key = self.payment_by_key.write().await;
        if by_key.contains_key(&payment.idempotency_key) {
            return Err(Error::new(
                ErrorCode::IdempotencyConflict,
                format!("idempotency key {} already used", payment.idempotency_key),
            ));
        }
        let mut by_trip = self.payment_by_trip.write().await;
        if by_trip.contains_key(&payment.trip_id) {
            return Err(Error::conflict(format!(
                "payment already exists for trip {}",
                payment.trip_id
            )));
        }
        by_key.insert(payment.idempotency_key.clone(), payment.id);
        by_trip.insert(payment.trip_id, payment.id);
        drop(by_trip);
        drop(by_key);
        self.payments.insert(payment.id, payment).await;
        Ok(())
    }

    pub async fn payment(&self, id: Uuid) -> Option<Payment> {
        self.payments.get(id).await
    }

    pub async fn payment_by_trip(&self, trip_id: Uuid) -> Option<Payment> {
        let id = *self.payment_by_trip.read().await.get(&trip_id)?;
        self.payments.get(id).await
    }

    pub async fn payment_by_key(&self, key: &str) -> Option<Payment> {
        let id = *self.payment_by_key.read().await.get(key)?;
        self.payments.get(id).await
    }

    pub async fn lock_payment_nowait(&self, id: Uuid) -> Result<RowGuard> {
        self.payments.lock_nowait(id).await
    }

    /// Write a payment row, re-pointing the idempotency index when the keyed
    /// retry path re-keys the row.
    pub async fn put_payment(&self, payment: Payment) {
        if let Some(existing) = self.payments.get(payment.id).await {
            if existing.idempotency_key != payment.idempotency_key {
                let mut by_key = self.payment_by_key.write().await;
                by_key.remove(&existing.idempotency_key);
                by_key.insert(payment.idempotency_key.clone(), payment.id);
            }
        }
        self.payments.put(payment.id, payment).await;
    }

    // -- Location history -----------------------------------------------------

    /// Bulk append; also refreshes the latest-sample projection.
    pub async fn append_locations(&self, samples: Vec<DriverLocationSample>) {
        if samples.is_empty() {
            return;
        }
        let mut latest = self.latest_location.write().await;
        for sample in &samples {
            match latest.get(&sample.driver_id) {
                Some(cur) if cur.recorded_at > sample.recorded_at => {}
                _ => {
                    latest.insert(sample.driver_id, sample.clone());
                }
            }
        }
        drop(latest);
        self.locations.write().await.extend(samples);
    }

    pub async fn latest_location(&self, driver_id: Uuid) -> Option<DriverLocationSample> {
        self.latest_location.read().await.get(&driver_id).cloned()
    }

    pub async fn location_history_len(&self) -> usize {
        self.locations.read().await.len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
