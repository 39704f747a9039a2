// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Domain entities and their wire formats.
//!
//! Every entity carries an opaque UUID identity and epoch-millis timestamps.
//! Tenancy is an immutable partition key: riders, drivers, and rides belong
//! to exactly one tenant and never cross it.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// -- Geography ----------------------------------------------------------------

/// A bare coordinate pair (degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A named stop: coordinates plus an optional street address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Stop {
    pub fn point(&self) -> GeoPoint {
        GeoPoint { lat: self.lat, lng: self.lng }
    }
}

// -- Tenancy and people -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub region: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rider {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Globally unique.
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: u64,
}

/// Fare tier, doubling as the geo-index partition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Economy,
    Premium,
    Xl,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Economy => "economy",
            Self::Premium => "premium",
            Self::Xl => "xl",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Offline,
    Online,
    Busy,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
            Self::Busy => "busy",
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Globally unique.
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_id: Option<String>,
    pub vehicle_class: VehicleClass,
    pub status: DriverStatus,
    /// In [0, 5].
    pub rating: f64,
    pub total_rides: u64,
    /// In [0, 100].
    pub acceptance_rate: f64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Driver metadata hot-path projection, cached by the location ingest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DriverMeta {
    pub tenant_id: Uuid,
    pub status: DriverStatus,
    pub vehicle_class: VehicleClass,
}

impl From<&Driver> for DriverMeta {
    fn from(d: &Driver) -> Self {
        Self { tenant_id: d.tenant_id, status: d.status, vehicle_class: d.vehicle_class }
    }
}

// -- Rides --------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Matching,
    DriverAssigned,
    DriverEnRoute,
    DriverArrived,
    InProgress,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Matching => "MATCHING",
            Self::DriverAssigned => "DRIVER_ASSIGNED",
            Self::DriverEnRoute => "DRIVER_EN_ROUTE",
            Self::DriverArrived => "DRIVER_ARRIVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// States that count toward a driver's active set.
    pub fn occupies_driver(&self) -> bool {
        matches!(
            self,
            Self::DriverAssigned | Self::DriverEnRoute | Self::DriverArrived | Self::InProgress
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ride {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub rider_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_id: Option<Uuid>,
    pub status: RideStatus,
    pub pickup: Stop,
    pub dropoff: Stop,
    pub tier: VehicleClass,
    pub payment_method: PaymentMethod,
    /// Reserved; always 1.0 until surge lands.
    pub surge_multiplier: f64,
    pub estimated_fare: f64,
    pub estimated_distance_km: f64,
    pub estimated_duration_mins: u64,
    /// Strictly increases by 1 on every write.
    pub version: u64,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
}

// -- Offers -------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
    Cancelled,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// An offer that received or can no longer receive a driver response.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Time-boxed invitation sent to one candidate driver for one ride.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideOffer {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub status: OfferStatus,
    pub offered_at: u64,
    pub expires_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decline_reason: Option<String>,
}

// -- Trips and fares ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripStatus {
    Started,
    InProgress,
    Completed,
    Disputed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base: f64,
    pub distance: f64,
    pub time: f64,
    pub surge: f64,
    pub taxes: f64,
    pub total: f64,
    pub currency: String,
}

/// One-to-one with its ride; exists iff the ride reached IN_PROGRESS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub status: TripStatus,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_duration_mins: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_polyline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fare: Option<FareBreakdown>,
}

// -- Payments -----------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Wallet => "wallet",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub amount: f64,
    pub currency: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psp_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psp_response: Option<serde_json::Value>,
    /// Unique; binds a request to its outcome for 24 h.
    pub idempotency_key: String,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
}

// -- Telemetry ----------------------------------------------------------------

/// Append-only driver position sample; the latest sample per driver seeds the
/// geo index on restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocationSample {
    pub driver_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub recorded_at: u64,
}

/// Connected-client kind for realtime registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Rider,
    Driver,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rider => "rider",
            Self::Driver => "driver",
        }
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
