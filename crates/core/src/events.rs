// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format event types for the three bus topics.
//!
//! This module is the canonical source for event payload shapes. Lifecycle
//! and location events are keyed by tenant; notifications are keyed by the
//! receiving user. Publication on these paths is best-effort: the store
//! write is already committed, so a bus failure is logged and swallowed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::{EventBus, TOPIC_NOTIFICATIONS, TOPIC_RIDE_EVENTS};
use crate::model::{DriverStatus, Ride, VehicleClass};
use crate::time::epoch_ms;

// -- Ride lifecycle events ----------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideEventKind {
    RideCreated,
    RideStatusChanged,
    DriverAssigned,
    TripStarted,
    TripCompleted,
    RideCancelled,
}

/// Value shape on the `ride-events` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideEvent {
    pub ride_id: Uuid,
    pub tenant: Uuid,
    pub event_type: RideEventKind,
    pub data: serde_json::Value,
    pub timestamp: u64,
}

// -- Location events ----------------------------------------------------------

/// Value shape on the `location-updates` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub driver_id: Uuid,
    pub tenant: Uuid,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub vehicle_class: VehicleClass,
    pub status: DriverStatus,
    pub timestamp: u64,
}

// -- Notifications ------------------------------------------------------------

/// Notification kinds consumed by the realtime fabric. The fabric owns the
/// one authoritative mapping from these to socket events and target rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    RideOffer,
    DriverAssigned,
    RideDriverEnRoute,
    RideDriverArrived,
    DriverLocation,
    TripStarted,
    TripCompleted,
    PaymentCompleted,
    PaymentReceived,
}

/// Value shape on the `notifications` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub payload: serde_json::Value,
    pub timestamp: u64,
}

// -- Best-effort publication --------------------------------------------------

/// Publish a lifecycle event keyed by tenant; failures are logged, never
/// surfaced.
pub async fn emit_ride_event(
    bus: &EventBus,
    ride: &Ride,
    kind: RideEventKind,
    data: serde_json::Value,
) {
    let event = RideEvent {
        ride_id: ride.id,
        tenant: ride.tenant_id,
        event_type: kind,
        data,
        timestamp: epoch_ms(),
    };
    let value = match serde_json::to_value(&event) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(ride_id = %ride.id, err = %e, "ride event encode failed");
            return;
        }
    };
    if let Err(e) = bus.publish(TOPIC_RIDE_EVENTS, &ride.tenant_id.to_string(), value).await {
        tracing::warn!(ride_id = %ride.id, event = ?kind, err = %e, "ride event publish failed");
    }
}

/// Publish a notification keyed by the receiving user; failures are logged,
/// never surfaced.
pub async fn emit_notification(
    bus: &EventBus,
    user_id: Uuid,
    kind: NotificationKind,
    payload: serde_json::Value,
) {
    let note = Notification { user_id, kind, payload, timestamp: epoch_ms() };
    let value = match serde_json::to_value(&note) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(user_id = %user_id, err = %e, "notification encode failed");
            return;
        }
    };
    if let Err(e) = bus.publish(TOPIC_NOTIFICATIONS, &user_id.to_string(), value).await {
        tracing::warn!(user_id = %user_id, kind = ?kind, err = %e, "notification publish failed");
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
