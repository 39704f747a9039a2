// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notifications-topic consumer: the one authoritative mapping from bus
//! notification kinds to socket events and target rooms.
//!
//! Delivery is at-least-once; emission into a room is stateless, so a
//! replayed record is harmless.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use hail_core::bus::TOPIC_NOTIFICATIONS;
use hail_core::context::Platform;
use hail_core::events::{Notification, NotificationKind};

use crate::realtime::rooms::{ride_room, user_room, Rooms};

const CONSUMER_GROUP: &str = "realtime-fabric";

/// Socket event name and target rooms for a notification. Adding a kind
/// means adding exactly one arm here.
pub fn route(note: &Notification) -> (&'static str, Vec<String>) {
    let ride = note
        .payload
        .get("ride_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(ride_room);
    let user = user_room(note.user_id);

    match note.kind {
        NotificationKind::RideOffer => ("ride:offer", vec![user]),
        NotificationKind::DriverAssigned => {
            ("ride:driver_assigned", with_ride(vec![user], ride))
        }
        NotificationKind::RideDriverEnRoute => ("ride:driver_en_route", with_ride(vec![], ride)),
        NotificationKind::RideDriverArrived => ("ride:driver_arrived", with_ride(vec![], ride)),
        NotificationKind::DriverLocation => {
            ("driver:location:update", with_ride(vec![user], ride))
        }
        NotificationKind::TripStarted => ("trip:started", with_ride(vec![], ride)),
        NotificationKind::TripCompleted => ("trip:completed", with_ride(vec![], ride)),
        NotificationKind::PaymentCompleted => ("payment:completed", vec![user]),
        NotificationKind::PaymentReceived => ("payment:received", vec![user]),
    }
}

fn with_ride(mut rooms: Vec<String>, ride: Option<String>) -> Vec<String> {
    if let Some(room) = ride {
        rooms.push(room);
    }
    rooms
}

/// Subscribe, then run the consumer until shutdown. Subscription happens
/// before this returns so startup traffic is never missed.
pub async fn spawn_notifications_consumer(
    platform: Arc<Platform>,
    rooms: Arc<Rooms>,
) -> hail_core::error::Result<()> {
    let mut sub = platform.bus.subscribe(TOPIC_NOTIFICATIONS, CONSUMER_GROUP).await?;
    info!("notifications consumer running");

    tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                _ = platform.shutdown.cancelled() => break,
                record = sub.recv() => record,
            };
            let Some(record) = record else {
                break;
            };
            let note: Notification = match serde_json::from_value(record.payload) {
                Ok(note) => note,
                Err(e) => {
                    warn!(err = %e, "dropping undecodable notification");
                    continue;
                }
            };
            let (event, targets) = route(&note);
            let delivered = rooms.emit(&targets, event, note.payload).await;
            debug!(event, delivered, "notification fanned out");
        }
        debug!("notifications consumer stopped");
    });
    Ok(())
}

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;
