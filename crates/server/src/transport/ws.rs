// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket endpoint for riders and drivers.
//!
//! Frames are `{event, data}` both ways. A connection must `register`
//! before subscribing to ride rooms; disconnect tears down room membership
//! but never cancels operations the socket already started.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use hail_core::model::UserType;
use hail_core::services::location::TelemetrySample;

use crate::realtime::rooms::ride_room;
use crate::state::Gateway;

/// `GET /v1/ws`: upgrade to the realtime channel.
pub async fn ws_handler(State(gw): State<Arc<Gateway>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(gw, socket))
}

async fn handle_socket(gw: Arc<Gateway>, socket: WebSocket) {
    let (tx, mut push_rx) = mpsc::unbounded_channel::<String>();
    let socket_id = gw.rooms.connect(tx).await;
    let (mut ws_tx, mut ws_rx) = socket.split();
    debug!(%socket_id, "socket connected");

    loop {
        tokio::select! {
            _ = gw.platform.shutdown.cancelled() => break,

            // Fabric -> client
            frame = push_rx.recv() => {
                match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Client -> commands
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_command(&gw, socket_id, text.as_str()).await {
                            if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    gw.rooms.disconnect(socket_id).await;
    debug!(%socket_id, "socket disconnected");
}

#[derive(Debug, Deserialize)]
struct RegisterCommand {
    user_id: Uuid,
    user_type: UserType,
}

#[derive(Debug, Deserialize)]
struct RideRoomCommand {
    ride_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct LocationCommand {
    lat: f64,
    lng: f64,
    #[serde(default)]
    heading: Option<f64>,
    #[serde(default)]
    speed: Option<f64>,
    #[serde(default)]
    accuracy: Option<f64>,
    #[serde(default)]
    ride_id: Option<Uuid>,
}

fn error_frame(message: impl Into<String>) -> serde_json::Value {
    json!({ "event": "error", "data": { "message": message.into() } })
}

/// Dispatch one inbound command; returns the reply frame, if any.
pub(crate) async fn handle_command(
    gw: &Arc<Gateway>,
    socket_id: Uuid,
    text: &str,
) -> Option<serde_json::Value> {
    let Ok(frame) = serde_json::from_str::<serde_json::Value>(text) else {
        return Some(error_frame("malformed frame"));
    };
    let event = frame.get("event").and_then(|v| v.as_str()).unwrap_or_default();
    let data = frame.get("data").cloned().unwrap_or(json!({}));

    match event {
        "register" => {
            let Ok(cmd) = serde_json::from_value::<RegisterCommand>(data) else {
                return Some(error_frame("register requires user_id and user_type"));
            };
            gw.rooms.register(socket_id, cmd.user_id, cmd.user_type).await;
            Some(json!({
                "event": "registered",
                "data": { "user_id": cmd.user_id, "user_type": cmd.user_type },
            }))
        }
        "subscribe:ride" => {
            if !gw.rooms.is_registered(socket_id).await {
                return Some(error_frame("register before subscribing"));
            }
            let Ok(cmd) = serde_json::from_value::<RideRoomCommand>(data) else {
                return Some(error_frame("subscribe:ride requires ride_id"));
            };
            gw.rooms.join(socket_id, &ride_room(cmd.ride_id)).await;
            Some(json!({ "event": "subscribed", "data": { "ride_id": cmd.ride_id } }))
        }
        "unsubscribe:ride" => {
            let Ok(cmd) = serde_json::from_value::<RideRoomCommand>(data) else {
                return Some(error_frame("unsubscribe:ride requires ride_id"));
            };
            gw.rooms.leave(socket_id, &ride_room(cmd.ride_id)).await;
            Some(json!({ "event": "unsubscribed", "data": { "ride_id": cmd.ride_id } }))
        }
        "driver:location:update" => {
            let Some(driver_id) = gw.rooms.user_of(socket_id).await else {
                return Some(error_frame("register before sending telemetry"));
            };
            let Ok(cmd) = serde_json::from_value::<LocationCommand>(data) else {
                return Some(error_frame("location update requires lat and lng"));
            };
            let sample = TelemetrySample {
                latitude: cmd.lat,
                longitude: cmd.lng,
                heading: cmd.heading,
                speed: cmd.speed,
                accuracy: cmd.accuracy,
            };
            let timestamp = match gw.location.ingest(driver_id, sample).await {
                Ok(ts) => ts,
                Err(e) => return Some(error_frame(e.message)),
            };
            // Riders watching this ride see the position immediately.
            if let Some(ride_id) = cmd.ride_id {
                gw.rooms
                    .emit(
                        &[ride_room(ride_id)],
                        "driver:location:update",
                        json!({
                            "ride_id": ride_id,
                            "driver_id": driver_id,
                            "lat": cmd.lat,
                            "lng": cmd.lng,
                            "heading": cmd.heading,
                            "speed": cmd.speed,
                        }),
                    )
                    .await;
            }
            Some(json!({ "event": "driver:location:ack", "data": { "timestamp": timestamp } }))
        }
        other => Some(error_frame(format!("unknown event {other}"))),
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
