// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime fabric scenario over a real socket: offers and assignment
//! notifications reach the right connections.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use hail_server::realtime::consumer::spawn_notifications_consumer;
use hail_server::transport::build_router;
use hail_specs::{ride_request, scenario, Scenario};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(s: &Scenario) -> anyhow::Result<String> {
    spawn_notifications_consumer(Arc::clone(&s.platform), Arc::clone(&s.gateway.rooms)).await?;
    let router = build_router(Arc::clone(&s.gateway));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("ws://{addr}/v1/ws"))
}

async fn connect(url: &str) -> anyhow::Result<Socket> {
    let (socket, _) = connect_async(url).await?;
    Ok(socket)
}

async fn send(socket: &mut Socket, frame: serde_json::Value) -> anyhow::Result<()> {
    socket.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

/// Next JSON frame, bounded by a timeout.
async fn next_frame(socket: &mut Socket) -> anyhow::Result<serde_json::Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("socket closed"))??;
        if let Message::Text(text) = msg {
            return Ok(serde_json::from_str(text.as_str())?);
        }
    }
}

/// Frames until one matches the wanted event.
async fn wait_for(socket: &mut Socket, event: &str) -> anyhow::Result<serde_json::Value> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        let frame = next_frame(socket).await?;
        if frame["event"] == event {
            return Ok(frame);
        }
    }
    anyhow::bail!("no {event} frame before the deadline")
}

#[tokio::test]
async fn offers_and_assignment_flow_over_the_socket() -> anyhow::Result<()> {
    let s = scenario().await?;
    let url = serve(&s).await?;

    // Driver connection.
    let mut driver_ws = connect(&url).await?;
    send(
        &mut driver_ws,
        serde_json::json!({
            "event": "register",
            "data": { "user_id": s.driver.id, "user_type": "driver" },
        }),
    )
    .await?;
    let registered = next_frame(&mut driver_ws).await?;
    assert_eq!(registered["event"], "registered");

    // Rider connection.
    let mut rider_ws = connect(&url).await?;
    send(
        &mut rider_ws,
        serde_json::json!({
            "event": "register",
            "data": { "user_id": s.rider.id, "user_type": "rider" },
        }),
    )
    .await?;
    next_frame(&mut rider_ws).await?;

    // Request + match: the driver's socket gets the offer.
    let ride = s.gateway.rides.create(ride_request(&s)).await?;
    s.gateway.dispatch.find_drivers(ride.id).await?;
    let offer = wait_for(&mut driver_ws, "ride:offer").await?;
    assert_eq!(offer["data"]["ride_id"], ride.id.to_string());

    // The rider watches the ride room too.
    send(
        &mut rider_ws,
        serde_json::json!({ "event": "subscribe:ride", "data": { "ride_id": ride.id } }),
    )
    .await?;
    next_frame(&mut rider_ws).await?;

    // Acceptance lands on the rider's socket.
    s.gateway.dispatch.accept(ride.id, s.driver.id).await?;
    let assigned = wait_for(&mut rider_ws, "ride:driver_assigned").await?;
    assert_eq!(assigned["data"]["driver_id"], s.driver.id.to_string());

    // Telemetry through the driver socket is acked and relayed to the room.
    send(
        &mut driver_ws,
        serde_json::json!({
            "event": "driver:location:update",
            "data": { "lat": 12.9718, "lng": 77.5948, "ride_id": ride.id },
        }),
    )
    .await?;
    let ack = wait_for(&mut driver_ws, "driver:location:ack").await?;
    assert!(ack["data"]["timestamp"].is_u64());
    // The simulator also feeds this event into the rider's rooms, so match
    // on the driver rather than the exact coordinates.
    let relayed = wait_for(&mut rider_ws, "driver:location:update").await?;
    assert_eq!(relayed["data"]["driver_id"], s.driver.id.to_string());
    assert!(relayed["data"]["lat"].is_f64());
    Ok(())
}
