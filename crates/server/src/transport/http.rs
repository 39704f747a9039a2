// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers. Every response wraps as `{success, data?, error?}`; error
//! codes come straight from the core taxonomy.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use hail_core::error::Error;
use hail_core::model::{DriverStatus, PaymentMethod, PaymentStatus, RideStatus};
use hail_core::services::location::TelemetrySample;
use hail_core::services::registry::{CreateDriver, CreateRider, CreateTenant};
use hail_core::services::rides::CreateRide;
use hail_core::services::trips::EndTrip;

use crate::state::Gateway;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

// -- Envelope -----------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

fn ok<T: Serialize>(status: StatusCode, data: T) -> Response {
    (status, Json(Envelope { success: true, data: Some(data), error: None })).into_response()
}

fn fail(err: Error) -> Response {
    let status = StatusCode::from_u16(err.code.http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = Envelope::<()> {
        success: false,
        data: None,
        error: Some(ErrorBody {
            code: err.code.as_str().to_owned(),
            message: err.message,
            details: err.details,
        }),
    };
    (status, Json(body)).into_response()
}

fn respond<T: Serialize>(result: Result<T, Error>, status: StatusCode) -> Response {
    match result {
        Ok(data) => ok(status, data),
        Err(err) => fail(err),
    }
}

// -- Health -------------------------------------------------------------------

/// `GET /health`
pub async fn health(State(gw): State<Arc<Gateway>>) -> Response {
    let sockets = gw.rooms.socket_count().await;
    ok(StatusCode::OK, json!({ "status": "running", "ws_clients": sockets }))
}

// -- Tenants / riders / drivers ----------------------------------------------

/// `POST /v1/tenants`
pub async fn create_tenant(
    State(gw): State<Arc<Gateway>>,
    Json(req): Json<CreateTenant>,
) -> Response {
    respond(gw.registry.create_tenant(req).await, StatusCode::CREATED)
}

/// `GET /v1/tenants/{id}`
pub async fn get_tenant(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.registry.tenant(id).await, StatusCode::OK)
}

/// `POST /v1/riders`
pub async fn create_rider(
    State(gw): State<Arc<Gateway>>,
    Json(req): Json<CreateRider>,
) -> Response {
    respond(gw.registry.create_rider(req).await, StatusCode::CREATED)
}

/// `GET /v1/riders/{id}`
pub async fn get_rider(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.registry.rider(id).await, StatusCode::OK)
}

/// `GET /v1/riders/{id}/current-ride`
pub async fn rider_current_ride(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> Response {
    match gw.rides.current_for_rider(id).await {
        Some(ride) => ok(StatusCode::OK, ride),
        None => fail(Error::not_found("active ride for rider", id)),
    }
}

#[derive(Debug, Deserialize)]
pub struct RideListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub status: Option<RideStatus>,
}

/// `GET /v1/riders/{id}/rides`
pub async fn rider_rides(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RideListQuery>,
) -> Response {
    let rides = gw
        .rides
        .list_for_rider(
            id,
            query.status,
            query.limit.unwrap_or(20).min(100),
            query.offset.unwrap_or(0),
        )
        .await;
    ok(StatusCode::OK, rides)
}

/// `POST /v1/drivers`
pub async fn create_driver(
    State(gw): State<Arc<Gateway>>,
    Json(req): Json<CreateDriver>,
) -> Response {
    respond(gw.registry.create_driver(req).await, StatusCode::CREATED)
}

/// `GET /v1/drivers/{id}`
pub async fn get_driver(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.registry.driver(id).await, StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: DriverStatus,
}

/// `PATCH /v1/drivers/{id}/status`
pub async fn set_driver_status(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdate>,
) -> Response {
    respond(gw.registry.set_driver_status(id, req.status).await, StatusCode::OK)
}

/// `POST /v1/drivers/{id}/location`. WS is the preferred path; this exists
/// for clients without a socket.
pub async fn driver_location(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Json(sample): Json<TelemetrySample>,
) -> Response {
    match gw.location.ingest(id, sample).await {
        Ok(timestamp) => ok(StatusCode::OK, json!({ "timestamp": timestamp })),
        Err(err) => fail(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub ride_id: Uuid,
}

/// `POST /v1/drivers/{id}/accept`
pub async fn driver_accept(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AcceptRequest>,
) -> Response {
    respond(gw.dispatch.accept(req.ride_id, id).await, StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct DeclineRequest {
    pub ride_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /v1/drivers/{id}/decline`
pub async fn driver_decline(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Json(req): Json<DeclineRequest>,
) -> Response {
    respond(gw.dispatch.decline(req.ride_id, id, req.reason).await, StatusCode::OK)
}

/// `GET /v1/drivers/{id}/current-ride`
pub async fn driver_current_ride(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> Response {
    match gw.rides.current_for_driver(id).await {
        Some(ride) => ok(StatusCode::OK, ride),
        None => fail(Error::not_found("active ride for driver", id)),
    }
}

/// `GET /v1/drivers/{id}/pending-offers`
pub async fn driver_pending_offers(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
) -> Response {
    ok(StatusCode::OK, gw.dispatch.pending_offers_for_driver(id).await)
}

// -- Rides --------------------------------------------------------------------

/// `POST /v1/rides`. Honors `Idempotency-Key`; creation kicks off matching
/// asynchronously, so the response races the offer fan-out by design.
pub async fn create_ride(
    State(gw): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(req): Json<CreateRide>,
) -> Response {
    let idem_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| format!("ride:idempotency:{s}"));

    if let Some(ref key) = idem_key {
        if let Some(ride) = gw.platform.cache.get::<hail_core::model::Ride>(key).await {
            return ok(StatusCode::OK, ride);
        }
    }

    let ride = match gw.rides.create(req).await {
        Ok(ride) => ride,
        Err(err) => return fail(err),
    };
    if let Some(key) = idem_key {
        gw.platform
            .cache
            .set(&key, &ride, Some(gw.platform.config.idempotency_ttl))
            .await;
    }

    // Fire-and-forget matching; clients observe offers over the socket.
    let dispatch_gw = Arc::clone(&gw);
    let ride_id = ride.id;
    tokio::spawn(async move {
        if let Err(e) = dispatch_gw.dispatch.find_drivers(ride_id).await {
            warn!(ride_id = %ride_id, err = %e, "initial matching failed");
        }
    });

    ok(StatusCode::CREATED, ride)
}

/// `GET /v1/rides/{id}`
pub async fn get_ride(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.rides.get(id).await, StatusCode::OK)
}

/// `POST /v1/rides/{id}/match`: caller-driven re-matching.
pub async fn match_ride(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.dispatch.find_drivers(id).await, StatusCode::OK)
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /v1/rides/{id}/cancel`
pub async fn cancel_ride(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Response {
    let reason = body.and_then(|Json(b)| b.reason);
    respond(gw.rides.cancel(id, reason).await, StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub version: Option<u64>,
}

/// `PATCH /v1/rides/{id}/status?version=n`
pub async fn update_ride_status(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Query(query): Query<VersionQuery>,
    Json(req): Json<RideStatusUpdate>,
) -> Response {
    respond(gw.rides.progress(id, req.status, query.version).await, StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct RideStatusUpdate {
    pub status: RideStatus,
}

// -- Trips --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct StartTripRequest {
    pub ride_id: Uuid,
}

/// `POST /v1/trips/start`
pub async fn start_trip(
    State(gw): State<Arc<Gateway>>,
    Json(req): Json<StartTripRequest>,
) -> Response {
    respond(gw.trips.start(req.ride_id).await, StatusCode::CREATED)
}

/// `GET /v1/trips/{id}`
pub async fn get_trip(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.trips.get(id).await, StatusCode::OK)
}

/// `POST /v1/trips/{id}/end`
pub async fn end_trip(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    body: Option<Json<EndTrip>>,
) -> Response {
    let req = body.map(|Json(b)| b).unwrap_or_default();
    respond(gw.trips.end(id, req).await, StatusCode::OK)
}

// -- Payments -----------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub trip_id: Uuid,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// `POST /v1/payments`: 200 once settled, 202 while still processing.
pub async fn create_payment(
    State(gw): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(req): Json<PaymentRequest>,
) -> Response {
    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let Some(key) = req.idempotency_key.or(header_key) else {
        return fail(Error::bad_request("Idempotency-Key header or idempotency_key required"));
    };

    match gw.payments.process(req.trip_id, req.payment_method, &key).await {
        Ok(payment) => {
            let status = match payment.status {
                PaymentStatus::Pending | PaymentStatus::Processing => StatusCode::ACCEPTED,
                _ => StatusCode::OK,
            };
            ok(status, payment)
        }
        Err(err) => fail(err),
    }
}

/// `GET /v1/payments/{id}`
pub async fn get_payment(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.payments.get(id).await, StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub idempotency_key: String,
}

/// `POST /v1/payments/{id}/retry`: a fresh key re-drives a failed payment.
pub async fn retry_payment(
    State(gw): State<Arc<Gateway>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RetryRequest>,
) -> Response {
    respond(gw.payments.retry(id, &req.idempotency_key).await, StatusCode::OK)
}

/// `POST /v1/payments/{id}/refund`
pub async fn refund_payment(State(gw): State<Arc<Gateway>>, Path(id): Path<Uuid>) -> Response {
    respond(gw.payments.refund(id).await, StatusCode::OK)
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
