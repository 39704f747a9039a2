// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the dispatch gateway.

pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::Gateway;

/// Assemble the `/v1` REST surface plus the WebSocket upgrade.
pub fn build_router(gateway: Arc<Gateway>) -> Router {
    let v1 = Router::new()
        .route("/tenants", post(http::create_tenant))
        .route("/tenants/{id}", get(http::get_tenant))
        .route("/riders", post(http::create_rider))
        .route("/riders/{id}", get(http::get_rider))
        .route("/riders/{id}/current-ride", get(http::rider_current_ride))
        .route("/riders/{id}/rides", get(http::rider_rides))
        .route("/drivers", post(http::create_driver))
        .route("/drivers/{id}", get(http::get_driver))
        .route("/drivers/{id}/status", patch(http::set_driver_status))
        .route("/drivers/{id}/location", post(http::driver_location))
        .route("/drivers/{id}/accept", post(http::driver_accept))
        .route("/drivers/{id}/decline", post(http::driver_decline))
        .route("/drivers/{id}/current-ride", get(http::driver_current_ride))
        .route("/drivers/{id}/pending-offers", get(http::driver_pending_offers))
        .route("/rides", post(http::create_ride))
        .route("/rides/{id}", get(http::get_ride))
        .route("/rides/{id}/match", post(http::match_ride))
        .route("/rides/{id}/cancel", post(http::cancel_ride))
        .route("/rides/{id}/status", patch(http::update_ride_status))
        .route("/trips/start", post(http::start_trip))
        .route("/trips/{id}", get(http::get_trip))
        .route("/trips/{id}/end", post(http::end_trip))
        .route("/payments", post(http::create_payment))
        .route("/payments/{id}", get(http::get_payment))
        .route("/payments/{id}/retry", post(http::retry_payment))
        .route("/payments/{id}/refund", post(http::refund_payment))
        .route("/ws", get(ws::ws_handler));

    Router::new()
        .route("/health", get(http::health))
        .nest("/v1", v1)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}
