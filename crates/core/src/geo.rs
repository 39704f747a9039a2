// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Great-circle geometry on a spherical earth.
//!
//! Straight-line Haversine is the authoritative distance everywhere; there is
//! no road-graph routing.

use crate::model::GeoPoint;

/// Spherical earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two points, in kilometers.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let sin_dlat = (dlat * 0.5).sin();
    let sin_dlon = (dlon * 0.5).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Initial great-circle bearing from `a` to `b`, in radians.
pub fn bearing(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lon1) = (a.lat.to_radians(), a.lng.to_radians());
    let (lat2, lon2) = (b.lat.to_radians(), b.lng.to_radians());
    let dlon = lon2 - lon1;
    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
    y.atan2(x)
}

/// The point `distance_km` along the great circle from `start` at `bearing_rad`.
pub fn destination(start: GeoPoint, bearing_rad: f64, distance_km: f64) -> GeoPoint {
    let delta = distance_km / EARTH_RADIUS_KM;
    let lat1 = start.lat.to_radians();
    let lon1 = start.lng.to_radians();
    let lat2 = (lat1.sin() * delta.cos() + lat1.cos() * delta.sin() * bearing_rad.cos()).asin();
    let lon2 = lon1
        + (bearing_rad.sin() * delta.sin() * lat1.cos())
            .atan2(delta.cos() - lat1.sin() * lat2.sin());
    GeoPoint { lat: lat2.to_degrees(), lng: lon2.to_degrees() }
}

/// Move `step_km` from `from` toward `to`; clamps onto `to` when the step
/// covers the remaining distance.
pub fn step_toward(from: GeoPoint, to: GeoPoint, step_km: f64) -> GeoPoint {
    if haversine_km(from, to) <= step_km {
        return to;
    }
    destination(from, bearing(from, to), step_km)
}

#[cfg(test)]
#[path = "geo_tests.rs"]
mod tests;
