// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform tuning knobs. The server binary maps its clap flags onto this;
//! tests construct it directly with shortened timings.

use std::time::Duration;

use crate::sim::SimConfig;

#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Candidate search radius around the pickup (km).
    pub search_radius_km: f64,
    /// Cap on candidates returned by one geo query.
    pub max_candidates: usize,
    /// Offer time-to-live.
    pub offer_ttl: Duration,
    /// Cadence of the pending-offer expiry sweep.
    pub offer_sweep_interval: Duration,
    /// Distributed-lock lease for ride acceptance.
    pub ride_lock_lease: Duration,
    /// Distributed-lock lease for the payment pipeline.
    pub payment_lock_lease: Duration,
    /// Attempts when shedding concurrent acceptance at the distributed lock.
    pub lock_attempts: u32,
    /// Delay between those attempts.
    pub lock_retry_delay: Duration,
    /// Driver-metadata cache TTL on the telemetry hot path.
    pub driver_meta_ttl: Duration,
    /// How long an idempotency key binds a payment outcome.
    pub idempotency_ttl: Duration,
    /// Location history flush cadence.
    pub location_flush_interval: Duration,
    /// Flush early once this many samples are buffered.
    pub location_batch_max: usize,
    /// Mock card-PSP success probability.
    pub psp_success_probability: f64,
    /// Average speed used for duration estimates (km/h).
    pub average_speed_kmh: f64,
    pub sim: SimConfig,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            search_radius_km: 5.0,
            max_candidates: 20,
            offer_ttl: Duration::from_secs(15),
            offer_sweep_interval: Duration::from_secs(5),
            ride_lock_lease: Duration::from_secs(5),
            payment_lock_lease: Duration::from_secs(30),
            lock_attempts: 3,
            lock_retry_delay: Duration::from_millis(50),
            driver_meta_ttl: Duration::from_secs(300),
            idempotency_ttl: Duration::from_secs(24 * 3600),
            location_flush_interval: Duration::from_secs(1),
            location_batch_max: 100,
            psp_success_probability: 0.95,
            average_speed_kmh: 30.0,
            sim: SimConfig::default(),
        }
    }
}
